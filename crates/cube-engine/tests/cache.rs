//! Shared chunk cache behaviour under concurrent consumers.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cube_engine::cube::{CachedCube, JoinBandsCube, SelectBandsCube};
use cube_engine::{
    ChunkCache, ChunkIndex, ChunkProcessor, ChunkShape, CollectChunks, Cube, CubeRef,
    MultiThreadProcessor, NoProgress, RunControl,
};
use test_utils::{daily_reference, pattern_value, CountingCube, FnCube};

const MB: usize = 1024 * 1024;

fn counting(delay: Duration) -> Arc<CountingCube> {
    let inner = Arc::new(FnCube::pattern(
        daily_reference(8, 8, 4, ChunkShape::new(2, 4, 4)),
        &["a", "b"],
    ));
    Arc::new(CountingCube::with_delay(inner, delay))
}

#[test]
fn test_concurrent_requests_compute_once() {
    let source = counting(Duration::from_millis(50));
    let cache = Arc::new(ChunkCache::new(16 * MB));
    let cached = CachedCube::new(source.clone(), Arc::clone(&cache));
    let idx = ChunkIndex::new(1, 0, 1);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| cached.shared_chunk(idx).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(source.calls(), 1);
    assert_eq!(source.max_concurrent(), 1);
    for chunk in &results {
        assert!(Arc::ptr_eq(chunk, &results[0]));
    }
    assert_eq!(results[0].get(1, 0, 0, 0), pattern_value(1, 2, 0, 4));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 7);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_cached_cube_keeps_identity() {
    let source = counting(Duration::ZERO);
    let cached = CachedCube::new(source.clone(), Arc::new(ChunkCache::new(16 * MB)));
    assert_eq!(cached.id(), source.id());
    assert_eq!(cached.spec(), source.spec());
    assert_eq!(cached.bands().names(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_shared_child_is_computed_once_per_chunk() {
    let source = counting(Duration::from_millis(5));
    let cached: CubeRef = Arc::new(CachedCube::new(
        source.clone(),
        Arc::new(ChunkCache::new(16 * MB)),
    ));
    let left: CubeRef = Arc::new(SelectBandsCube::new(Arc::clone(&cached), &["a"]).unwrap());
    let right: CubeRef = Arc::new(SelectBandsCube::new(Arc::clone(&cached), &["b"]).unwrap());
    let joined: CubeRef = Arc::new(JoinBandsCube::new(vec![left, right], None).unwrap());

    let collect = Arc::new(CollectChunks::new());
    let outcome = MultiThreadProcessor::new(4)
        .run(
            Arc::clone(&joined),
            joined.reference().all_chunks(),
            collect.clone(),
            Arc::new(NoProgress),
            RunControl::new(),
        )
        .await
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(collect.len(), 8);
    assert_eq!(source.calls(), 8);
    let chunk = collect.get(ChunkIndex::new(0, 1, 1)).unwrap();
    assert_eq!(chunk.get(0, 1, 0, 0), pattern_value(0, 1, 4, 4));
    assert_eq!(chunk.get(1, 1, 0, 0), pattern_value(1, 1, 4, 4));
}

#[test]
fn test_small_budget_evicts_but_stays_correct() {
    let source = counting(Duration::ZERO);
    // One 2x2x4x4 chunk takes 512 bytes, so two fit.
    let cache = Arc::new(ChunkCache::new(1200));
    let cached = CachedCube::new(source.clone(), Arc::clone(&cache));

    for idx in cached.reference().all_chunks() {
        let chunk = cached.compute_chunk(idx).unwrap();
        assert_eq!(chunk.shape(), [2, 2, 4, 4]);
    }
    assert!(cache.memory_usage() <= cache.memory_limit());
    assert_eq!(cache.stats().evictions, 6);

    // The most recent chunk is still cached.
    let last = ChunkIndex::new(1, 1, 1);
    assert!(cache.contains(source.id(), last));
    cached.compute_chunk(last).unwrap();
    assert_eq!(source.calls(), 8);
}
