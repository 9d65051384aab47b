//! The three execution backends against the same graphs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cube_engine::{
    ChunkCallback, ChunkData, ChunkIndex, ChunkProcessor, ChunkShape, CollectChunks, Cube,
    CubeError, CubeFactory, CubeRef, CubeSpec, MultiThreadProcessor, NoProgress, ProgressSink,
    RunControl, RunOutcome, SingleThreadProcessor, SourceRegistry, SwarmProcessor, ZarrExport,
};
use parking_lot::Mutex;
use test_utils::{
    assert_values_approx_eq, daily_reference, datetime, endpoints, FnCube, MockWorker,
    SyntheticCatalog, SyntheticReader,
};

/// 20x10 pixels, 2 days, chunks of 1x10x4: ten chunks in total.
fn ten_chunk_cube() -> CubeRef {
    Arc::new(FnCube::pattern(
        daily_reference(20, 10, 2, ChunkShape::new(1, 10, 4)),
        &["a", "b"],
    ))
}

async fn run_with(
    processor: &dyn ChunkProcessor,
    cube: &CubeRef,
) -> (RunOutcome, BTreeMap<ChunkIndex, ChunkData>) {
    let collect = Arc::new(CollectChunks::new());
    let outcome = processor
        .run(
            Arc::clone(cube),
            cube.reference().all_chunks(),
            collect.clone(),
            Arc::new(NoProgress),
            RunControl::new(),
        )
        .await
        .unwrap();
    (outcome, collect.snapshot())
}

#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<(usize, usize)>>,
}

impl ProgressSink for Recorder {
    fn on_update(&self, completed: usize, total: usize) {
        self.updates.lock().push((completed, total));
    }
}

/// Callback that fails for one chunk.
struct FailOn {
    bad: ChunkIndex,
    seen: AtomicUsize,
}

impl ChunkCallback for FailOn {
    fn on_chunk(&self, idx: ChunkIndex, _chunk: ChunkData) -> cube_engine::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if idx == self.bad {
            return Err(CubeError::Export("disk full".to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_single_and_multithread_agree() {
    let cube = ten_chunk_cube();
    let (single, expected) = run_with(&SingleThreadProcessor, &cube).await;
    let (multi, actual) = run_with(&MultiThreadProcessor::new(4), &cube).await;

    assert!(single.is_complete());
    assert!(multi.is_complete());
    assert_eq!(multi.total, 10);
    assert_eq!(expected.len(), 10);
    assert_eq!(expected, actual);
    for (idx, chunk) in &expected {
        assert_eq!(chunk.encode(), actual[idx].encode());
    }
}

#[tokio::test]
async fn test_progress_reaches_total() {
    let cube = ten_chunk_cube();
    let recorder = Arc::new(Recorder::default());
    MultiThreadProcessor::new(3)
        .run(
            Arc::clone(&cube),
            cube.reference().all_chunks(),
            Arc::new(CollectChunks::new()),
            recorder.clone(),
            RunControl::new(),
        )
        .await
        .unwrap();

    let updates = recorder.updates.lock();
    assert_eq!(updates.len(), 10);
    assert_eq!(updates.last(), Some(&(10, 10)));
    assert!(updates.windows(2).all(|w| w[0].0 < w[1].0));
}

#[tokio::test]
async fn test_multithread_isolates_callback_failure() {
    let cube = ten_chunk_cube();
    let bad = ChunkIndex::new(1, 0, 2);
    let callback = Arc::new(FailOn {
        bad,
        seen: AtomicUsize::new(0),
    });
    let outcome = MultiThreadProcessor::new(4)
        .run(
            Arc::clone(&cube),
            cube.reference().all_chunks(),
            callback.clone(),
            Arc::new(NoProgress),
            RunControl::new(),
        )
        .await
        .unwrap();

    assert_eq!(callback.seen.load(Ordering::SeqCst), 10);
    assert_eq!(outcome.completed.len(), 9);
    assert_eq!(outcome.failed_indices(), vec![bad]);
    assert!(matches!(outcome.failed[0].error, CubeError::Export(_)));
}

#[tokio::test]
async fn test_subset_of_chunks_is_deduplicated() {
    let cube = ten_chunk_cube();
    let collect = Arc::new(CollectChunks::new());
    let chunks = vec![
        ChunkIndex::new(1, 0, 4),
        ChunkIndex::new(0, 0, 1),
        ChunkIndex::new(1, 0, 4),
    ];
    let outcome = MultiThreadProcessor::new(2)
        .run(
            Arc::clone(&cube),
            chunks,
            collect.clone(),
            Arc::new(NoProgress),
            RunControl::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.total, 2);
    assert_eq!(collect.len(), 2);
}

#[tokio::test]
async fn test_swarm_matches_single_thread() {
    let cube = ten_chunk_cube();
    let workers = vec![
        Arc::new(MockWorker::new("w1", Arc::clone(&cube))),
        Arc::new(MockWorker::new("w2", Arc::clone(&cube))),
    ];
    let (_, expected) = run_with(&SingleThreadProcessor, &cube).await;
    let (outcome, actual) = run_with(&SwarmProcessor::new(endpoints(&workers)), &cube).await;

    assert!(outcome.is_complete());
    assert_eq!(expected, actual);
    assert_eq!(workers[0].computed().len() + workers[1].computed().len(), 10);
}

#[tokio::test]
async fn test_swarm_reassigns_chunks_of_lost_worker() {
    let cube = ten_chunk_cube();
    let workers = vec![
        Arc::new(MockWorker::new("flaky", Arc::clone(&cube)).fail_after(4)),
        Arc::new(MockWorker::new("steady", Arc::clone(&cube))),
    ];
    let (outcome, collected) =
        run_with(&SwarmProcessor::new(endpoints(&workers)), &cube).await;

    assert_eq!(outcome.completed.len(), 10);
    assert_eq!(outcome.failed_count(), 0);
    assert_eq!(collected.len(), 10);

    let mut all: Vec<u64> = workers.iter().flat_map(|w| w.computed()).collect();
    all.sort_unstable();
    assert_eq!(all, (0..10).collect::<Vec<u64>>());
    assert!(workers[0].computed().len() <= 4);
}

#[tokio::test]
async fn test_swarm_fails_remaining_chunks_when_all_workers_die() {
    let cube = ten_chunk_cube();
    let workers = vec![
        Arc::new(MockWorker::new("w1", Arc::clone(&cube)).fail_after(2)),
        Arc::new(MockWorker::new("w2", Arc::clone(&cube)).fail_after(2)),
    ];
    let (outcome, collected) =
        run_with(&SwarmProcessor::new(endpoints(&workers)), &cube).await;

    assert_eq!(outcome.completed.len(), 4);
    assert_eq!(outcome.failed_count(), 6);
    assert_eq!(collected.len(), 4);
    assert!(outcome
        .failed
        .iter()
        .all(|f| matches!(f.error, CubeError::WorkerUnreachable { .. })));
}

#[tokio::test]
async fn test_swarm_skips_offline_worker() {
    let cube = ten_chunk_cube();
    let workers = vec![
        Arc::new(MockWorker::new("down", Arc::clone(&cube)).offline()),
        Arc::new(MockWorker::new("up", Arc::clone(&cube))),
    ];
    let (outcome, _) = run_with(&SwarmProcessor::new(endpoints(&workers)), &cube).await;

    assert!(outcome.is_complete());
    assert!(workers[0].computed().is_empty());
    assert_eq!(workers[1].computed().len(), 10);
}

#[tokio::test]
async fn test_swarm_without_reachable_workers() {
    let cube = ten_chunk_cube();
    let workers = vec![Arc::new(MockWorker::new("down", Arc::clone(&cube)).offline())];
    let (outcome, collected) = run_with(&SwarmProcessor::new(endpoints(&workers)), &cube).await;

    assert!(collected.is_empty());
    assert_eq!(outcome.failed_count(), 10);
}

#[tokio::test]
async fn test_swarm_retry_budget_zero_gives_up_immediately() {
    let cube = ten_chunk_cube();
    let workers = vec![
        Arc::new(MockWorker::new("flaky", Arc::clone(&cube)).fail_after(1)),
        Arc::new(MockWorker::new("steady", Arc::clone(&cube))),
    ];
    let processor = SwarmProcessor::new(endpoints(&workers)).with_retry_budget(0);
    let (outcome, _) = run_with(&processor, &cube).await;

    assert_eq!(outcome.failed_count(), 1);
    assert_eq!(outcome.completed.len(), 9);
}

#[tokio::test]
async fn test_cancelled_run_delivers_nothing() {
    let cube = ten_chunk_cube();
    let control = RunControl::new();
    control.cancel();
    let collect = Arc::new(CollectChunks::new());
    let outcome = MultiThreadProcessor::new(2)
        .run(
            Arc::clone(&cube),
            cube.reference().all_chunks(),
            collect.clone(),
            Arc::new(NoProgress),
            control,
        )
        .await
        .unwrap();

    assert!(outcome.cancelled);
    assert!(collect.is_empty());
    assert_eq!(outcome.failed_count(), 0);
    assert!(!outcome.is_complete());
}

#[tokio::test]
async fn test_zarr_export_through_multithread_backend() {
    let dir = tempfile::tempdir().unwrap();
    let cube = ten_chunk_cube();
    let path = dir.path().join("pattern.zarr");
    let export = Arc::new(ZarrExport::create(&path, cube.as_ref()).unwrap());

    let outcome = MultiThreadProcessor::new(4)
        .run(
            Arc::clone(&cube),
            cube.reference().all_chunks(),
            export.clone(),
            Arc::new(NoProgress),
            RunControl::new(),
        )
        .await
        .unwrap();
    assert!(outcome.is_complete());

    let (_, expected) = run_with(&SingleThreadProcessor, &cube).await;
    for (idx, chunk) in &expected {
        let written = export.read_chunk(*idx).unwrap();
        assert_eq!(written.shape(), chunk.shape());
        assert_values_approx_eq!(written.values(), chunk.values(), 0.0);
    }
}

fn ndvi_registry() -> SourceRegistry {
    let extent = cube_engine::SpatialExtent::new(0.0, 40.0, 0.0, 40.0);
    let catalog = SyntheticCatalog::new(&["red", "nir"])
        .with_image("s2_a.tif", datetime(2020, 1, 1), extent)
        .with_image("s2_b.tif", datetime(2020, 1, 2), extent);
    let reader = SyntheticReader::new()
        .with_value("s2_a.tif", 100.0)
        .with_value("s2_b.tif", 300.0);
    let mut registry = SourceRegistry::new();
    registry.register("s2", Arc::new(catalog), Arc::new(reader));
    registry
}

#[tokio::test]
async fn test_factory_graph_runs_on_every_backend() {
    let reference = daily_reference(4, 4, 2, ChunkShape::new(1, 2, 2));
    let json = serde_json::json!({
        "type": "reduce_time",
        "reducers": [{"reducer": "max", "band": "ndvi"}],
        "input": {
            "type": "apply_pixel",
            "expressions": ["(nir - red) / (nir + red)"],
            "names": ["ndvi"],
            "input": {
                "type": "source",
                "collection": "s2",
                "reference": reference,
            }
        }
    })
    .to_string();

    let spec = CubeSpec::from_json(&json).unwrap();
    let factory = CubeFactory::new(ndvi_registry());
    let cube = factory.build(&spec).unwrap();
    assert_eq!(cube.spec(), spec);
    assert_eq!(cube.bands().names(), vec!["ndvi_max"]);
    assert_eq!(factory.build(&spec).unwrap().id(), cube.id());

    // nir = base + 1000: ndvi is 1000 / 1200 on day one, 1000 / 1600 on day two.
    let (single, expected) = run_with(&SingleThreadProcessor, &cube).await;
    assert!(single.is_complete());
    for chunk in expected.values() {
        assert_values_approx_eq!(chunk.values(), &[1000.0 / 1200.0; 4], 1e-12);
    }

    let worker = Arc::new(MockWorker::new("w", factory.build(&spec).unwrap()));
    let (swarm, actual) = run_with(&SwarmProcessor::new(endpoints(&[worker])), &cube).await;
    assert!(swarm.is_complete());
    assert_eq!(expected, actual);
}
