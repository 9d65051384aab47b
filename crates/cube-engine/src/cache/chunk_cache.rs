//! Memory-bounded LRU cache of computed chunks with single-flight loading.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use metrics::{counter, gauge};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::debug;

use crate::chunk::ChunkData;
use crate::cube::CubeId;
use crate::error::{CubeError, Result};
use crate::reference::ChunkIndex;

/// Cache key for chunks: (cube identity, chunk index).
pub type ChunkKey = (CubeId, ChunkIndex);

/// Cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub memory_bytes: u64,
    pub evictions: u64,
    /// Keys currently being computed.
    pub in_flight: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Synchronizes every request for one key while its chunk is computed.
struct Loader {
    result: Mutex<Option<Result<Arc<ChunkData>>>>,
    done: Condvar,
    waiters: AtomicUsize,
}

impl Loader {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
            waiters: AtomicUsize::new(0),
        }
    }

    fn wait(&self) -> Result<Arc<ChunkData>> {
        let mut slot = self.result.lock();
        while slot.is_none() {
            self.done.wait(&mut slot);
        }
        match slot.as_ref() {
            Some(result) => result.clone(),
            None => Err(CubeError::Internal("loader finished without result".to_string())),
        }
    }

    fn publish(&self, result: Result<Arc<ChunkData>>) {
        *self.result.lock() = Some(result);
        self.done.notify_all();
    }
}

struct Entries {
    lru: LruCache<ChunkKey, Arc<ChunkData>>,
    loaders: HashMap<ChunkKey, Arc<Loader>>,
    current_memory: usize,
}

/// LRU cache for computed chunks with memory-bounded eviction.
///
/// At most one computation per key runs at a time: concurrent requests for
/// a key that is being computed block until the first one finishes and share
/// its result. Keys under computation live in a separate loader table, not in
/// the LRU list, so eviction can never drop an entry somebody waits for.
pub struct ChunkCache {
    entries: Mutex<Entries>,
    memory_limit: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Publishes an error to waiters if the computing closure unwinds.
struct LoadGuard<'a> {
    cache: &'a ChunkCache,
    key: ChunkKey,
    loader: Arc<Loader>,
    finished: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.entries.lock().loaders.remove(&self.key);
            self.loader.publish(Err(CubeError::Internal(format!(
                "computation of chunk {} panicked",
                self.key.1
            ))));
        }
    }
}

impl ChunkCache {
    /// Create a new chunk cache with the given memory limit in bytes.
    pub fn new(memory_limit: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::unbounded(),
                loaders: HashMap::new(),
                current_memory: 0,
            }),
            memory_limit,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Return the cached chunk for `(cube, idx)` or compute it with `compute`.
    ///
    /// Blocks while another caller computes the same key. Failed computations
    /// are shared with the waiting callers but never cached.
    pub fn get_or_compute<F>(&self, cube: CubeId, idx: ChunkIndex, compute: F) -> Result<Arc<ChunkData>>
    where
        F: FnOnce() -> Result<ChunkData>,
    {
        let key = (cube, idx);
        let loader = {
            let mut entries = self.entries.lock();
            if let Some(chunk) = entries.lru.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cube_chunk_cache_hits_total").increment(1);
                return Ok(Arc::clone(chunk));
            }
            if let Some(loader) = entries.loaders.get(&key) {
                let loader = Arc::clone(loader);
                loader.waiters.fetch_add(1, Ordering::SeqCst);
                drop(entries);
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cube_chunk_cache_hits_total").increment(1);
                debug!(cube_id = %cube, chunk = %idx, "Waiting for in-flight chunk");
                let result = loader.wait();
                loader.waiters.fetch_sub(1, Ordering::SeqCst);
                return result;
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!("cube_chunk_cache_misses_total").increment(1);
            let loader = Arc::new(Loader::new());
            entries.loaders.insert(key, Arc::clone(&loader));
            loader
        };

        let mut guard = LoadGuard {
            cache: self,
            key,
            loader: Arc::clone(&loader),
            finished: false,
        };
        let result = compute().map(Arc::new);

        {
            let mut entries = self.entries.lock();
            entries.loaders.remove(&key);
            if let Ok(chunk) = &result {
                self.insert_locked(&mut entries, key, Arc::clone(chunk));
            }
        }
        guard.finished = true;
        loader.publish(result.clone());
        result
    }

    /// Look up a chunk without computing it.
    pub fn get(&self, cube: CubeId, idx: ChunkIndex) -> Option<Arc<ChunkData>> {
        let mut entries = self.entries.lock();
        match entries.lru.get(&(cube, idx)) {
            Some(chunk) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                counter!("cube_chunk_cache_hits_total").increment(1);
                Some(Arc::clone(chunk))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                counter!("cube_chunk_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Check if a key is cached without updating LRU order.
    pub fn contains(&self, cube: CubeId, idx: ChunkIndex) -> bool {
        self.entries.lock().lru.contains(&(cube, idx))
    }

    /// Check if a key is currently being computed.
    pub fn is_in_flight(&self, cube: CubeId, idx: ChunkIndex) -> bool {
        self.entries.lock().loaders.contains_key(&(cube, idx))
    }

    /// Number of callers blocked on the in-flight computation of a key.
    pub fn waiters(&self, cube: CubeId, idx: ChunkIndex) -> usize {
        self.entries
            .lock()
            .loaders
            .get(&(cube, idx))
            .map(|l| l.waiters.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn insert_locked(&self, entries: &mut Entries, key: ChunkKey, chunk: Arc<ChunkData>) {
        let size = chunk.size_bytes();
        if size > self.memory_limit {
            debug!(chunk = %key.1, size, "Chunk larger than cache budget, not cached");
            return;
        }

        // Evict if necessary to make room
        while entries.current_memory + size > self.memory_limit {
            match entries.lru.pop_lru() {
                Some((_, evicted)) => {
                    entries.current_memory =
                        entries.current_memory.saturating_sub(evicted.size_bytes());
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    counter!("cube_chunk_cache_evictions_total").increment(1);
                }
                None => break,
            }
        }

        if let Some(old) = entries.lru.put(key, chunk) {
            entries.current_memory = entries.current_memory.saturating_sub(old.size_bytes());
        }
        entries.current_memory += size;
        gauge!("cube_chunk_cache_size_bytes").set(entries.current_memory as f64);
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.lru.len(),
            memory_bytes: entries.current_memory as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
            in_flight: entries.loaders.len(),
        }
    }

    /// Drop all cached chunks. In-flight computations are unaffected.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.lru.clear();
        entries.current_memory = 0;
        gauge!("cube_chunk_cache_size_bytes").set(0.0);
    }

    /// Get the current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.entries.lock().current_memory
    }

    /// Get the memory limit in bytes.
    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().lru.is_empty()
    }
}
