//! Execution backends.
//!
//! A backend takes a cube and a set of chunk indices, materialises every
//! chunk and hands each result to a [`ChunkCallback`]. Three strategies
//! share the [`ChunkProcessor`] contract:
//!
//! ```text
//!   SingleThreadProcessor   ascending index order, calling thread
//!   MultiThreadProcessor    bounded pool pulling from a shared queue
//!   SwarmProcessor          remote workers over HTTP, with reassignment
//! ```
//!
//! Per-chunk errors never abort a run. They are collected in the
//! [`RunOutcome`] next to the indices that succeeded.

mod multithread;
mod single;
mod swarm;

pub use multithread::MultiThreadProcessor;
pub use single::SingleThreadProcessor;
pub use swarm::{
    HttpWorkerEndpoint, RegisterResponse, SwarmProcessor, WireError, WorkerEndpoint,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use tracing::{info, warn};
use uuid::Uuid;

use crate::chunk::ChunkData;
use crate::cube::CubeRef;
use crate::error::{CubeError, Result};
use crate::reference::ChunkIndex;

/// Receives every successfully computed chunk.
///
/// Backends never call `on_chunk` concurrently with itself, so
/// implementations may write to shared outputs without further locking.
/// Calls are not ordered by index except in the single-threaded backend.
pub trait ChunkCallback: Send + Sync {
    fn on_chunk(&self, idx: ChunkIndex, chunk: ChunkData) -> Result<()>;
}

impl<F> ChunkCallback for F
where
    F: Fn(ChunkIndex, ChunkData) -> Result<()> + Send + Sync,
{
    fn on_chunk(&self, idx: ChunkIndex, chunk: ChunkData) -> Result<()> {
        self(idx, chunk)
    }
}

/// Narrow progress interface.
pub trait ProgressSink: Send + Sync {
    fn on_update(&self, completed: usize, total: usize);
}

/// Discards progress updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_update(&self, _completed: usize, _total: usize) {}
}

/// Logs progress through `tracing` about every `step` percent.
pub struct LogProgress {
    step: usize,
}

impl LogProgress {
    pub fn new(step_percent: usize) -> Self {
        Self {
            step: step_percent.clamp(1, 100),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressSink for LogProgress {
    fn on_update(&self, completed: usize, total: usize) {
        if total == 0 {
            return;
        }
        let pct = completed * 100 / total;
        let prev = completed.saturating_sub(1) * 100 / total;
        if completed == total || completed == 1 || pct / self.step != prev / self.step {
            info!(
                progress = format!("{}/{}", completed, total),
                percent = pct,
                "Chunk progress"
            );
        }
    }
}

/// Cancellation handle shared between a caller and a running backend.
///
/// Cancelling stops dispatch; chunks already being computed finish.
#[derive(Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A chunk that could not be produced.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub index: ChunkIndex,
    pub error: CubeError,
}

/// Result of one backend run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub total: usize,
    /// Successfully delivered chunks, in completion order.
    pub completed: Vec<ChunkIndex>,
    /// Failed chunks. Chunks skipped after cancellation appear here with
    /// [`CubeError::Cancelled`].
    pub failed: Vec<ChunkFailure>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// Number of chunks that failed while being computed or delivered.
    pub fn failed_count(&self) -> usize {
        self.failed
            .iter()
            .filter(|f| !matches!(f.error, CubeError::Cancelled(_)))
            .count()
    }

    pub fn failed_indices(&self) -> Vec<ChunkIndex> {
        let mut indices: Vec<ChunkIndex> = self.failed.iter().map(|f| f.index).collect();
        indices.sort();
        indices
    }

    /// True when every requested chunk was delivered.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.completed.len() == self.total
    }
}

/// Common contract of all execution backends.
#[async_trait]
pub trait ChunkProcessor: Send + Sync {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Compute `chunks` of `cube`, delivering each one to `callback`.
    ///
    /// Only run-level problems (e.g. the graph cannot be shipped to any
    /// worker) are returned as errors; chunk errors end up in the outcome.
    async fn run(
        &self,
        cube: CubeRef,
        chunks: Vec<ChunkIndex>,
        callback: Arc<dyn ChunkCallback>,
        progress: Arc<dyn ProgressSink>,
        control: RunControl,
    ) -> Result<RunOutcome>;
}

/// Bookkeeping shared by the backends.
pub(crate) struct RunTracker {
    run_id: Uuid,
    total: usize,
    completed: Vec<ChunkIndex>,
    failed: Vec<ChunkFailure>,
    progress: Arc<dyn ProgressSink>,
    started: Instant,
}

impl RunTracker {
    pub(crate) fn new(backend: &str, total: usize, progress: Arc<dyn ProgressSink>) -> Self {
        let run_id = Uuid::new_v4();
        info!(run_id = %run_id, backend = backend, chunks = total, "Starting run");
        Self {
            run_id,
            total,
            completed: Vec::with_capacity(total),
            failed: Vec::new(),
            progress,
            started: Instant::now(),
        }
    }

    pub(crate) fn record(&mut self, idx: ChunkIndex, result: Result<()>) {
        match result {
            Ok(()) => {
                counter!("cube_chunks_computed_total").increment(1);
                self.completed.push(idx);
            }
            Err(error) => {
                counter!("cube_chunks_failed_total").increment(1);
                warn!(run_id = %self.run_id, chunk = %idx, error = %error, "Chunk failed");
                self.failed.push(ChunkFailure { index: idx, error });
            }
        }
        self.progress
            .on_update(self.completed.len() + self.failed.len(), self.total);
    }

    /// Record a chunk that was never dispatched.
    pub(crate) fn skip(&mut self, idx: ChunkIndex) {
        self.failed.push(ChunkFailure {
            index: idx,
            error: CubeError::Cancelled(idx),
        });
    }

    pub(crate) fn finish(&mut self, cancelled: bool) -> RunOutcome {
        let outcome = RunOutcome {
            run_id: self.run_id,
            total: self.total,
            completed: std::mem::take(&mut self.completed),
            failed: std::mem::take(&mut self.failed),
            cancelled,
            elapsed: self.started.elapsed(),
        };
        info!(
            run_id = %outcome.run_id,
            completed = outcome.completed.len(),
            failed = outcome.failed_count(),
            cancelled = cancelled,
            duration_ms = outcome.elapsed.as_millis() as u64,
            "Run finished"
        );
        outcome
    }
}

/// Compute one chunk and pass it to the callback; a callback error counts
/// as a chunk failure.
pub(crate) fn compute_and_deliver(
    cube: &CubeRef,
    idx: ChunkIndex,
    callback: &dyn ChunkCallback,
    completion: &parking_lot::Mutex<()>,
) -> Result<()> {
    let chunk = cube.compute_chunk(idx)?;
    let _guard = completion.lock();
    callback.on_chunk(idx, chunk)
}

/// Sort and deduplicate requested indices.
pub(crate) fn normalize(mut chunks: Vec<ChunkIndex>) -> Vec<ChunkIndex> {
    chunks.sort();
    chunks.dedup();
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Recorder(AtomicUsize);

    impl ProgressSink for Recorder {
        fn on_update(&self, completed: usize, _total: usize) {
            self.0.store(completed, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_tracker_counts_failures_and_skips() {
        let progress = Arc::new(Recorder(AtomicUsize::new(0)));
        let mut tracker = RunTracker::new("test", 4, progress.clone());
        tracker.record(ChunkIndex::new(0, 0, 0), Ok(()));
        tracker.record(
            ChunkIndex::new(0, 0, 1),
            Err(CubeError::stream_failure("exit 1")),
        );
        tracker.record(ChunkIndex::new(0, 1, 0), Ok(()));
        tracker.skip(ChunkIndex::new(0, 1, 1));
        let outcome = tracker.finish(true);

        assert_eq!(progress.0.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.completed.len(), 2);
        assert_eq!(outcome.failed.len(), 2);
        assert_eq!(outcome.failed_count(), 1);
        assert!(outcome.cancelled);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_closure_callback() {
        let seen = parking_lot::Mutex::new(Vec::new());
        let cb = |idx: ChunkIndex, _chunk: ChunkData| -> Result<()> {
            seen.lock().push(idx);
            Ok(())
        };
        cb.on_chunk(ChunkIndex::new(1, 2, 3), ChunkData::nodata([1, 1, 1, 1]))
            .unwrap();
        assert_eq!(seen.lock().as_slice(), &[ChunkIndex::new(1, 2, 3)]);
    }

    #[test]
    fn test_normalize_sorts_and_dedups() {
        let chunks = vec![
            ChunkIndex::new(1, 0, 0),
            ChunkIndex::new(0, 1, 0),
            ChunkIndex::new(1, 0, 0),
            ChunkIndex::new(0, 0, 1),
        ];
        assert_eq!(
            normalize(chunks),
            vec![
                ChunkIndex::new(0, 0, 1),
                ChunkIndex::new(0, 1, 0),
                ChunkIndex::new(1, 0, 0),
            ]
        );
    }

    #[test]
    fn test_run_control() {
        let control = RunControl::new();
        let clone = control.clone();
        assert!(!control.is_cancelled());
        clone.cancel();
        assert!(control.is_cancelled());
    }
}
