//! Shared-memory parallel backend.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::config::EngineConfig;
use crate::cube::CubeRef;
use crate::error::{CubeError, Result};
use crate::reference::ChunkIndex;

use super::{
    compute_and_deliver, normalize, ChunkCallback, ChunkProcessor, ProgressSink, RunControl,
    RunOutcome, RunTracker,
};

/// A pool of `threads` workers pulling chunk indices from one queue.
///
/// Chunk computation runs on the blocking thread pool. Callback
/// invocations are serialized through a completion lock, so their side
/// effects never interleave; their order is the completion order.
#[derive(Debug, Clone, Copy)]
pub struct MultiThreadProcessor {
    threads: usize,
}

impl MultiThreadProcessor {
    pub fn new(threads: usize) -> Self {
        Self {
            threads: threads.max(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.threads)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }
}

#[async_trait]
impl ChunkProcessor for MultiThreadProcessor {
    fn name(&self) -> &'static str {
        "multithread"
    }

    async fn run(
        &self,
        cube: CubeRef,
        chunks: Vec<ChunkIndex>,
        callback: Arc<dyn ChunkCallback>,
        progress: Arc<dyn ProgressSink>,
        control: RunControl,
    ) -> Result<RunOutcome> {
        let chunks = normalize(chunks);
        let mut tracker = RunTracker::new(self.name(), chunks.len(), progress);

        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        for idx in chunks {
            // The receiver is alive until this function returns.
            let _ = queue_tx.send(idx);
        }
        drop(queue_tx);
        let queue = Arc::new(Mutex::new(queue_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<(ChunkIndex, Result<()>)>();
        let completion = Arc::new(parking_lot::Mutex::new(()));

        let mut handles = Vec::with_capacity(self.threads);
        for worker in 0..self.threads {
            let queue = Arc::clone(&queue);
            let result_tx = result_tx.clone();
            let cube = Arc::clone(&cube);
            let callback = Arc::clone(&callback);
            let completion = Arc::clone(&completion);
            let control = control.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    if control.is_cancelled() {
                        break;
                    }
                    let next = queue.lock().await.recv().await;
                    let Some(idx) = next else { break };

                    debug!(worker = worker, chunk = %idx, "Computing chunk");
                    let cube = Arc::clone(&cube);
                    let callback = Arc::clone(&callback);
                    let completion = Arc::clone(&completion);
                    let result = tokio::task::spawn_blocking(move || {
                        compute_and_deliver(&cube, idx, callback.as_ref(), &completion)
                    })
                    .await
                    .unwrap_or_else(|e| {
                        Err(CubeError::Internal(format!("chunk task failed: {}", e)))
                    });

                    if result_tx.send((idx, result)).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        while let Some((idx, result)) = result_rx.recv().await {
            tracker.record(idx, result);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                return Err(CubeError::Internal(format!("worker task failed: {}", e)));
            }
        }

        let mut queue = queue.lock().await;
        while let Ok(idx) = queue.try_recv() {
            tracker.skip(idx);
        }
        Ok(tracker.finish(control.is_cancelled()))
    }
}
