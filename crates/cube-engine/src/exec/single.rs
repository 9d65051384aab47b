//! Sequential backend, used as ground truth for the others.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::cube::CubeRef;
use crate::error::Result;
use crate::reference::ChunkIndex;

use super::{
    compute_and_deliver, normalize, ChunkCallback, ChunkProcessor, ProgressSink, RunControl,
    RunOutcome, RunTracker,
};

/// Computes chunks one after another in ascending index order on the
/// calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleThreadProcessor;

impl SingleThreadProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Blocking variant of [`ChunkProcessor::run`].
    pub fn run_sync(
        &self,
        cube: &CubeRef,
        chunks: Vec<ChunkIndex>,
        callback: &dyn ChunkCallback,
        progress: Arc<dyn ProgressSink>,
        control: &RunControl,
    ) -> RunOutcome {
        let chunks = normalize(chunks);
        let mut tracker = RunTracker::new(self.name(), chunks.len(), progress);
        let completion = Mutex::new(());

        let mut pending = chunks.into_iter();
        for idx in pending.by_ref() {
            if control.is_cancelled() {
                tracker.skip(idx);
                break;
            }
            debug!(chunk = %idx, "Computing chunk");
            let result = compute_and_deliver(cube, idx, callback, &completion);
            tracker.record(idx, result);
        }
        for idx in pending {
            tracker.skip(idx);
        }
        tracker.finish(control.is_cancelled())
    }
}

#[async_trait]
impl ChunkProcessor for SingleThreadProcessor {
    fn name(&self) -> &'static str {
        "single"
    }

    async fn run(
        &self,
        cube: CubeRef,
        chunks: Vec<ChunkIndex>,
        callback: Arc<dyn ChunkCallback>,
        progress: Arc<dyn ProgressSink>,
        control: RunControl,
    ) -> Result<RunOutcome> {
        Ok(self.run_sync(&cube, chunks, callback.as_ref(), progress, &control))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkData;
    use crate::cube::DummyCube;
    use crate::datetime::TimeStep;
    use crate::error::CubeError;
    use crate::exec::NoProgress;
    use crate::reference::{ChunkShape, CubeReference, SpatialExtent};
    use chrono::NaiveDate;

    fn dummy() -> CubeRef {
        let t0 = NaiveDate::from_ymd_opt(2021, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let reference = CubeReference::new(
            "EPSG:3857",
            SpatialExtent::new(0.0, 40.0, 0.0, 40.0),
            4,
            4,
            t0,
            TimeStep::days(1).advance(t0, 3),
            TimeStep::days(1),
            ChunkShape::new(2, 2, 2),
        )
        .unwrap();
        Arc::new(DummyCube::new(reference, &["v"], 1.0).unwrap())
    }

    #[test]
    fn test_ascending_order() {
        let cube = dummy();
        let order = Mutex::new(Vec::new());
        let cb = |idx: ChunkIndex, _c: ChunkData| -> Result<()> {
            order.lock().push(idx);
            Ok(())
        };
        let mut chunks = cube.reference().all_chunks();
        chunks.reverse();
        let outcome = SingleThreadProcessor.run_sync(
            &cube,
            chunks,
            &cb,
            Arc::new(NoProgress),
            &RunControl::new(),
        );
        assert!(outcome.is_complete());
        assert_eq!(*order.lock(), cube.reference().all_chunks());
    }

    #[test]
    fn test_callback_error_is_chunk_failure() {
        let cube = dummy();
        let cb = |idx: ChunkIndex, _c: ChunkData| -> Result<()> {
            if idx.x == 1 {
                Err(CubeError::Export("disk full".into()))
            } else {
                Ok(())
            }
        };
        let outcome = SingleThreadProcessor.run_sync(
            &cube,
            cube.reference().all_chunks(),
            &cb,
            Arc::new(NoProgress),
            &RunControl::new(),
        );
        assert_eq!(outcome.total, 8);
        assert_eq!(outcome.completed.len(), 4);
        assert_eq!(outcome.failed_count(), 4);
    }

    #[test]
    fn test_cancelled_before_start() {
        let cube = dummy();
        let control = RunControl::new();
        control.cancel();
        let cb = |_: ChunkIndex, _: ChunkData| -> Result<()> { Ok(()) };
        let outcome = SingleThreadProcessor.run_sync(
            &cube,
            cube.reference().all_chunks(),
            &cb,
            Arc::new(NoProgress),
            &control,
        );
        assert!(outcome.cancelled);
        assert!(outcome.completed.is_empty());
        assert_eq!(outcome.failed.len(), 8);
        assert_eq!(outcome.failed_count(), 0);
    }
}
