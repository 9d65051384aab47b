//! Transform chunks through an external process.
//!
//! The process receives the chunk on stdin in the binary layout of
//! [`ChunkData::encode`] and must write a chunk of identical shape to stdout.
//! `CUBE_STREAMING=1` and `CUBE_STREAMING_CHUNK_ID=<linear id>` are set in its
//! environment.

use std::io::Write;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::chunk::ChunkData;
use crate::error::{CubeError, Result};
use crate::reference::{ChunkIndex, CubeReference};

use super::{BandList, Cube, CubeRef, CubeSpec};

pub struct StreamCube {
    input: CubeRef,
    command: String,
    args: Vec<String>,
}

impl StreamCube {
    pub fn new(input: CubeRef, command: impl Into<String>, args: Vec<String>) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(CubeError::config("stream command must not be empty"));
        }
        Ok(Self {
            input,
            command,
            args,
        })
    }

    fn run_process(&self, idx: ChunkIndex, input: &ChunkData) -> Result<Vec<u8>> {
        let payload = input.encode();
        let chunk_id = self.input.reference().to_linear(idx);
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env("CUBE_STREAMING", "1")
            .env("CUBE_STREAMING_CHUNK_ID", chunk_id.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CubeError::stream_failure(format!("failed to start '{}': {}", self.command, e))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| CubeError::stream_failure("child stdin unavailable"))?;

        // Feed stdin from a second thread so a process that writes before it
        // has read everything cannot deadlock on a full pipe.
        let output = std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let res = stdin.write_all(&payload);
                drop(stdin);
                res
            });
            let output = child.wait_with_output();
            if let Ok(Err(e)) = writer.join() {
                debug!(chunk = %idx, error = %e, "Stream process closed stdin early");
            }
            output
        })
        .map_err(|e| CubeError::stream_failure(format!("waiting for '{}': {}", self.command, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                chunk = %idx,
                command = %self.command,
                status = %output.status,
                stderr = %stderr.trim(),
                "Stream process failed"
            );
            return Err(CubeError::stream_failure(format!(
                "'{}' exited with {} for chunk {}",
                self.command, output.status, idx
            )));
        }
        Ok(output.stdout)
    }
}

impl Cube for StreamCube {
    fn reference(&self) -> &CubeReference {
        self.input.reference()
    }

    fn bands(&self) -> &BandList {
        self.input.bands()
    }

    fn compute_chunk(&self, idx: ChunkIndex) -> Result<ChunkData> {
        let input = self.input.compute_chunk(idx)?;
        let stdout = self.run_process(idx, &input)?;
        let out = ChunkData::decode(&stdout).map_err(|e| {
            CubeError::stream_failure(format!(
                "malformed output of '{}' for chunk {}: {}",
                self.command, idx, e
            ))
        })?;
        if out.shape() != input.shape() {
            return Err(CubeError::stream_failure(format!(
                "'{}' returned shape {:?} for chunk {}, expected {:?}",
                self.command,
                out.shape(),
                idx,
                input.shape()
            )));
        }
        Ok(out)
    }

    fn spec(&self) -> CubeSpec {
        CubeSpec::Stream {
            input: Box::new(self.input.spec()),
            command: self.command.clone(),
            args: self.args.clone(),
        }
    }
}
