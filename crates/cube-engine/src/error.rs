//! Error types for the cube engine.

use thiserror::Error;

use crate::reference::ChunkIndex;

/// Errors that can occur while building or evaluating data cubes.
#[derive(Error, Debug, Clone)]
pub enum CubeError {
    /// Malformed reference or operator parameters, detected at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// A chunk index or space-time point lies outside the defined extent.
    #[error("out of bounds: {requested} is outside {extent}")]
    OutOfBounds { requested: String, extent: String },

    /// Operators combined over incompatible spatiotemporal references.
    #[error("reference mismatch: {0}")]
    ReferenceMismatch(String),

    /// The native I/O collaborator could not read or resample a source image.
    #[error("failed to read source '{uri}': {message}")]
    SourceRead { uri: String, message: String },

    /// An external process used by a stream operator misbehaved.
    #[error("stream failure: {0}")]
    StreamFailure(String),

    /// A swarm worker could not be reached (connection error or timeout).
    #[error("worker {endpoint} unreachable: {message}")]
    WorkerUnreachable { endpoint: String, message: String },

    /// The run was cancelled before this chunk was dispatched.
    #[error("cancelled before chunk {0} was dispatched")]
    Cancelled(ChunkIndex),

    /// Filesystem or process I/O error.
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Writing chunk results to an output store failed.
    #[error("export error: {0}")]
    Export(String),

    /// A computation task panicked or could not be joined.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CubeError {
    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an OutOfBounds error.
    pub fn out_of_bounds(requested: impl Into<String>, extent: impl Into<String>) -> Self {
        Self::OutOfBounds {
            requested: requested.into(),
            extent: extent.into(),
        }
    }

    /// Create a ReferenceMismatch error.
    pub fn reference_mismatch(msg: impl Into<String>) -> Self {
        Self::ReferenceMismatch(msg.into())
    }

    /// Create a SourceRead error.
    pub fn source_read(uri: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SourceRead {
            uri: uri.into(),
            message: msg.into(),
        }
    }

    /// Create a StreamFailure error.
    pub fn stream_failure(msg: impl Into<String>) -> Self {
        Self::StreamFailure(msg.into())
    }

    /// Create a WorkerUnreachable error.
    pub fn worker_unreachable(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::WorkerUnreachable {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Whether the error concerns a single chunk and can be isolated.
    ///
    /// Construction-time errors (`Config`, `ReferenceMismatch`) are fatal
    /// for the whole graph; everything else is counted per chunk.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::ReferenceMismatch(_))
    }

    /// Short machine-readable tag, used on the worker wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::OutOfBounds { .. } => "out_of_bounds",
            Self::ReferenceMismatch(_) => "reference_mismatch",
            Self::SourceRead { .. } => "source_read",
            Self::StreamFailure(_) => "stream_failure",
            Self::WorkerUnreachable { .. } => "worker_unreachable",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Export(_) => "export",
            Self::Internal(_) => "internal",
        }
    }

    /// Rebuild an error from a wire tag and message (inverse of [`kind`](Self::kind)).
    pub fn from_kind(kind: &str, message: String) -> Self {
        match kind {
            "config" => Self::Config(message),
            "out_of_bounds" => Self::OutOfBounds {
                requested: message,
                extent: "remote cube".to_string(),
            },
            "reference_mismatch" => Self::ReferenceMismatch(message),
            "source_read" => Self::SourceRead {
                uri: "remote".to_string(),
                message,
            },
            "stream_failure" => Self::StreamFailure(message),
            "io" => Self::Io(message),
            "serialization" => Self::Serialization(message),
            "export" => Self::Export(message),
            _ => Self::Internal(message),
        }
    }
}

impl From<std::io::Error> for CubeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CubeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for cube engine operations.
pub type Result<T> = std::result::Result<T, CubeError>;
