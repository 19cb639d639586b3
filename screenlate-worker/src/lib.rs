//! Worker Process Host Module
//!
//! Heavy pipeline stages can run in crash-isolated OS subprocesses. This
//! crate owns that lifecycle: spawning, the JSON-per-line stdio protocol,
//! health monitoring, bounded restart, and graceful shutdown. It also
//! defines the `Stage` abstraction the pipeline uses so the same code path
//! drives an in-process engine and an isolated worker.

use thiserror::Error;

pub mod host;
pub mod protocol;
pub mod stage;

pub use host::{WorkerConfig, WorkerHost, WorkerMetrics, WorkerState};
pub use protocol::{decode_frame, encode_frame, HostMessage, ImagePayload, WorkerMessage};
pub use stage::{DisabledStage, InlineStage, IsolatedStage, Stage};

/// Errors from worker management and the wire protocol
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    #[error("Worker '{name}' did not become ready within {timeout_ms} ms")]
    ReadyTimeout { name: String, timeout_ms: u64 },

    #[error("Worker '{name}' request timed out after {timeout_ms} ms")]
    RequestTimeout { name: String, timeout_ms: u64 },

    #[error("Worker '{name}' crashed")]
    Crashed { name: String },

    #[error("Worker '{name}' exceeded {max_restarts} restarts")]
    RestartLimit { name: String, max_restarts: u32 },

    #[error("Worker '{name}' reported an error: {message}")]
    Remote { name: String, message: String },

    #[error("Worker '{name}' is not running")]
    NotRunning { name: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stage error: {0}")]
    Stage(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, WorkerError>;
