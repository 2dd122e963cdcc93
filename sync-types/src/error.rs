//! Error types for stagesync.

use thiserror::Error;

/// Errors that can occur in stagesync operations.
///
/// Providers, clients and state stores all report through this one type so
/// that a provider error reaches the caller of a client unchanged.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Stage id, provider id or checkpoint is unknown
    #[error("not found: {0}")]
    NotFound(String),

    /// Next stage requested from the last stage
    #[error("stage {0} is the last stage")]
    OutOfRange(String),

    /// Shard id out of range or malformed marker
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Provider reported an inconsistent shard layout
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Timeout or backend hiccup; safe to retry with the same marker
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Persistent backend fault
    #[error("I/O error: {0}")]
    Io(String),

    /// Promotion requested after the last stage completed
    #[error("no more stages")]
    NoMoreStages,

    /// Promotion requested before every shard finished
    #[error("stage incomplete: {complete} of {total} shards done")]
    StageIncomplete {
        /// Shards that reported done.
        complete: usize,
        /// Shards in the stage.
        total: usize,
    },

    /// Client used before a stage was entered
    #[error("client has no active stage")]
    NotInitialized,

    /// Provider returned a fetch result that breaks the protocol
    #[error("inconsistent fetch result: {0}")]
    InconsistentResult(String),

    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    /// Encoding version newer than this decoder understands
    #[error("unsupported encoding version: {0}")]
    UnsupportedVersion(u8),

    /// Invalid data format
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl SyncError {
    /// Whether the failed operation may be retried unchanged.
    ///
    /// Only transient I/O qualifies: a fetch is idempotent for a given marker
    /// and a failed save never committed anything.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::TransientIo(_))
    }
}

/// Result alias used throughout stagesync.
pub type Result<T> = std::result::Result<T, SyncError>;
