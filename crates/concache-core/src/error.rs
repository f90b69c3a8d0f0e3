//! Error types for concache-core.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for concache-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by query executor implementations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by the corpus engine behind a [`QueryExecutor`](crate::QueryExecutor).
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Create an engine error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The engine's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Errors that can occur in concache-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation string with an unknown or missing opcode.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A query must contain at least one operation.
    #[error("empty query")]
    EmptyQuery,

    /// Corpus name or content hash unusable as a cache location.
    #[error("invalid dataset identity: {0}")]
    InvalidIdentity(String),

    /// The query executor failed while computing an operation.
    #[error("computation failed at operation '{opcode}{args}': {source}")]
    Computation {
        opcode: char,
        args: String,
        #[source]
        source: EngineError,
    },

    /// A cached concordance could not be loaded back.
    #[error("failed to load cached concordance from {}: {source}", path.display())]
    CacheLoad {
        path: PathBuf,
        #[source]
        source: EngineError,
    },

    /// Coordination map bookkeeping failed.
    #[error("coordination map error: {0}")]
    Coordination(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Communication with a worker's contact endpoint failed.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// The asynchronous worker never completed its handshake.
    #[error("worker handshake failed: {0}")]
    Handshake(String),

    /// Every claim attempt ended with the slot changing hands.
    #[error("claim for {0} is still contended after retries")]
    ClaimContended(String),
}

impl Error {
    /// Wrap an engine failure with the operation that caused it.
    pub fn computation(op: &crate::Operation, source: EngineError) -> Self {
        Self::Computation {
            opcode: op.opcode().code(),
            args: op.args().to_string(),
            source,
        }
    }

    /// Whether the error came from the query executor rather than bookkeeping.
    pub fn is_computation(&self) -> bool {
        matches!(self, Self::Computation { .. } | Self::CacheLoad { .. })
    }

    /// Render the error followed by a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Self::InvalidOperation(_) => {
                Some("each operation starts with a one-letter opcode, e.g. q[word=\"dog\"]")
            }
            Self::EmptyQuery => Some("pass at least one operation"),
            Self::Coordination(_) | Self::ClaimContended(_) => {
                Some("another process may hold the cache; retry, or clean the corpus cache")
            }
            Self::CacheLoad { .. } => Some("the cache entry was dropped; rerun the query"),
            Self::Handshake(_) | Self::Ipc(_) => {
                Some("the background worker is unreachable; rerun without --async")
            }
            _ => None,
        };
        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}
