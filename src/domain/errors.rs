//! Error taxonomy for calls into the automation target.

use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Failure reported by an executor for a single attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    /// Timeout, dropped channel, target busy
    #[error("transient failure: {0}")]
    Transient(String),
    /// The call completed but produced nothing usable
    #[error("operation returned no result")]
    NoResult,
    /// Malformed parameters or configuration; retrying cannot help
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Anything the executor could not classify
    #[error("{0}")]
    Failed(String),
}

impl OperationError {
    /// Whether another attempt may succeed.
    ///
    /// Only `InvalidInput` is terminal; unclassified failures are retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, OperationError::InvalidInput(_))
    }
}

/// Outcome of a logical call that did not produce a result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResilienceError {
    /// The availability probe did not see the target within the wait
    #[error("automation target unreachable (waited {waited:?}), retry later")]
    TargetUnreachable { waited: Duration },
    /// The circuit breaker is shedding load
    #[error("circuit breaker open, retry later")]
    CircuitOpen,
    /// The executor refused the call as invalid
    #[error("operation {operation} rejected: {reason}")]
    Rejected { operation: String, reason: String },
    /// Every attempt failed
    #[error("operation {operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: String,
        dead_letter_id: Option<Uuid>,
    },
}

impl ResilienceError {
    /// Whether the caller should simply retry later.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            ResilienceError::TargetUnreachable { .. } | ResilienceError::CircuitOpen
        )
    }

    /// Dead letter record created for this failure, if any.
    pub fn dead_letter_id(&self) -> Option<Uuid> {
        match self {
            ResilienceError::Exhausted { dead_letter_id, .. } => *dead_letter_id,
            _ => None,
        }
    }
}

/// Errors reading or writing the dead letter file.
#[derive(Debug, thiserror::Error)]
pub enum DeadLetterError {
    #[error("dead letter file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dead letter encoding: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DeadLetterError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DeadLetterError::Io {
            path: path.into(),
            source,
        }
    }
}
