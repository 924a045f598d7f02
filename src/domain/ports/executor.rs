//! Executor Port
//!
//! Defines the interface for performing one operation against the
//! automation target.

use crate::domain::entities::Params;
use crate::domain::errors::OperationError;
use serde_json::Value;

/// Performs a single operation against the automation target.
///
/// This is an outbound port. Implementations build whatever command the
/// target understands and report the outcome; the resilience layer decides
/// whether and how often to call them.
pub trait Executor: Send + Sync {
    /// Run `operation` once with `params`.
    fn execute(&self, operation: &str, params: &Params) -> Result<Value, OperationError>;
}

impl<F> Executor for F
where
    F: Fn(&str, &Params) -> Result<Value, OperationError> + Send + Sync,
{
    fn execute(&self, operation: &str, params: &Params) -> Result<Value, OperationError> {
        self(operation, params)
    }
}
