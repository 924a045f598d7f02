//! Domain Layer
//!
//! Entities, errors and the ports the resilience layer calls out through.

pub mod entities;
pub mod errors;
pub mod ports;

pub use entities::{CacheEntry, DeadLetterEntry, OperationKey, OperationKind, Params, ProbeResult};
pub use errors::{DeadLetterError, OperationError, ResilienceError};
