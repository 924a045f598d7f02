//! Application Layer
//!
//! Use cases that compose the resilience components.

mod resilience_context;

pub use resilience_context::{ContextStats, ResilienceContext};
