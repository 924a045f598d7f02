//! Reachability Check Port
//!
//! Defines the interface for asking whether the automation target is up.

/// Backend for the availability probe.
///
/// Implementations may ping the target through its scripting channel,
/// look for its process, or anything else that is cheap enough to run
/// every few seconds.
pub trait ReachabilityCheck: Send + Sync {
    /// Whether the target currently answers.
    fn is_reachable(&self) -> bool;
}

impl<F> ReachabilityCheck for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_reachable(&self) -> bool {
        self()
    }
}
