mod executor;
mod reachability_check;

pub use executor::Executor;
pub use reachability_check::ReachabilityCheck;
