//! Child process spawning and PID tracking.

pub mod spawn;
pub mod tracker;

pub use spawn::spawn_agent;
pub use tracker::ProcessTracker;
