//! Droidpilot Core - Event delivery and progress reporting
//!
//! This crate provides the plumbing shared by the orchestration crates:
//! the event bus that carries progress and diagnostic events up to
//! whatever front end is listening, the monotone progress reporter, and
//! tracing setup.

pub mod events;
pub mod logging;
pub mod progress;

pub use events::{Event, EventBus, EventSubscription};
pub use progress::ProgressReporter;

/// Droidpilot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
