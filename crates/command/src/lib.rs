//! Droidpilot Command - external process plumbing
//!
//! Everything droidpilot knows about the operating system goes through
//! this crate: a [`CommandSpec`] describes one tool invocation, the
//! runner executes it (blocking-complete or line-streaming), the parser
//! turns tool output into structured progress and failure signals, and
//! [`CancelableCommand`] wraps a run in cooperative cancellation with a
//! bounded termination grace period.

pub mod cancelable;
pub mod parser;
pub mod runner;
pub mod spec;

pub use cancelable::{terminate, CancelableCommand, LineVerdict, Source};
pub use parser::{parse_line, parse_output, InstallFailures, ParsedLine};
pub use runner::{run_blocking, CommandOutcome, CommandStatus};
pub use spec::CommandSpec;
