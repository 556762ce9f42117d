//! Command Runner
//!
//! Blocking-complete execution of a [`CommandSpec`]: spawn, capture both
//! output streams, wait up to the spec's timeout. The streaming variant
//! lives in [`crate::cancelable`]; this module also defines the outcome
//! types shared by both.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::cancelable::{CancelableCommand, LineVerdict};
use crate::spec::CommandSpec;

/// Terminal classification of one process run.
///
/// Launch failure, timeout, and abnormal exit are deliberately distinct;
/// callers must be able to tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    /// Exited with code 0
    Success,
    /// Exited with a non-zero code
    ExitedWith(i32),
    /// Terminated by a signal / crashed
    Crashed,
    /// Forcibly terminated after the timeout elapsed
    TimedOut,
    /// The process could not be spawned (missing binary, permissions)
    FailedToStart,
    /// Terminated on request before natural completion
    Cancelled,
}

impl CommandStatus {
    /// True only for a clean zero exit.
    pub fn is_success(&self) -> bool {
        matches!(self, CommandStatus::Success)
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandStatus::Success => write!(f, "succeeded"),
            CommandStatus::ExitedWith(code) => write!(f, "exited with code {}", code),
            CommandStatus::Crashed => write!(f, "crashed"),
            CommandStatus::TimedOut => write!(f, "timed out"),
            CommandStatus::FailedToStart => write!(f, "failed to start"),
            CommandStatus::Cancelled => write!(f, "was cancelled"),
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Terminal status
    pub status: CommandStatus,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error (launch errors land here too)
    pub stderr: String,
}

impl CommandOutcome {
    pub(crate) fn unstarted(status: CommandStatus, stderr: String) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr,
        }
    }

    /// True only for a clean zero exit.
    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    /// Human-readable diagnostic for a failed run.
    pub fn failure_message(&self) -> Option<String> {
        if self.success() {
            return None;
        }
        let mut message = format!("Command {}", self.status);
        let detail = self.stderr.trim();
        if !detail.is_empty() {
            message.push_str(": ");
            message.push_str(detail);
        }
        Some(message)
    }
}

/// Run a command to completion, capturing all output.
///
/// The process is forcibly terminated when `spec.timeout` elapses and the
/// outcome is marked [`CommandStatus::TimedOut`].
pub async fn run_blocking(spec: &CommandSpec) -> CommandOutcome {
    let token = CancellationToken::new();
    CancelableCommand::new(spec.clone())
        .run(&token, |_, _| LineVerdict::Continue)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_blocking_captures_both_streams() {
        let outcome = run_blocking(&sh("echo out; echo err >&2")).await;
        assert_eq!(outcome.status, CommandStatus::Success);
        assert!(outcome.stdout.contains("out"));
        assert!(outcome.stderr.contains("err"));
        assert!(outcome.failure_message().is_none());
    }

    #[tokio::test]
    async fn test_nonzero_exit_reported_distinctly() {
        let outcome = run_blocking(&sh("exit 3")).await;
        assert_eq!(outcome.status, CommandStatus::ExitedWith(3));
        assert!(!outcome.success());
    }

    #[tokio::test]
    async fn test_missing_binary_is_failed_to_start() {
        let spec = CommandSpec::new("/definitely/not/a/binary");
        let outcome = run_blocking(&spec).await;
        assert_eq!(outcome.status, CommandStatus::FailedToStart);
        assert!(!outcome.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_terminates_process() {
        let spec = sh("exec sleep 30").timeout(Duration::from_millis(200));
        let started = Instant::now();
        let outcome = run_blocking(&spec).await;
        assert_eq!(outcome.status, CommandStatus::TimedOut);
        // Timeout plus termination grace plus scheduling overhead.
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_env_and_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = sh("echo $DROIDPILOT_PROBE; pwd")
            .env("DROIDPILOT_PROBE", "probe-value")
            .current_dir(dir.path());
        let outcome = run_blocking(&spec).await;
        assert_eq!(outcome.status, CommandStatus::Success);
        assert!(outcome.stdout.contains("probe-value"));
        let canonical = dir.path().canonicalize().expect("canonicalize");
        assert!(outcome.stdout.contains(&canonical.display().to_string()));
    }
}
