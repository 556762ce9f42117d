//! Cancelable Operation
//!
//! Wraps one [`CommandSpec`] invocation in cooperative cancellation.
//! Output is delivered line by line to a caller-supplied handler while
//! the process runs; the handler may request a stop (used when a
//! blocking interactive prompt is detected, since an unanswered prompt
//! hangs the tool forever). Cancellation and timeout both follow the
//! same termination path: SIGTERM, a bounded grace period, then SIGKILL.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::parser;
use crate::runner::{CommandOutcome, CommandStatus};
use crate::spec::CommandSpec;

/// How long a terminated process gets to exit before SIGKILL.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(1);

/// Which stream a line arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Stdout,
    Stderr,
}

/// Returned by the line handler to keep the process running or stop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
    Continue,
    Stop,
}

/// A single external command run under a cancellation token.
pub struct CancelableCommand {
    spec: CommandSpec,
    interruptible: bool,
    grace: Duration,
}

impl CancelableCommand {
    /// Wrap `spec`; interruptible by default.
    pub fn new(spec: CommandSpec) -> Self {
        Self {
            spec,
            interruptible: true,
            grace: DEFAULT_GRACE,
        }
    }

    /// Ignore cancellation once started. Used for steps that must not be
    /// interrupted mid-flight (partial uninstalls leave inconsistent
    /// state). Cancellation before start still skips the command.
    pub fn uninterruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }

    /// Override the termination grace period.
    pub fn grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// The wrapped spec.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Execute the command.
    ///
    /// Returns an outcome in every case; this boundary never panics and
    /// never blocks past `spec.timeout` plus the grace period.
    pub async fn run<F>(&self, token: &CancellationToken, mut on_line: F) -> CommandOutcome
    where
        F: FnMut(Source, &str) -> LineVerdict,
    {
        if token.is_cancelled() {
            debug!(command = %self.spec.display(), "cancelled before start");
            return CommandOutcome::unstarted(CommandStatus::Cancelled, String::new());
        }

        debug!(command = %self.spec.display(), "spawning");
        let mut child = match self.spec.to_command().spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(command = %self.spec.display(), error = %err, "failed to start");
                return CommandOutcome::unstarted(CommandStatus::FailedToStart, err.to_string());
            }
        };

        let (tx, mut rx) = mpsc::channel::<(Source, String)>(64);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, Source::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, Source::Stderr, tx.clone()));
        }
        drop(tx);

        let mut stdout_buf = String::new();
        let mut stderr_buf = String::new();
        let timeout_at = Instant::now() + self.spec.timeout;
        // Sentinel deadline; armed when termination is requested.
        let mut kill_at = Instant::now() + Duration::from_secs(86_400);
        let mut kill_sent = false;
        let mut latched: Option<CommandStatus> = None;

        let exit = loop {
            tokio::select! {
                maybe_line = rx.recv() => {
                    // None means both pipes hit EOF; keep waiting for exit.
                    if let Some((source, line)) = maybe_line {
                        append_line(&mut stdout_buf, &mut stderr_buf, source, &line);
                        if on_line(source, &line) == LineVerdict::Stop && latched.is_none() {
                            debug!(command = %self.spec.display(), "stop requested by output handler");
                            latched = Some(CommandStatus::Cancelled);
                            terminate(&mut child);
                            kill_at = Instant::now() + self.grace;
                        }
                    }
                }
                status = child.wait() => break status,
                _ = token.cancelled(), if self.interruptible && latched.is_none() => {
                    debug!(command = %self.spec.display(), "cancellation requested");
                    latched = Some(CommandStatus::Cancelled);
                    terminate(&mut child);
                    kill_at = Instant::now() + self.grace;
                }
                _ = sleep_until(timeout_at), if latched.is_none() => {
                    warn!(command = %self.spec.display(), timeout = ?self.spec.timeout, "timed out");
                    latched = Some(CommandStatus::TimedOut);
                    terminate(&mut child);
                    kill_at = Instant::now() + self.grace;
                }
                _ = sleep_until(kill_at), if !kill_sent => {
                    warn!(command = %self.spec.display(), "grace period elapsed, killing");
                    kill_sent = true;
                    let _ = child.start_kill();
                }
            }
        };

        // Collect whatever the pumps still hold. Bounded, because a
        // grandchild inheriting the pipes could keep them open.
        let drain = async {
            while let Some((source, line)) = rx.recv().await {
                append_line(&mut stdout_buf, &mut stderr_buf, source, &line);
                let _ = on_line(source, &line);
            }
        };
        let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;

        let status = match latched {
            Some(status) => status,
            None => match &exit {
                Ok(es) if es.success() => CommandStatus::Success,
                Ok(es) => match es.code() {
                    Some(code) => CommandStatus::ExitedWith(code),
                    None => CommandStatus::Crashed,
                },
                Err(err) => {
                    warn!(command = %self.spec.display(), error = %err, "wait failed");
                    CommandStatus::Crashed
                }
            },
        };

        debug!(command = %self.spec.display(), ?status, "finished");
        CommandOutcome {
            status,
            stdout: stdout_buf,
            stderr: stderr_buf,
        }
    }
}

fn append_line(stdout: &mut String, stderr: &mut String, source: Source, line: &str) {
    let buf = match source {
        Source::Stdout => stdout,
        Source::Stderr => stderr,
    };
    buf.push_str(line);
    buf.push('\n');
}

/// Request a graceful stop: SIGTERM on unix, immediate kill elsewhere.
/// The caller owns the follow-up SIGKILL if the grace period lapses.
pub fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        return;
    }
    let _ = child.start_kill();
}

/// Read a stream in chunks and forward complete lines.
///
/// A partial line that looks like an interactive prompt is flushed
/// immediately: prompts carry no trailing newline and the tool is
/// already blocked waiting for input by the time we see one.
async fn pump_lines<R>(mut stream: R, source: Source, tx: mpsc::Sender<(Source, String)>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        pending.extend_from_slice(&chunk[..n]);

        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let mut raw: Vec<u8> = pending.drain(..=pos).collect();
            while matches!(raw.last(), Some(b'\n' | b'\r')) {
                raw.pop();
            }
            let line = String::from_utf8_lossy(&raw).into_owned();
            if tx.send((source, line)).await.is_err() {
                return;
            }
        }

        if !pending.is_empty() {
            let tail = String::from_utf8_lossy(&pending).into_owned();
            if parser::parse_line(&tail).is_prompt {
                pending.clear();
                if tx.send((source, tail)).await.is_err() {
                    return;
                }
            }
        }
    }
    if !pending.is_empty() {
        let tail = String::from_utf8_lossy(&pending).into_owned();
        let _ = tx.send((source, tail)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_cancelled_before_start_spawns_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let outcome = CancelableCommand::new(sh("echo should-not-run"))
            .run(&token, |_, _| LineVerdict::Continue)
            .await;
        assert_eq!(outcome.status, CommandStatus::Cancelled);
        assert!(outcome.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_lines_streamed_in_order() {
        let token = CancellationToken::new();
        let mut seen = Vec::new();
        let outcome = CancelableCommand::new(sh("echo one; echo two; echo three"))
            .run(&token, |source, line| {
                if source == Source::Stdout {
                    seen.push(line.to_string());
                }
                LineVerdict::Continue
            })
            .await;
        assert_eq!(outcome.status, CommandStatus::Success);
        assert_eq!(seen, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_respects_grace() {
        let token = CancellationToken::new();
        let command = CancelableCommand::new(sh("exec sleep 30").timeout(Duration::from_secs(30)));

        let canceller = token.clone();
        let cancel_task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let at = std::time::Instant::now();
            canceller.cancel();
            at
        });

        let outcome = command.run(&token, |_, _| LineVerdict::Continue).await;
        let cancelled_at = cancel_task.await.expect("cancel task");

        assert_eq!(outcome.status, CommandStatus::Cancelled);
        // Grace period plus scheduling overhead.
        assert!(cancelled_at.elapsed() < DEFAULT_GRACE + Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_uninterruptible_runs_to_completion() {
        let token = CancellationToken::new();
        let command = CancelableCommand::new(sh("sleep 0.3; echo finished")).uninterruptible();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let outcome = command.run(&token, |_, _| LineVerdict::Continue).await;
        assert_eq!(outcome.status, CommandStatus::Success);
        assert!(outcome.stdout.contains("finished"));
    }

    #[tokio::test]
    async fn test_prompt_without_newline_triggers_stop() {
        let token = CancellationToken::new();
        let prompted = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&prompted);

        let spec = sh(r#"printf "Accept? (y/N): "; exec sleep 30"#).timeout(Duration::from_secs(30));
        let started = std::time::Instant::now();
        let outcome = CancelableCommand::new(spec)
            .run(&token, |_, line| {
                if parser::parse_line(line).is_prompt {
                    flag.store(true, std::sync::atomic::Ordering::SeqCst);
                    return LineVerdict::Stop;
                }
                LineVerdict::Continue
            })
            .await;

        assert!(prompted.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(outcome.status, CommandStatus::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
