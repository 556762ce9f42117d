//! License workflow
//!
//! Drives an interactive `sdkmanager --licenses` session. The tool is
//! spawned with a piped stdin; its first prompt ("review licenses that
//! have not been accepted?") is always answered yes, after which each
//! license text is surfaced on the bus and the session waits for an
//! accept/reject decision deposited through
//! [`SdkManager::accept_license`](crate::SdkManager::accept_license).
//! The session header names the step count ("N of M licenses"), which
//! sizes the progress scale.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use droidpilot_command::{parse_output, terminate};
use droidpilot_core::{Event, EventBus, ProgressReporter};

use crate::config::SdkConfig;
use crate::{OperationKind, OperationOutput};

static STEP_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+of\s+(\d+)").expect("step count regex"));

/// How often the child is polled for exit and the input slot for answers.
const POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Grace between SIGTERM and SIGKILL on cancellation.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// A single-slot mailbox for license answers. Writers replace any unread
/// value; the workflow consumes at most one answer per prompt.
pub(crate) type InputSlot = Arc<RwLock<Option<Vec<u8>>>>;

pub(crate) async fn run_license_workflow(
    config: SdkConfig,
    bus: Arc<EventBus>,
    token: CancellationToken,
    input: InputSlot,
) -> Vec<OperationOutput> {
    let mut output = OperationOutput::new(OperationKind::LicenseWorkflow, "License workflow".into());
    let mut progress = ProgressReporter::on_bus(Arc::clone(&bus));
    bus.emit(Event::Started {
        name: output.name.clone(),
    });

    let spec = config.license_workflow_spec();
    debug!(command = %spec.display(), "starting license workflow");

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            warn!(command = %spec.display(), error = %err, "failed to start");
            output.stderr = format!("Failed to start license tool: {err}");
            bus.emit(Event::Error {
                message: output.stderr.clone(),
            });
            progress.finish();
            return vec![output];
        }
    };

    let mut stdin = match child.stdin.take() {
        Some(stdin) => stdin,
        None => {
            let _ = child.start_kill();
            output.stderr = "License tool has no input channel.".into();
            progress.finish();
            return vec![output];
        }
    };

    // Raw chunk pump; prompts carry no trailing newline, so line-based
    // reading would starve.
    let (tx, mut rx) = mpsc::channel::<String>(16);
    if let Some(mut stdout) = child.stdout.take() {
        tokio::spawn(async move {
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]).into_owned();
                        if tx.send(text).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    // Text accumulated since the last prompt; once the review starts,
    // each flush is one license text.
    let mut cache = String::new();
    let mut reviewing = false;
    let mut steps: Option<u32> = None;
    let mut answered: u32 = 0;
    let mut stdout_done = false;
    let mut cancelled = false;

    loop {
        tokio::select! {
            maybe_chunk = rx.recv(), if !stdout_done => {
                let Some(chunk) = maybe_chunk else {
                    stdout_done = true;
                    continue;
                };
                cache.push_str(&chunk);
                if !parse_output(&cache).is_prompt {
                    continue;
                }
                if reviewing {
                    output.stdout.push_str(&cache);
                    bus.emit(Event::Info {
                        message: cache.trim_end().to_string(),
                    });
                } else {
                    // Session header: note the step count and always
                    // enter the review.
                    reviewing = true;
                    if let Some(caps) = STEP_COUNT_RE.captures(&cache) {
                        steps = caps[2].parse().ok();
                        debug!(steps = ?steps, "license review started");
                    }
                    write_answer(&mut stdin, b"Y\n").await;
                }
                cache.clear();
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {
                match child.try_wait() {
                    Ok(Some(status)) => {
                        // The tool exits normally whether or not every
                        // license was accepted.
                        output.success = status.code().is_some();
                        if !output.success {
                            output.stderr = "License tool crashed.".into();
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(error = %err, "license tool wait failed");
                        output.stderr = err.to_string();
                        break;
                    }
                }
                if reviewing {
                    let answer = input.write().take();
                    if let Some(answer) = answer {
                        write_answer(&mut stdin, &answer).await;
                        answered += 1;
                        if let Some(total) = steps.filter(|total| *total > 0) {
                            progress.set((answered * 100 / total).min(100) as u8);
                        }
                    }
                }
            }
            _ = token.cancelled(), if !cancelled => {
                cancelled = true;
                debug!("license workflow cancelled");
                terminate(&mut child);
                if tokio::time::timeout(TERM_GRACE, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = tokio::time::timeout(TERM_GRACE, child.wait()).await;
                }
                output.cancelled = true;
                output.stderr = "Cancelled.".into();
                break;
            }
        }
    }

    while let Ok(chunk) = rx.try_recv() {
        output.stdout.push_str(&chunk);
    }

    progress.finish();
    vec![output]
}

async fn write_answer(stdin: &mut ChildStdin, answer: &[u8]) {
    if stdin.write_all(answer).await.is_err() || stdin.flush().await.is_err() {
        warn!("license tool closed its input channel");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    /// A stand-in license tool: one review prompt, then two licenses.
    fn fake_license_tool(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("sdkmanager");
        let mut file = std::fs::File::create(&path).expect("create script");
        file.write_all(
            br#"#!/bin/sh
printf "2 of 2 SDK package licenses not accepted.\nReview licenses that have not been accepted (y/N)? "
read review
printf "License alpha terms.\nAccept? (y/N): "
read first
printf "License beta terms.\nAccept? (y/N): "
read second
echo "All SDK package licenses accepted."
exit 0
"#,
        )
        .expect("write script");
        let mut perms = file.metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[tokio::test]
    async fn test_workflow_answers_header_then_waits_for_decisions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(dir.path(), fake_license_tool(dir.path()));

        let bus = Arc::new(EventBus::new());
        let subscription = bus.subscribe();
        let input: InputSlot = Arc::new(RwLock::new(None));
        let token = CancellationToken::new();

        let answers = Arc::clone(&input);
        tokio::spawn(async move {
            // Two decisions, spaced beyond the poll interval so each one
            // lands in its own mailbox read.
            for _ in 0..2 {
                tokio::time::sleep(Duration::from_millis(600)).await;
                *answers.write() = Some(b"Y\n".to_vec());
            }
        });

        let outputs = run_license_workflow(config, Arc::clone(&bus), token, input).await;
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].success, "stderr: {}", outputs[0].stderr);
        assert!(outputs[0].stdout.contains("License alpha terms."));
        assert!(outputs[0].stdout.contains("License beta terms."));

        let events = subscription.drain();
        let progress: Vec<u8> = events
            .iter()
            .filter_map(|event| match event {
                Event::Progress { percent } => Some(*percent),
                _ => None,
            })
            .collect();
        // Two answers over two steps: halfway after the first, done after
        // the second.
        assert_eq!(progress, vec![0, 50, 100]);
    }

    #[tokio::test]
    async fn test_workflow_cancellation_terminates_tool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(dir.path(), fake_license_tool(dir.path()));

        let bus = Arc::new(EventBus::new());
        let input: InputSlot = Arc::new(RwLock::new(None));
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let outputs = run_license_workflow(config, bus, token, input).await;
        assert!(outputs[0].cancelled);
        assert!(!outputs[0].success);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_tool_fails_cleanly() {
        let config = SdkConfig::new("/tmp", "/definitely/not/sdkmanager");
        let bus = Arc::new(EventBus::new());
        let input: InputSlot = Arc::new(RwLock::new(None));

        let outputs =
            run_license_workflow(config, bus, CancellationToken::new(), input).await;
        assert!(!outputs[0].success);
        assert!(outputs[0].stderr.contains("Failed to start"));
    }
}
