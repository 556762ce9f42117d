//! Operation Sequencer
//!
//! Runs an ordered list of steps under one cancellation token and one
//! progress scale. Each step owns an equal quota of the 0-100 range;
//! per-step percentages reported by the tool are mapped into that quota,
//! so five steps advance overall progress in fifths. Steps run strictly
//! one at a time and every step produces an output, even when skipped.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use droidpilot_command::{
    parse_line, CancelableCommand, CommandSpec, CommandStatus, InstallFailures, LineVerdict,
    Source,
};
use droidpilot_core::{Event, EventBus, ProgressReporter};

use crate::{OperationKind, OperationOutput};

/// Diagnostic attached when a tool stops on an unanswerable prompt.
pub const INTERACTION_REQUIRED_MESSAGE: &str =
    "The operation requires user interaction. Use the \"sdkmanager\" command-line tool instead.";

/// One unit of work in a sequence.
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable step name, announced on the bus
    pub name: String,
    pub kind: OperationKind,
    pub spec: CommandSpec,
    /// Interruptible steps may be terminated mid-flight; the rest finish
    /// once started and only honor cancellation between steps.
    pub interruptible: bool,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: OperationKind, spec: CommandSpec) -> Self {
        Self {
            name: name.into(),
            kind,
            spec,
            interruptible: true,
        }
    }

    pub fn uninterruptible(mut self) -> Self {
        self.interruptible = false;
        self
    }
}

/// Execute `steps` in order, reporting progress and output on `bus`.
///
/// Cancellation between steps skips every remaining step; a skipped step
/// is recorded as cancelled, never silently dropped. A failed step does
/// not stop the sequence. Overall progress is forced to 100 at the end
/// regardless of outcome.
pub async fn run_sequence(
    steps: Vec<Step>,
    token: CancellationToken,
    bus: Arc<EventBus>,
) -> Vec<OperationOutput> {
    let total = steps.len().max(1);
    let mut progress = ProgressReporter::on_bus(Arc::clone(&bus));
    let mut outputs = Vec::with_capacity(steps.len());

    for (index, step) in steps.into_iter().enumerate() {
        let offset = (index * 100 / total) as u8;
        let target = ((index + 1) * 100 / total) as u8;

        bus.emit(Event::Started {
            name: step.name.clone(),
        });

        let output = if token.is_cancelled() {
            debug!(step = %step.name, "cancelled, skipping");
            let mut output = OperationOutput::new(step.kind, step.name.clone());
            output.cancelled = true;
            output.stderr = "Cancelled before start.".into();
            output
        } else {
            run_step(&step, &token, &bus, &mut progress, offset, target).await
        };

        progress.set(target);
        if output.success {
            info!(step = %step.name, "step finished");
            bus.emit(Event::Info {
                message: format!("{} done.", step.name),
            });
        } else {
            bus.emit(Event::Error {
                message: format!("{} {}.", step.name, step_failure_word(&output)),
            });
        }
        outputs.push(output);
    }

    progress.finish();
    outputs
}

fn step_failure_word(output: &OperationOutput) -> &'static str {
    if output.cancelled {
        "was cancelled"
    } else {
        "failed"
    }
}

async fn run_step(
    step: &Step,
    token: &CancellationToken,
    bus: &Arc<EventBus>,
    progress: &mut ProgressReporter,
    offset: u8,
    target: u8,
) -> OperationOutput {
    let quota = target - offset;
    let mut failures = InstallFailures::default();
    let mut prompt_seen = false;

    let mut command = CancelableCommand::new(step.spec.clone());
    if !step.interruptible {
        command = command.uninterruptible();
    }

    let outcome = command
        .run(token, |source, line| {
            bus.emit(Event::Output {
                line: line.to_string(),
            });
            failures.merge(InstallFailures::scan(line));
            if source == Source::Stdout {
                let parsed = parse_line(line);
                if let Some(percent) = parsed.progress {
                    progress.set(offset + (percent as u16 * quota as u16 / 100) as u8);
                }
                if parsed.is_prompt {
                    prompt_seen = true;
                    return LineVerdict::Stop;
                }
            }
            LineVerdict::Continue
        })
        .await;

    let mut output = OperationOutput::new(step.kind, step.name.clone());
    output.stdout = outcome.stdout.clone();
    output.failures = failures;

    if prompt_seen {
        output.interaction_required = true;
        output.stderr = INTERACTION_REQUIRED_MESSAGE.into();
        return output;
    }

    match outcome.status {
        CommandStatus::Success => {
            output.success = true;
            output.stderr = outcome.stderr;
        }
        CommandStatus::Cancelled => {
            output.cancelled = true;
            output.stderr = if outcome.stderr.trim().is_empty() {
                "Cancelled.".into()
            } else {
                outcome.stderr
            };
        }
        _ => {
            output.stderr = outcome
                .failure_message()
                .unwrap_or_else(|| "Command failed.".into());
        }
    }
    output
}
