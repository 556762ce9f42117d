//! Device Tester
//!
//! A linear state machine over the phases of a device test. Each phase
//! runs one external command from the plan; connection and port-gathering
//! failures end the test, identification failures and busy ports are
//! reported and tolerated. The verdict is success when at least one file
//! transfer method works. Only one test runs per tester at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use droidpilot_command::{CancelableCommand, CommandOutcome, CommandSpec, CommandStatus, LineVerdict};
use droidpilot_core::{Event, EventBus};

use crate::plan::{DeviceTestPlan, TransferTest};
use crate::ports::parse_used_ports;
use crate::DeviceTestError;

/// Phase the tester is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestState {
    Inactive,
    Connecting,
    RunningIdentify,
    TestingPorts,
    TestingPrimaryTransfer,
    TestingSecondaryTransfer,
}

/// Terminal result of one device test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestVerdict {
    /// The device is usable for deployment
    Success,
    /// A hard failure occurred, or no transfer method works
    Failure,
}

/// Runs device tests, one at a time, reporting on an event bus.
#[derive(Clone)]
pub struct DeviceTester {
    bus: Arc<EventBus>,
    state: Arc<Mutex<TestState>>,
    active: Arc<Mutex<Option<CancellationToken>>>,
}

impl DeviceTester {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            state: Arc::new(Mutex::new(TestState::Inactive)),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Current phase.
    pub fn state(&self) -> TestState {
        *self.state.lock()
    }

    /// Run the full test sequence described by `plan`.
    ///
    /// Rejected when a test is already in flight. Always returns the
    /// tester to [`TestState::Inactive`] and emits a terminal
    /// [`Event::Finished`].
    pub async fn test_device(&self, plan: &DeviceTestPlan) -> Result<TestVerdict, DeviceTestError> {
        {
            let mut state = self.state.lock();
            if *state != TestState::Inactive {
                return Err(DeviceTestError::Busy);
            }
            *state = TestState::Connecting;
        }
        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());

        let verdict = self.run_phases(plan, &token).await;

        *self.active.lock() = None;
        *self.state.lock() = TestState::Inactive;
        info!(?verdict, "device test finished");
        self.bus.emit(Event::Finished {
            success: verdict == TestVerdict::Success,
        });
        Ok(verdict)
    }

    /// Abort the test in flight. Logs a warning when no test is running.
    pub fn stop_test(&self) {
        match self.active.lock().as_ref() {
            Some(token) => {
                debug!("stopping device test");
                token.cancel();
            }
            None => warn!("stop requested but no device test is running"),
        }
    }

    async fn run_phases(&self, plan: &DeviceTestPlan, token: &CancellationToken) -> TestVerdict {
        self.emit_info("Connecting to device...");
        let outcome = self.run_command(&plan.connect, token).await;
        if !outcome.success() {
            self.emit_error(format!(
                "Connection failure: {}",
                outcome
                    .failure_message()
                    .unwrap_or_else(|| "unknown error".into())
            ));
            return TestVerdict::Failure;
        }
        self.emit_info("Connection to device established.");

        self.set_state(TestState::RunningIdentify);
        self.emit_info("Querying device identification...");
        let outcome = self.run_command(&plan.identify, token).await;
        if token.is_cancelled() {
            return TestVerdict::Failure;
        }
        if outcome.success() {
            self.emit_info(format!("Device: {}", outcome.stdout.trim()));
        } else {
            // Identification is informational only.
            self.bus.emit(Event::Warning {
                message: format!(
                    "Device identification failed: {}",
                    outcome
                        .failure_message()
                        .unwrap_or_else(|| "unknown error".into())
                ),
            });
        }

        self.set_state(TestState::TestingPorts);
        self.emit_info("Checking if required ports are available...");
        let outcome = self.run_command(&plan.gather_ports, token).await;
        if token.is_cancelled() {
            return TestVerdict::Failure;
        }
        if !outcome.success() {
            self.emit_error(format!(
                "Error gathering ports: {}",
                outcome
                    .failure_message()
                    .unwrap_or_else(|| "unknown error".into())
            ));
            return TestVerdict::Failure;
        }
        let used = parse_used_ports(&outcome.stdout);
        let busy: Vec<String> = plan
            .required_ports
            .iter()
            .filter(|port| used.contains(port))
            .map(u16::to_string)
            .collect();
        if busy.is_empty() {
            self.emit_info("All required ports are available.");
        } else {
            // Ports may free up before deployment; report, don't abort.
            self.bus.emit(Event::Warning {
                message: format!(
                    "The following specified ports are currently in use: {}",
                    busy.join(", ")
                ),
            });
        }

        self.set_state(TestState::TestingPrimaryTransfer);
        let primary_ok = self.test_transfer(&plan.primary_transfer, token).await;
        if token.is_cancelled() {
            return TestVerdict::Failure;
        }

        self.set_state(TestState::TestingSecondaryTransfer);
        let secondary_ok = self.test_transfer(&plan.secondary_transfer, token).await;
        if token.is_cancelled() {
            return TestVerdict::Failure;
        }

        if !secondary_ok && primary_ok {
            self.emit_info(format!(
                "\"{}\" will be used for deployment, because \"{}\" is not available.",
                plan.primary_transfer.method.name(),
                plan.secondary_transfer.method.name()
            ));
        }
        if primary_ok || secondary_ok {
            TestVerdict::Success
        } else {
            self.emit_error("File transfer to this device does not work out of the box.");
            TestVerdict::Failure
        }
    }

    async fn test_transfer(&self, transfer: &TransferTest, token: &CancellationToken) -> bool {
        let name = transfer.method.name();
        self.emit_info(format!("Checking whether \"{name}\" works..."));
        let outcome = self.run_command(&transfer.spec, token).await;
        match outcome.status {
            CommandStatus::Success => {
                self.emit_info(format!("\"{name}\" is functional."));
                true
            }
            status => {
                // Transfer failures are individually tolerated; the
                // verdict accounts for them at the end.
                self.bus.emit(Event::Warning {
                    message: format!("\"{name}\" {status}."),
                });
                false
            }
        }
    }

    async fn run_command(&self, spec: &CommandSpec, token: &CancellationToken) -> CommandOutcome {
        CancelableCommand::new(spec.clone())
            .run(token, |_, line| {
                self.bus.emit(Event::Output {
                    line: line.to_string(),
                });
                LineVerdict::Continue
            })
            .await
    }

    fn set_state(&self, state: TestState) {
        debug!(?state, "device test phase");
        *self.state.lock() = state;
    }

    fn emit_info(&self, message: impl Into<String>) {
        self.bus.emit(Event::Info {
            message: message.into(),
        });
    }

    fn emit_error(&self, message: impl Into<String>) {
        self.bus.emit(Event::Error {
            message: message.into(),
        });
    }
}
