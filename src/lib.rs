//! Droidpilot - asynchronous external-tool orchestration for Android
//! SDK and remote-device workflows.
//!
//! The workspace is split by concern:
//! - `droidpilot-core`: event bus, monotone progress reporting, tracing
//!   setup
//! - `droidpilot-command`: command specs, the cancelable runner, and the
//!   output parser
//! - `droidpilot-sdk`: sdkmanager operations (updates, installs, license
//!   workflows) behind [`SdkManager`]
//! - `droidpilot-device`: remote device testing behind [`DeviceTester`]
//!
//! This crate re-exports the public surface and owns process-wide setup.

pub use droidpilot_command::{
    parse_line, parse_output, run_blocking, CancelableCommand, CommandOutcome, CommandSpec,
    CommandStatus, InstallFailures, LineVerdict, ParsedLine, Source,
};
pub use droidpilot_core::{Event, EventBus, EventSubscription, ProgressReporter};
pub use droidpilot_device::{
    DeviceTestError, DeviceTestPlan, DeviceTester, SshDeviceConfig, TestState, TestVerdict,
    TransferMethod, TransferTest,
};
pub use droidpilot_sdk::{
    uninstall_retry_advised, InstallationChange, OperationHandle, OperationKind, OperationOutput,
    SdkConfig, SdkError, SdkManager, Step,
};

/// Commonly used types in one import.
pub mod prelude {
    pub use crate::{
        CommandSpec, DeviceTestPlan, DeviceTester, Event, EventBus, InstallationChange, SdkConfig,
        SdkManager, TestVerdict,
    };
}

/// Droidpilot version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Process-wide setup: install the tracing subscriber.
///
/// Call once early; embedding applications that manage their own
/// subscriber can skip this.
pub fn init() -> anyhow::Result<()> {
    droidpilot_core::logging::init();
    tracing::debug!(version = VERSION, "droidpilot initialized");
    Ok(())
}
