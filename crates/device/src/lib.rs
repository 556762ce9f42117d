//! Droidpilot Device - remote device testing
//!
//! Checks whether a remote Linux device is usable for deployment: can we
//! connect, what is it, are the ports we need free, and does at least one
//! file-transfer method work. The checks run as a fixed sequence of
//! external commands; soft failures are reported and the test continues,
//! hard failures end it.

pub mod plan;
pub mod ports;
pub mod tester;

pub use plan::{DeviceTestPlan, SshDeviceConfig, TransferMethod, TransferTest};
pub use ports::parse_used_ports;
pub use tester::{DeviceTester, TestState, TestVerdict};

/// Device testing errors
#[derive(Debug, thiserror::Error)]
pub enum DeviceTestError {
    #[error("A device test is already running")]
    Busy,
}
