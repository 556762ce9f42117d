//! Droidpilot SDK - sdkmanager orchestration
//!
//! Drives the Android `sdkmanager` command-line tool: whole-installation
//! updates, ordered install/uninstall sequences with quota-weighted
//! progress, license checks, and the interactive license-acceptance
//! workflow. One operation at a time per [`SdkManager`]; everything runs
//! on background tasks and reports through the event bus.

pub mod config;
pub mod license;
pub mod manager;
pub mod sequencer;

pub use config::SdkConfig;
pub use manager::{OperationHandle, SdkManager};
pub use sequencer::{run_sequence, Step};

use droidpilot_command::InstallFailures;

/// SDK orchestration errors
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("An operation is already running against this SDK")]
    Busy,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),
}

/// Kind of sdkmanager operation an output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// `--update` across all installed packages
    UpdateAll,
    /// Install or uninstall of a single package
    UpdatePackage,
    /// Non-interactive `--licenses` probe
    LicenseCheck,
    /// Interactive license acceptance session
    LicenseWorkflow,
}

/// Result of one operation step.
///
/// Produced per step and handed to whatever sink consumes results; a
/// failed step carries a diagnostic plus machine-checkable failure flags
/// so callers can offer targeted remediation instead of raw text.
#[derive(Debug, Clone)]
pub struct OperationOutput {
    /// What kind of operation produced this
    pub kind: OperationKind,
    /// Step name, e.g. "Installing platform-tools"
    pub name: String,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error or a synthesized diagnostic
    pub stderr: String,
    /// Step completed successfully
    pub success: bool,
    /// Step was cancelled (skipped before start or terminated mid-flight)
    pub cancelled: bool,
    /// The tool stopped on an interactive prompt nobody could answer
    pub interaction_required: bool,
    /// Recognized install-failure flags parsed from the output
    pub failures: InstallFailures,
}

impl OperationOutput {
    pub(crate) fn new(kind: OperationKind, name: String) -> Self {
        Self {
            kind,
            name,
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            cancelled: false,
            interaction_required: false,
            failures: InstallFailures::default(),
        }
    }

    /// A failure with recognized flags can be remedied by uninstalling
    /// the existing package and retrying. The decision is the caller's;
    /// this only reports that the option exists.
    pub fn retry_with_uninstall_advised(&self) -> bool {
        !self.success && !self.cancelled && self.failures.retry_with_uninstall()
    }
}

/// Whether any step in a finished sequence advises the
/// uninstall-then-retry recovery path.
pub fn uninstall_retry_advised(outputs: &[OperationOutput]) -> bool {
    outputs.iter().any(OperationOutput::retry_with_uninstall_advised)
}

/// Packages to install and uninstall in one sequencer run.
///
/// The combined count determines each step's progress quota.
#[derive(Debug, Clone, Default)]
pub struct InstallationChange {
    /// sdk-style paths to install, e.g. `platforms;android-34`
    pub to_install: Vec<String>,
    /// sdk-style paths to uninstall
    pub to_uninstall: Vec<String>,
}

impl InstallationChange {
    /// Total number of steps.
    pub fn count(&self) -> usize {
        self.to_install.len() + self.to_uninstall.len()
    }

    /// Nothing to do?
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_installation_change_count() {
        let change = InstallationChange {
            to_install: vec!["platforms;android-34".into()],
            to_uninstall: vec!["emulator".into(), "platform-tools".into()],
        };
        assert_eq!(change.count(), 3);
        assert!(!change.is_empty());
        assert!(InstallationChange::default().is_empty());
    }

    #[test]
    fn test_retry_advice_requires_flags_and_failure() {
        let mut output = OperationOutput::new(OperationKind::UpdatePackage, "Installing x".into());
        assert!(!output.retry_with_uninstall_advised());

        output.failures =
            InstallFailures::scan("Failure [INSTALL_FAILED_UPDATE_INCOMPATIBLE]");
        assert!(output.retry_with_uninstall_advised());
        assert!(uninstall_retry_advised(std::slice::from_ref(&output)));

        // A successful step never advises a retry, whatever was printed.
        output.success = true;
        assert!(!output.retry_with_uninstall_advised());
    }
}
