//! SDK Manager
//!
//! Front door for sdkmanager operations. At most one operation runs at a
//! time per manager; a second request while busy is rejected rather than
//! queued. Operations execute on background tasks and report through the
//! manager's event bus; the returned handle carries the cancellation
//! token and the eventual per-step outputs.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use droidpilot_command::run_blocking;
use droidpilot_core::{Event, EventBus, EventSubscription};

use crate::config::SdkConfig;
use crate::license;
use crate::sequencer::{run_sequence, Step};
use crate::{InstallationChange, OperationKind, OperationOutput, SdkError};

/// Handle to one in-flight operation.
pub struct OperationHandle {
    id: Uuid,
    token: CancellationToken,
    join: JoinHandle<Vec<OperationOutput>>,
}

impl OperationHandle {
    /// Unique id of this operation, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Request cancellation of this operation.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Wait for completion and collect the per-step outputs.
    pub async fn wait(self) -> Vec<OperationOutput> {
        match self.join.await {
            Ok(outputs) => outputs,
            Err(err) => {
                warn!(error = %err, "operation task failed");
                Vec::new()
            }
        }
    }
}

/// Manages one Android SDK installation through its `sdkmanager` tool.
pub struct SdkManager {
    config: SdkConfig,
    bus: Arc<EventBus>,
    busy: Arc<AtomicBool>,
    license_input: license::InputSlot,
    active: Mutex<Option<CancellationToken>>,
}

impl SdkManager {
    pub fn new(config: SdkConfig) -> Self {
        Self {
            config,
            bus: Arc::new(EventBus::new()),
            busy: Arc::new(AtomicBool::new(false)),
            license_input: Arc::new(RwLock::new(None)),
            active: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    /// Subscribe to this manager's operation events.
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// The manager's event bus.
    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    /// Whether an operation is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Cancel the active operation, if any. Safe to call when idle.
    pub fn cancel_operations(&self) {
        if let Some(token) = self.active.lock().as_ref() {
            info!("cancelling active sdk operation");
            token.cancel();
        }
    }

    /// Deposit an answer for the license prompt currently on display.
    /// A later answer replaces an unconsumed earlier one.
    pub fn accept_license(&self, accept: bool) {
        let answer = if accept { b"Y\n".to_vec() } else { b"n\n".to_vec() };
        *self.license_input.write() = Some(answer);
    }

    /// Update all installed packages to their latest versions.
    pub fn update_all(&self) -> Result<OperationHandle, SdkError> {
        let token = self.begin()?;
        info!("updating all installed sdk packages");
        let steps = vec![Step::new(
            "Updating installed packages",
            OperationKind::UpdateAll,
            self.config.operation_spec(["--update"]),
        )];
        Ok(self.spawn(token.clone(), run_sequence(steps, token, self.bus())))
    }

    /// Apply an installation change: uninstalls first, then installs,
    /// one package per step. Uninstalls run non-interruptibly because a
    /// half-removed package wedges the installation.
    pub fn update(&self, change: InstallationChange) -> Result<OperationHandle, SdkError> {
        let token = self.begin()?;
        info!(
            install = change.to_install.len(),
            uninstall = change.to_uninstall.len(),
            "applying installation change"
        );

        let mut steps = Vec::with_capacity(change.count());
        for package in &change.to_uninstall {
            steps.push(
                Step::new(
                    format!("Uninstalling {package}"),
                    OperationKind::UpdatePackage,
                    self.config.operation_spec(["--uninstall", package.as_str()]),
                )
                .uninterruptible(),
            );
        }
        for package in &change.to_install {
            steps.push(Step::new(
                format!("Installing {package}"),
                OperationKind::UpdatePackage,
                self.config.operation_spec([package.as_str()]),
            ));
        }

        Ok(self.spawn(token.clone(), run_sequence(steps, token, self.bus())))
    }

    /// Probe for pending licenses. The probe's short timeout covers the
    /// case where the tool blocks on a prompt the parser cannot see.
    pub fn check_pending_licenses(&self) -> Result<OperationHandle, SdkError> {
        let token = self.begin()?;
        let steps = vec![Step::new(
            "Checking pending licenses",
            OperationKind::LicenseCheck,
            self.config.license_check_spec(),
        )];
        Ok(self.spawn(token.clone(), run_sequence(steps, token, self.bus())))
    }

    /// Start the interactive license-acceptance session. Prompts are
    /// answered through [`accept_license`](Self::accept_license).
    pub fn run_license_workflow(&self) -> Result<OperationHandle, SdkError> {
        let token = self.begin()?;
        // Stale answers from an earlier session must not leak in.
        *self.license_input.write() = None;
        let workflow = license::run_license_workflow(
            self.config.clone(),
            self.bus(),
            token.clone(),
            Arc::clone(&self.license_input),
        );
        Ok(self.spawn(token, workflow))
    }

    /// The tool's supported common arguments, scraped from `--help`.
    /// Purely informational; `None` when the tool is unavailable.
    pub async fn available_arguments(&self) -> Option<String> {
        let outcome = run_blocking(&self.config.query_spec(["--help"])).await;
        let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
        let (_, tail) = combined.split_once("Common Arguments:")?;
        let section = tail.trim_end();
        (!section.is_empty()).then(|| section.to_string())
    }

    fn begin(&self) -> Result<CancellationToken, SdkError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SdkError::Busy);
        }
        let token = CancellationToken::new();
        *self.active.lock() = Some(token.clone());
        Ok(token)
    }

    fn spawn<F>(&self, token: CancellationToken, operation: F) -> OperationHandle
    where
        F: Future<Output = Vec<OperationOutput>> + Send + 'static,
    {
        let busy = Arc::clone(&self.busy);
        let bus = self.bus();
        let join = tokio::spawn(async move {
            let outputs = operation.await;
            let success = !outputs.is_empty() && outputs.iter().all(|output| output.success);
            bus.emit(Event::Finished { success });
            busy.store(false, Ordering::SeqCst);
            outputs
        });
        OperationHandle {
            id: Uuid::new_v4(),
            token,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("sdkmanager");
        let mut file = std::fs::File::create(&path).expect("create script");
        writeln!(file, "#!/bin/sh\n{body}").expect("write script");
        let mut perms = file.metadata().expect("metadata").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod");
        path
    }

    #[tokio::test]
    async fn test_busy_manager_rejects_second_operation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(dir.path(), fake_tool(dir.path(), "exec sleep 30"));
        let manager = SdkManager::new(config);

        let handle = manager.update_all().expect("first operation");
        assert!(manager.is_busy());
        assert!(matches!(manager.update_all(), Err(SdkError::Busy)));
        assert!(matches!(
            manager.check_pending_licenses(),
            Err(SdkError::Busy)
        ));

        manager.cancel_operations();
        let outputs = handle.wait().await;
        assert!(outputs[0].cancelled);
        assert!(!manager.is_busy());

        // Idle again; a new operation is accepted.
        let handle = manager.update_all().expect("after idle");
        handle.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_update_orders_uninstalls_before_installs() {
        let dir = tempfile::tempdir().expect("tempdir");
        // The script logs its first argument per invocation.
        let log = dir.path().join("calls.log");
        let config = SdkConfig::new(
            dir.path(),
            fake_tool(
                dir.path(),
                &format!(r#"echo "$1" >> {}"#, log.display()),
            ),
        );
        let manager = SdkManager::new(config);

        let change = InstallationChange {
            to_install: vec!["platform-tools".into()],
            to_uninstall: vec!["emulator".into()],
        };
        let outputs = manager.update(change).expect("update").wait().await;
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|output| output.success));
        assert_eq!(outputs[0].name, "Uninstalling emulator");
        assert_eq!(outputs[1].name, "Installing platform-tools");

        let calls = std::fs::read_to_string(&log).expect("call log");
        assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["--uninstall", "platform-tools"]);
    }

    #[tokio::test]
    async fn test_finished_event_reflects_overall_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(dir.path(), fake_tool(dir.path(), "exit 1"));
        let manager = SdkManager::new(config);
        let subscription = manager.subscribe();

        manager.update_all().expect("update").wait().await;

        let finished = subscription
            .drain()
            .into_iter()
            .find_map(|event| match event {
                Event::Finished { success } => Some(success),
                _ => None,
            });
        assert_eq!(finished, Some(false));
    }

    #[tokio::test]
    async fn test_available_arguments_scraped_from_help() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(
            dir.path(),
            fake_tool(
                dir.path(),
                r#"printf "Usage:\n  sdkmanager [options]\nCommon Arguments:\n  --sdk_root=<root>\n  --channel=<id>\n""#,
            ),
        );
        let manager = SdkManager::new(config);

        let arguments = manager.available_arguments().await.expect("arguments");
        assert!(arguments.contains("--sdk_root=<root>"));
        assert!(arguments.contains("--channel=<id>"));

        let missing = SdkManager::new(SdkConfig::new("/tmp", "/definitely/not/sdkmanager"));
        assert!(missing.available_arguments().await.is_none());
    }

    #[tokio::test]
    async fn test_license_workflow_driven_through_manager() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = SdkConfig::new(
            dir.path(),
            fake_tool(
                dir.path(),
                r#"printf "1 of 1 SDK package license not accepted.\nReview licenses that have not been accepted (y/N)? "
read review
printf "License gamma terms.\nAccept? (y/N): "
read answer
exit 0"#,
            ),
        );
        let manager = SdkManager::new(config);

        let handle = manager.run_license_workflow().expect("workflow");
        tokio::time::sleep(Duration::from_millis(600)).await;
        manager.accept_license(true);

        let outputs = handle.wait().await;
        assert!(outputs[0].success, "stderr: {}", outputs[0].stderr);
        assert!(outputs[0].stdout.contains("License gamma terms."));
    }
}
