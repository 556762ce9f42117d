//! Test plans
//!
//! A [`DeviceTestPlan`] names the commands the tester runs, one per
//! phase. Plans are plain data so tests and alternative transports can
//! build their own; [`SshDeviceConfig`] builds the standard ssh-based
//! plan for a remote Linux device.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use droidpilot_command::CommandSpec;

/// File transfer methods, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMethod {
    Sftp,
    Rsync,
}

impl TransferMethod {
    pub fn name(&self) -> &'static str {
        match self {
            TransferMethod::Sftp => "sftp",
            TransferMethod::Rsync => "rsync",
        }
    }
}

/// One transfer method and the command that probes it.
#[derive(Debug, Clone)]
pub struct TransferTest {
    pub method: TransferMethod,
    pub spec: CommandSpec,
}

/// The commands one device test runs, phase by phase.
#[derive(Debug, Clone)]
pub struct DeviceTestPlan {
    /// Establishes the connection; failure ends the test
    pub connect: CommandSpec,
    /// Queries device identification; failure is reported but tolerated
    pub identify: CommandSpec,
    /// Dumps the device's socket tables for port analysis
    pub gather_ports: CommandSpec,
    /// Ports deployment needs to be free on the device
    pub required_ports: Vec<u16>,
    /// Preferred transfer method
    pub primary_transfer: TransferTest,
    /// Fallback transfer method
    pub secondary_transfer: TransferTest,
}

/// ssh connection settings for a remote Linux device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshDeviceConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    /// Extra ssh options, e.g. an identity file
    pub ssh_options: Vec<String>,
    /// Ports deployment needs on the device
    pub required_ports: Vec<u16>,
    pub command_timeout_secs: u64,
}

impl Default for SshDeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            port: 22,
            ssh_options: Vec::new(),
            required_ports: Vec::new(),
            command_timeout_secs: 60,
        }
    }
}

impl SshDeviceConfig {
    fn target(&self) -> String {
        if self.user.is_empty() {
            self.host.clone()
        } else {
            format!("{}@{}", self.user, self.host)
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    fn ssh_spec<I, S>(&self, remote_command: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CommandSpec::new("ssh")
            .args(["-o", "BatchMode=yes", "-p"])
            .arg(self.port.to_string())
            .args(self.ssh_options.iter().cloned())
            .arg(self.target())
            .args(remote_command)
            .timeout(self.timeout())
    }

    /// Build the standard test plan for this device.
    pub fn test_plan(&self) -> DeviceTestPlan {
        DeviceTestPlan {
            connect: self.ssh_spec(["echo", "connected"]),
            identify: self.ssh_spec(["uname", "-rsm"]),
            // tcp6 may be absent; cat still dumps what exists.
            gather_ports: self.ssh_spec(["cat", "/proc/net/tcp", "/proc/net/tcp6"]),
            required_ports: self.required_ports.clone(),
            primary_transfer: TransferTest {
                method: TransferMethod::Sftp,
                spec: CommandSpec::new("sftp")
                    .args(["-q", "-o", "BatchMode=yes", "-b", "/dev/null", "-P"])
                    .arg(self.port.to_string())
                    .arg(self.target())
                    .timeout(self.timeout()),
            },
            secondary_transfer: TransferTest {
                method: TransferMethod::Rsync,
                spec: CommandSpec::new("rsync")
                    .args(["--dry-run", "-e"])
                    .arg(format!("ssh -o BatchMode=yes -p {}", self.port))
                    .arg("/dev/null")
                    .arg(format!("{}:/dev/null", self.target()))
                    .timeout(self.timeout()),
            },
        }
    }
}
