//! SDK configuration
//!
//! Tool locations, extra arguments, and timeouts come from the outside;
//! nothing here probes the filesystem or guesses install locations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use droidpilot_command::CommandSpec;

use crate::SdkError;

/// Short queries against the tool (version, help, license probe).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;
/// Package installs and updates download large archives.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 600;
/// A license probe either answers quickly or blocks on a prompt.
pub const DEFAULT_LICENSE_CHECK_TIMEOUT_SECS: u64 = 4;

/// Configuration for one SDK installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// SDK installation root, passed via `--sdk_root=`
    pub sdk_root: PathBuf,
    /// Path to the `sdkmanager` executable
    pub sdkmanager_tool: PathBuf,
    /// Extra arguments appended to every invocation (proxy settings etc.)
    pub tool_args: Vec<String>,
    /// Environment overrides, e.g. `JAVA_HOME`
    pub env: BTreeMap<String, String>,
    pub command_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub license_check_timeout_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            sdk_root: PathBuf::new(),
            sdkmanager_tool: PathBuf::from("sdkmanager"),
            tool_args: Vec::new(),
            env: BTreeMap::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            license_check_timeout_secs: DEFAULT_LICENSE_CHECK_TIMEOUT_SECS,
        }
    }
}

impl SdkConfig {
    /// Config for the tool at `sdkmanager_tool` managing `sdk_root`.
    pub fn new(sdk_root: impl Into<PathBuf>, sdkmanager_tool: impl Into<PathBuf>) -> Self {
        Self {
            sdk_root: sdk_root.into(),
            sdkmanager_tool: sdkmanager_tool.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SdkError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// The `--sdk_root=<path>` argument every sdkmanager call carries.
    pub fn sdk_root_arg(&self) -> String {
        format!("--sdk_root={}", self.sdk_root.display())
    }

    /// Spec for a short query, e.g. `--version` or `--list`.
    pub fn query_spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec(args, Duration::from_secs(self.command_timeout_secs))
    }

    /// Spec for a long-running install/uninstall/update operation.
    pub fn operation_spec<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.spec(args, Duration::from_secs(self.operation_timeout_secs))
    }

    /// Spec for the non-interactive pending-license probe. The short
    /// timeout doubles as the exit path when the tool blocks on a prompt
    /// our parser failed to recognize.
    pub fn license_check_spec(&self) -> CommandSpec {
        self.spec(["--licenses"], Duration::from_secs(self.license_check_timeout_secs))
    }

    /// Spec for the interactive license-acceptance session.
    pub fn license_workflow_spec(&self) -> CommandSpec {
        self.spec(["--licenses"], Duration::from_secs(self.operation_timeout_secs))
    }

    fn spec<I, S>(&self, args: I, timeout: Duration) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(self.sdkmanager_tool.clone())
            .args(args)
            .args(self.tool_args.iter().cloned())
            .arg(self.sdk_root_arg())
            .timeout(timeout);
        for (key, value) in &self.env {
            spec = spec.env(key, value);
        }
        spec
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_operation_spec_carries_root_and_extras() {
        let mut config = SdkConfig::new("/opt/android-sdk", "/opt/android-sdk/bin/sdkmanager");
        config.tool_args.push("--no_https".into());
        config.env.insert("JAVA_HOME".into(), "/usr/lib/jvm/java-17".into());

        let spec = config.operation_spec(["platforms;android-34"]);
        assert_eq!(
            spec.args,
            vec!["platforms;android-34", "--no_https", "--sdk_root=/opt/android-sdk"]
        );
        assert_eq!(spec.timeout, Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS));
        assert_eq!(spec.env, vec![("JAVA_HOME".to_string(), "/usr/lib/jvm/java-17".to_string())]);
    }

    #[test]
    fn test_license_check_uses_short_timeout() {
        let config = SdkConfig::default();
        let spec = config.license_check_spec();
        assert_eq!(spec.args[0], "--licenses");
        assert_eq!(spec.timeout, Duration::from_secs(DEFAULT_LICENSE_CHECK_TIMEOUT_SECS));
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
sdk_root = "/home/dev/Android/Sdk"
sdkmanager_tool = "/home/dev/Android/Sdk/cmdline-tools/latest/bin/sdkmanager"
tool_args = ["--channel=0"]
operation_timeout_secs = 1200

[env]
JAVA_HOME = "/usr/lib/jvm/java-17"
"#
        )
        .expect("write config");

        let config = SdkConfig::load(file.path()).expect("load");
        assert_eq!(config.sdk_root, PathBuf::from("/home/dev/Android/Sdk"));
        assert_eq!(config.tool_args, vec!["--channel=0"]);
        assert_eq!(config.operation_timeout_secs, 1200);
        // Unset fields fall back to defaults.
        assert_eq!(config.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert_eq!(config.env.get("JAVA_HOME").map(String::as_str), Some("/usr/lib/jvm/java-17"));
    }
}
