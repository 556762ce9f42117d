//! Progress/Output Parser
//!
//! Inspects tool output for the conventions the Android command-line
//! tools follow: a trailing `NN%` token is a progress report, a
//! parenthesized `(y/N)` indicator followed by `:` or `?` is an
//! interactive prompt (the tool will hang until it is answered), and a
//! small fixed set of `adb install` failure strings identifies failures
//! with a known remediation.

use once_cell::sync::Lazy;
use regex::Regex;

static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)%").expect("progress regex"));

// Matches "(y/N):", "( y / n )?" and friends, case-insensitive.
static PROMPT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\(\s*y\s*[/\\]\s*n\s*\)\s*[:?]").expect("prompt regex"));

const INCONSISTENT_CERTIFICATES: &str = "INSTALL_PARSE_FAILED_INCONSISTENT_CERTIFICATES";
const UPDATE_INCOMPATIBLE: &str = "INSTALL_FAILED_UPDATE_INCOMPATIBLE";
const PERMISSION_MODEL_DOWNGRADE: &str = "INSTALL_FAILED_PERMISSION_MODEL_DOWNGRADE";
const VERSION_DOWNGRADE: &str = "INSTALL_FAILED_VERSION_DOWNGRADE";

/// Structured signals parsed from a single line of tool output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedLine {
    /// Percent-complete reported on this line, when in range 0-100
    pub progress: Option<u8>,
    /// Line contains an interactive yes/no prompt
    pub is_prompt: bool,
}

/// Parse one line of output. Pure function of its input.
pub fn parse_line(line: &str) -> ParsedLine {
    let mut progress = None;
    for cap in PROGRESS_RE.captures_iter(line) {
        // The last token on the line wins; out-of-range values carry no
        // progress signal.
        progress = match cap[1].parse::<u32>() {
            Ok(value) if value <= 100 => Some(value as u8),
            _ => None,
        };
    }

    ParsedLine {
        progress,
        is_prompt: PROMPT_RE.is_match(line),
    }
}

/// Parse a multi-line chunk. The last in-range progress value wins; the
/// prompt flag is set if any line contains one.
pub fn parse_output(text: &str) -> ParsedLine {
    let mut result = ParsedLine {
        progress: None,
        is_prompt: false,
    };
    for line in text.lines().filter(|l| !l.is_empty()) {
        let parsed = parse_line(line);
        if parsed.progress.is_some() {
            result.progress = parsed.progress;
        }
        result.is_prompt |= parsed.is_prompt;
    }
    result
}

/// Recognized install-failure kinds, accumulated over an output stream.
///
/// Each flag maps to one `adb install` failure string. Any set flag means
/// the failure has a known remediation: uninstall the existing package
/// and retry the install. A failure with no flag set is final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallFailures {
    /// Package signed with a different certificate than the installed one
    pub inconsistent_certificates: bool,
    /// Update is incompatible with the installed package
    pub update_incompatible: bool,
    /// New package uses an older permission model
    pub permission_model_downgrade: bool,
    /// Installed version is newer than the one being installed
    pub version_downgrade: bool,
}

impl InstallFailures {
    /// Scan one output line for the known failure strings.
    pub fn scan(line: &str) -> Self {
        Self {
            inconsistent_certificates: line.contains(INCONSISTENT_CERTIFICATES),
            update_incompatible: line.contains(UPDATE_INCOMPATIBLE),
            permission_model_downgrade: line.contains(PERMISSION_MODEL_DOWNGRADE),
            version_downgrade: line.contains(VERSION_DOWNGRADE),
        }
    }

    /// Accumulate flags found in another scan.
    pub fn merge(&mut self, other: Self) {
        self.inconsistent_certificates |= other.inconsistent_certificates;
        self.update_incompatible |= other.update_incompatible;
        self.permission_model_downgrade |= other.permission_model_downgrade;
        self.version_downgrade |= other.version_downgrade;
    }

    /// Any recognized failure present?
    pub fn any(&self) -> bool {
        self.inconsistent_certificates
            || self.update_incompatible
            || self.permission_model_downgrade
            || self.version_downgrade
    }

    /// Whether an uninstall-then-retry recovery is worth offering.
    pub fn retry_with_uninstall(&self) -> bool {
        self.any()
    }

    /// Names of the set flags, for diagnostics.
    pub fn describe(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.inconsistent_certificates {
            out.push("inconsistent certificates");
        }
        if self.update_incompatible {
            out.push("incompatible update");
        }
        if self.permission_model_downgrade {
            out.push("permission model downgrade");
        }
        if self.version_downgrade {
            out.push("version downgrade");
        }
        out
    }
}
