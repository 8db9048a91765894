//! External static-analysis scanner
//!
//! The scanner runs as a child process against a checked-out working
//! directory and reports findings as JSON on stdout.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::ScannerConfig;
use crate::{Error, Result};

/// Lowest exit status that signals a scanner failure rather than a completed scan
pub const FAILURE_EXIT_CODE: i32 = 2;

/// Registry pack scanned when no ruleset is configured
pub const DEFAULT_RULESET: &str = "p/default";

/// Ruleset name semgrep only accepts with metrics enabled
const AUTO_RULESET: &str = "auto";

/// One issue reported by the scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule_id: String,
    /// Path relative to the working copy root
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub severity: String,
    pub message: String,
}

/// Parsed scanner output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanOutput {
    pub findings: Vec<Finding>,
    /// Non-fatal errors the scanner reported alongside its results
    pub errors: Vec<String>,
}

/// Scan results for one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub commit: String,
    /// Branch that was checked out to reach the commit
    pub branch: String,
    pub findings: Vec<Finding>,
    pub errors: Vec<String>,
}

/// A static-analysis tool that can scan a directory
#[async_trait]
pub trait StaticScanner: Send + Sync {
    /// Get the name of this scanner
    fn name(&self) -> &'static str;

    /// Scan the files under `dir`
    async fn scan(&self, dir: &Path) -> Result<ScanOutput>;
}

/// Semgrep invoked as `semgrep scan --config <ruleset> --json`
#[derive(Debug, Clone)]
pub struct SemgrepScanner {
    semgrep_path: String,
    ruleset: String,
    timeout: Duration,
}

impl SemgrepScanner {
    /// Create a scanner with default settings
    pub fn new() -> Self {
        Self {
            semgrep_path: "semgrep".to_string(),
            ruleset: DEFAULT_RULESET.to_string(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Create a scanner from configuration
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self::new()
            .with_path(config.path.clone())
            .with_ruleset(config.ruleset.clone())
            .with_timeout(config.timeout)
    }

    /// Use a custom path to the semgrep executable
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.semgrep_path = path.into();
        self
    }

    /// Use a specific ruleset (registry name or rules file)
    pub fn with_ruleset(mut self, ruleset: impl Into<String>) -> Self {
        self.ruleset = ruleset.into();
        self
    }

    /// Set the scan deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the command to scan `dir`
    fn build_command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.semgrep_path);
        cmd.arg("scan")
            .arg("--config")
            .arg(&self.ruleset)
            .arg("--json")
            .arg("--quiet");
        if self.ruleset != AUTO_RULESET {
            cmd.arg("--metrics=off");
        }
        cmd.arg(dir);

        cmd.current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd
    }
}

impl Default for SemgrepScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StaticScanner for SemgrepScanner {
    fn name(&self) -> &'static str {
        "semgrep"
    }

    async fn scan(&self, dir: &Path) -> Result<ScanOutput> {
        debug!(dir = %dir.display(), ruleset = %self.ruleset, "Running semgrep");

        let output = tokio::time::timeout(self.timeout, self.build_command(dir).output())
            .await
            .map_err(|_| Error::Timeout(format!("semgrep exceeded {:?}", self.timeout)))?
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::ScannerFailure(format!(
                        "semgrep executable not found at '{}'. Is semgrep installed?",
                        self.semgrep_path
                    ))
                } else {
                    Error::Io(e)
                }
            })?;

        let code = output.status.code();
        match code {
            Some(code) if code < FAILURE_EXIT_CODE => {}
            _ => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(exit_code = ?code, "semgrep failed");
                return Err(Error::ScannerFailure(format!(
                    "semgrep exited with {}: {}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "a signal".to_string()),
                    stderr.trim()
                )));
            }
        }

        parse_semgrep_output(&output.stdout, dir)
    }
}

#[derive(Debug, Deserialize)]
struct SemgrepOutput {
    #[serde(default)]
    results: Vec<SemgrepResult>,
    #[serde(default)]
    errors: Vec<SemgrepError>,
}

#[derive(Debug, Deserialize)]
struct SemgrepResult {
    check_id: String,
    path: String,
    start: SemgrepPosition,
    end: SemgrepPosition,
    #[serde(default)]
    extra: SemgrepExtra,
}

#[derive(Debug, Deserialize)]
struct SemgrepPosition {
    line: u64,
}

#[derive(Debug, Default, Deserialize)]
struct SemgrepExtra {
    #[serde(default)]
    message: String,
    #[serde(default)]
    severity: String,
}

#[derive(Debug, Deserialize)]
struct SemgrepError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: serde_json::Value,
}

/// Parse semgrep's `--json` output, making paths relative to `root`
pub fn parse_semgrep_output(stdout: &[u8], root: &Path) -> Result<ScanOutput> {
    let parsed: SemgrepOutput = serde_json::from_slice(stdout)
        .map_err(|e| Error::ScannerFailure(format!("Unparsable semgrep output: {}", e)))?;

    let findings = parsed
        .results
        .into_iter()
        .map(|r| {
            let relative = Path::new(&r.path)
                .strip_prefix(root)
                .ok()
                .map(|p| p.display().to_string());
            let path = relative.unwrap_or(r.path);

            Finding {
                rule_id: r.check_id,
                path,
                start_line: r.start.line,
                end_line: r.end.line,
                severity: r.extra.severity,
                message: r.extra.message.trim().to_string(),
            }
        })
        .collect();

    let errors = parsed
        .errors
        .into_iter()
        .map(|e| match (e.message.is_empty(), e.kind.as_str()) {
            (false, _) => e.message,
            (true, Some(kind)) => kind.to_string(),
            (true, None) => e.kind.to_string(),
        })
        .collect();

    Ok(ScanOutput { findings, errors })
}
