//! OpenTofu CLI wrapper
//!
//! Wraps the `tofu` CLI for operators who want to review or apply a
//! generated workspace directly. Machine-readable output (`-json`) is used
//! wherever the CLI offers it.

use crate::error::TofuError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

type Result<T> = std::result::Result<T, TofuError>;

/// tofu CLI wrapper bound to one workspace directory
pub struct Tofu {
    binary: String,
    working_dir: PathBuf,
    env: Vec<(String, String)>,
}

impl Tofu {
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            binary: "tofu".to_string(),
            working_dir: working_dir.as_ref().to_path_buf(),
            env: Vec::new(),
        }
    }

    /// Use another binary, e.g. `terraform`
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Check that the binary is installed and return its version.
    pub async fn check_installed(&self) -> Result<String> {
        let output = match self.run_command(&["version", "-json"]).await {
            Err(TofuError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TofuError::TofuNotFound);
            }
            other => other?,
        };

        let version: Value = serde_json::from_str(&output)?;
        version
            .get("terraform_version")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TofuError::UnexpectedOutput(output.trim().to_string()))
    }

    /// Run a tofu command in the workspace and return stdout
    async fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        cmd.current_dir(&self.working_dir);
        cmd.env("TF_IN_AUTOMATION", "1");
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        tracing::debug!(
            dir = %self.working_dir.display(),
            "Running: {} {}",
            self.binary,
            args.join(" ")
        );

        let output = cmd.output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TofuError::CommandFailed {
                command: args.first().copied().unwrap_or_default().to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    pub async fn init(&self) -> Result<()> {
        self.run_command(&["init", "-input=false", "-no-color"])
            .await?;
        Ok(())
    }

    pub async fn validate(&self) -> Result<ValidateReport> {
        // validate exits non-zero on invalid configs but still prints the report
        let output = match self.run_command(&["validate", "-json"]).await {
            Ok(output) => output,
            Err(TofuError::CommandFailed { stderr, .. }) if stderr.is_empty() => {
                return Err(TofuError::UnexpectedOutput(
                    "validate produced no report".to_string(),
                ));
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_str(&output)?)
    }

    /// Plan against the current remote state and summarize the changes.
    pub async fn plan(&self, vars: &BTreeMap<String, String>) -> Result<ChangeSummary> {
        let var_args: Vec<String> = vars.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let mut args = vec!["plan", "-input=false", "-json"];
        for var in &var_args {
            args.push("-var");
            args.push(var.as_str());
        }

        let output = self.run_command(&args).await?;
        parse_change_summary(&output)
    }

    pub async fn apply(&self) -> Result<ChangeSummary> {
        let output = self
            .run_command(&["apply", "-input=false", "-auto-approve", "-json"])
            .await?;
        parse_change_summary(&output)
    }

    pub async fn destroy(&self) -> Result<ChangeSummary> {
        let output = self
            .run_command(&["destroy", "-input=false", "-auto-approve", "-json"])
            .await?;
        parse_change_summary(&output)
    }

    /// Output values keyed by name
    pub async fn output(&self) -> Result<BTreeMap<String, Value>> {
        let output = self.run_command(&["output", "-json"]).await?;
        parse_outputs(&output)
    }
}

/// `tofu validate -json` report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateReport {
    pub valid: bool,

    #[serde(default)]
    pub error_count: u32,

    #[serde(default)]
    pub warning_count: u32,

    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: String,
    pub summary: String,

    #[serde(default)]
    pub detail: String,
}

/// Resource change counts from a plan/apply/destroy run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub add: u32,
    pub change: u32,
    #[serde(rename = "remove")]
    pub destroy: u32,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

#[derive(Deserialize)]
struct StreamMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    changes: Option<ChangeSummary>,
}

/// Extract the last `change_summary` message from a `-json` log stream.
pub fn parse_change_summary(stream: &str) -> Result<ChangeSummary> {
    stream
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<StreamMessage>(line).ok())
        .filter(|msg| msg.kind == "change_summary")
        .filter_map(|msg| msg.changes)
        .last()
        .ok_or_else(|| TofuError::UnexpectedOutput("no change_summary in output".to_string()))
}

/// Flatten `tofu output -json` into name -> value.
pub fn parse_outputs(json: &str) -> Result<BTreeMap<String, Value>> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    #[derive(Deserialize)]
    struct OutputEntry {
        value: Value,
    }

    let entries: BTreeMap<String, OutputEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().map(|(k, e)| (k, e.value)).collect())
}
