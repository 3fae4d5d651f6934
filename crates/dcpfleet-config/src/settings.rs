//! DCPFleet settings file (`dcpfleet.yaml`)

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding `deployments.json`
    pub state_dir: PathBuf,

    /// Root of the per-deployment OpenTofu workspaces
    pub workspace_dir: PathBuf,

    pub orchestrator: OrchestratorSettings,

    pub reconciler: ReconcilerSettings,

    pub providers: ProvidersSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".dcpfleet/state"),
            workspace_dir: PathBuf::from(".dcpfleet/workspaces"),
            orchestrator: OrchestratorSettings::default(),
            reconciler: ReconcilerSettings::default(),
            providers: ProvidersSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// How long a lifecycle operation waits for a busy deployment
    pub lock_wait_ms: u64,

    /// Deadline for a single provisioning call
    pub apply_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            lock_wait_ms: 0,
            apply_timeout_secs: 1800,
        }
    }
}

impl OrchestratorSettings {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSettings {
    pub interval_secs: u64,

    /// Unhealthy workers older than this are replaced
    pub unhealthy_grace_secs: u64,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            unhealthy_grace_secs: 300,
        }
    }
}

impl ReconcilerSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn unhealthy_grace(&self) -> Duration {
        Duration::from_secs(self.unhealthy_grace_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersSettings {
    pub vultr: VultrSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VultrSettings {
    /// Inline API key; prefer `api_key_env`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub api_key_env: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    pub pricing_ttl_secs: u64,
}

impl Default for VultrSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "VULTR_API_KEY".to_string(),
            base_url: None,
            pricing_ttl_secs: 3600,
        }
    }
}

impl VultrSettings {
    /// Inline key if set, otherwise the configured environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn pricing_ttl(&self) -> Duration {
        Duration::from_secs(self.pricing_ttl_secs)
    }
}

impl Settings {
    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self> {
        // An empty file parses as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings =
            serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
                path: origin.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings = Self::from_yaml(&content, path)?;
        if let Some(base) = path.parent() {
            settings.resolve_relative_to(base);
        }
        tracing::debug!(path = %path.display(), "Loaded settings");
        Ok(settings)
    }

    /// Load the first settings file found, or defaults.
    pub fn discover() -> Result<(Self, Option<PathBuf>)> {
        match crate::find_config_file()? {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.reconciler.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.interval_secs は 1 以上である必要があります".to_string(),
            ));
        }
        if self.orchestrator.apply_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.apply_timeout_secs は 1 以上である必要があります".to_string(),
            ));
        }
        Ok(())
    }

    /// Relative directories in a settings file are relative to that file's project root.
    fn resolve_relative_to(&mut self, config_dir: &Path) {
        // `.dcpfleet/config.yaml` lives one level below the project root
        let root = if config_dir.file_name().is_some_and(|n| n == ".dcpfleet") {
            config_dir.parent().unwrap_or(config_dir)
        } else {
            config_dir
        };
        for dir in [&mut self.state_dir, &mut self.workspace_dir] {
            if dir.is_relative() {
                *dir = root.join(&*dir);
            }
        }
    }
}
