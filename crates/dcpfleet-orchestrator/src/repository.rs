//! Deployment persistence
//!
//! [`JsonFileRepository`] keeps every deployment in a single versioned
//! `deployments.json`. The previous file is kept as `deployments.json.backup`
//! and new content is written to a temporary file before being renamed into
//! place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcpfleet_cloud::{DeploymentConfig, DeploymentStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::{Mutex, RwLock};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "deployments.json";
const STORE_BACKUP: &str = "deployments.json.backup";

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Deployment store version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("Deployment store IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deployment store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, RepositoryError>;

#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<DeploymentConfig>>;

    /// Insert or replace by name.
    async fn save(&self, config: &DeploymentConfig) -> Result<()>;

    async fn list_by_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentConfig>>;

    /// All deployments ordered by name
    async fn list_all(&self) -> Result<Vec<DeploymentConfig>>;

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.load(name).await?.is_some())
    }
}

/// In-memory repository
#[derive(Default)]
pub struct MemoryRepository {
    deployments: RwLock<BTreeMap<String, DeploymentConfig>>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentRepository for MemoryRepository {
    async fn load(&self, name: &str) -> Result<Option<DeploymentConfig>> {
        Ok(self.deployments.read().await.get(name).cloned())
    }

    async fn save(&self, config: &DeploymentConfig) -> Result<()> {
        self.deployments
            .write()
            .await
            .insert(config.name().to_string(), config.clone());
        Ok(())
    }

    async fn list_by_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentConfig>> {
        Ok(self
            .deployments
            .read()
            .await
            .values()
            .filter(|d| d.status == status)
            .cloned()
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<DeploymentConfig>> {
        Ok(self.deployments.read().await.values().cloned().collect())
    }
}

/// On-disk layout of `deployments.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DeploymentStore {
    version: u32,
    updated_at: DateTime<Utc>,
    deployments: BTreeMap<String, DeploymentConfig>,
}

impl Default for DeploymentStore {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            updated_at: Utc::now(),
            deployments: BTreeMap::new(),
        }
    }
}

/// Repository backed by `<state_dir>/deployments.json`
pub struct JsonFileRepository {
    state_dir: PathBuf,
    /// Serializes read-modify-write cycles within the process
    write_lock: Mutex<()>,
}

impl JsonFileRepository {
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STORE_FILE)
    }

    fn backup_path(&self) -> PathBuf {
        self.state_dir.join(STORE_BACKUP)
    }

    async fn read_store(&self) -> Result<DeploymentStore> {
        let path = self.state_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("Deployment store not found, starting empty");
                return Ok(DeploymentStore::default());
            }
            Err(e) => return Err(e.into()),
        };

        let store: DeploymentStore = serde_json::from_str(&content)?;
        if store.version > STORE_VERSION {
            return Err(RepositoryError::UnsupportedVersion {
                found: store.version,
                supported: STORE_VERSION,
            });
        }
        Ok(store)
    }

    async fn write_store(&self, store: &DeploymentStore) -> Result<()> {
        fs::create_dir_all(&self.state_dir).await?;

        let path = self.state_path();
        let temp = self
            .state_dir
            .join(format!(".{}.tmp-{}", STORE_FILE, std::process::id()));

        let content = serde_json::to_string_pretty(store)?;
        fs::write(&temp, content).await?;

        if fs::try_exists(&path).await? {
            fs::copy(&path, self.backup_path()).await?;
        }
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }

        tracing::debug!(
            deployments = store.deployments.len(),
            "Saved deployment store"
        );
        Ok(())
    }
}

#[async_trait]
impl DeploymentRepository for JsonFileRepository {
    async fn load(&self, name: &str) -> Result<Option<DeploymentConfig>> {
        Ok(self.read_store().await?.deployments.remove(name))
    }

    async fn save(&self, config: &DeploymentConfig) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut store = self.read_store().await?;
        store
            .deployments
            .insert(config.name().to_string(), config.clone());
        store.updated_at = Utc::now();
        self.write_store(&store).await
    }

    async fn list_by_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentConfig>> {
        Ok(self
            .read_store()
            .await?
            .deployments
            .into_values()
            .filter(|d| d.status == status)
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<DeploymentConfig>> {
        Ok(self.read_store().await?.deployments.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dcpfleet_cloud::{DeploymentSpec, Scenario};
    use tempfile::tempdir;

    fn config(name: &str) -> DeploymentConfig {
        DeploymentConfig::from_spec(DeploymentSpec::new(
            name,
            Scenario::BackendAutomation,
            "vultr",
        ))
    }

    #[tokio::test]
    async fn test_json_repository_round_trip() {
        let temp_dir = tempdir().unwrap();
        let repo = JsonFileRepository::new(temp_dir.path().join("state"));

        assert!(repo.load("fest-2025-enc").await.unwrap().is_none());
        assert!(repo.list_all().await.unwrap().is_empty());

        let mut deployment = config("fest-2025-enc");
        repo.save(&deployment).await.unwrap();
        repo.save(&config("qa-box")).await.unwrap();

        deployment
            .transition(DeploymentStatus::Deploying, None)
            .unwrap();
        repo.save(&deployment).await.unwrap();

        let loaded = repo.load("fest-2025-enc").await.unwrap().unwrap();
        assert_eq!(loaded, deployment);
        assert!(repo.exists("qa-box").await.unwrap());

        let deploying = repo
            .list_by_status(DeploymentStatus::Deploying)
            .await
            .unwrap();
        assert_eq!(deploying.len(), 1);

        let names: Vec<String> = repo
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.spec.name)
            .collect();
        assert_eq!(names, vec!["fest-2025-enc", "qa-box"]);

        assert!(temp_dir.path().join("state").join(STORE_BACKUP).exists());
    }

    #[tokio::test]
    async fn test_rejects_newer_store_version() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join(STORE_FILE),
            r#"{"version": 99, "updated_at": "2025-01-01T00:00:00Z", "deployments": {}}"#,
        )
        .unwrap();

        let repo = JsonFileRepository::new(temp_dir.path());
        assert!(matches!(
            repo.list_all().await,
            Err(RepositoryError::UnsupportedVersion { found: 99, .. })
        ));
    }

    #[tokio::test]
    async fn test_memory_repository_filters_by_status() {
        let repo = MemoryRepository::new();
        let mut deployed = config("a");
        deployed
            .transition(DeploymentStatus::Deploying, None)
            .unwrap();
        deployed
            .transition(DeploymentStatus::Deployed, None)
            .unwrap();
        repo.save(&deployed).await.unwrap();
        repo.save(&config("b")).await.unwrap();

        let found = repo.list_by_status(DeploymentStatus::Deployed).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "a");
        assert_eq!(repo.list_all().await.unwrap().len(), 2);
    }
}
