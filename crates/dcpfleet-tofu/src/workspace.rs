//! Declarative-config workspace
//!
//! Blob store keyed by deployment name holding the generated document.
//! Writes are atomic: content goes to a temporary file that is renamed over
//! the previous document, so an interrupted write never leaves a truncated
//! `main.tf.json` behind.

use crate::error::WorkspaceError;
use async_trait::async_trait;
use dcpfleet_cloud::DOCUMENT_FILE;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::fs;
use tokio::io::AsyncWriteExt;

type Result<T> = std::result::Result<T, WorkspaceError>;

#[async_trait]
pub trait Workspace: Send + Sync {
    /// Replace the document for `deployment` atomically.
    async fn write_atomic(&self, deployment: &str, content: &[u8]) -> Result<()>;

    async fn read(&self, deployment: &str) -> Result<Option<Vec<u8>>>;

    /// Remove everything stored for `deployment`; missing entries are fine.
    async fn remove(&self, deployment: &str) -> Result<()>;

    /// Directory holding the document, for backends that live on disk
    fn local_dir(&self, _deployment: &str) -> Option<PathBuf> {
        None
    }
}

fn check_key(deployment: &str) -> Result<()> {
    let bad = deployment.is_empty()
        || deployment == "."
        || deployment == ".."
        || deployment.contains(['/', '\\'])
        || deployment.starts_with('.');
    if bad {
        return Err(WorkspaceError::InvalidKey(deployment.to_string()));
    }
    Ok(())
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> WorkspaceError + '_ {
    move |source| WorkspaceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Workspace rooted at a directory: `<root>/<deployment>/main.tf.json`
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir(&self, deployment: &str) -> PathBuf {
        self.root.join(deployment)
    }

    pub fn document_path(&self, deployment: &str) -> PathBuf {
        self.dir(deployment).join(DOCUMENT_FILE)
    }
}

#[async_trait]
impl Workspace for FsWorkspace {
    async fn write_atomic(&self, deployment: &str, content: &[u8]) -> Result<()> {
        check_key(deployment)?;
        let dir = self.dir(deployment);
        fs::create_dir_all(&dir).await.map_err(io_error(&dir))?;

        let target = dir.join(DOCUMENT_FILE);
        let temp = dir.join(format!(".{}.tmp-{}", DOCUMENT_FILE, std::process::id()));

        let mut file = fs::File::create(&temp).await.map_err(io_error(&temp))?;
        file.write_all(content).await.map_err(io_error(&temp))?;
        file.sync_all().await.map_err(io_error(&temp))?;
        drop(file);

        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(io_error(&target)(e));
        }

        tracing::debug!(deployment, path = %target.display(), "Wrote workspace document");
        Ok(())
    }

    async fn read(&self, deployment: &str) -> Result<Option<Vec<u8>>> {
        check_key(deployment)?;
        let path = self.document_path(deployment);
        match fs::read(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn remove(&self, deployment: &str) -> Result<()> {
        check_key(deployment)?;
        let dir = self.dir(deployment);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!(deployment, "Removed workspace");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&dir)(e)),
        }
    }

    fn local_dir(&self, deployment: &str) -> Option<PathBuf> {
        Some(self.dir(deployment))
    }
}

/// In-memory workspace
#[derive(Debug, Default)]
pub struct MemoryWorkspace {
    documents: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, deployment: &str) -> bool {
        self.documents
            .lock()
            .map(|docs| docs.contains_key(deployment))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Workspace for MemoryWorkspace {
    async fn write_atomic(&self, deployment: &str, content: &[u8]) -> Result<()> {
        check_key(deployment)?;
        let mut docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        docs.insert(deployment.to_string(), content.to_vec());
        Ok(())
    }

    async fn read(&self, deployment: &str) -> Result<Option<Vec<u8>>> {
        check_key(deployment)?;
        let docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        Ok(docs.get(deployment).cloned())
    }

    async fn remove(&self, deployment: &str) -> Result<()> {
        check_key(deployment)?;
        let mut docs = self.documents.lock().unwrap_or_else(|p| p.into_inner());
        docs.remove(deployment);
        Ok(())
    }
}
