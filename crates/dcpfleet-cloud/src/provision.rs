//! Worker provisioning request/result types

use crate::document::InfraDocument;
use crate::model::WorkerHandle;
use serde::{Deserialize, Serialize};

/// Request to provision `count` workers from a materialized document
#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    /// Deployment the workers are attributed to
    pub deployment: String,

    pub document: InfraDocument,

    /// Number of workers to create by this call
    pub count: u32,

    /// Ordinal of the first new worker, used for labels
    pub first_index: u32,
}

impl ProvisionRequest {
    pub fn new(document: InfraDocument, count: u32) -> Self {
        Self {
            deployment: document.deployment().to_string(),
            document,
            count,
            first_index: 0,
        }
    }

    pub fn with_first_index(mut self, index: u32) -> Self {
        self.first_index = index;
        self
    }
}

/// Outcome of a provisioning call
///
/// Providers create workers one by one; a result may carry both created
/// handles and failures. Callers must compare `workers.len()` with the
/// requested count rather than assume atomicity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionResult {
    pub workers: Vec<WorkerHandle>,

    pub failures: Vec<ProvisionFailure>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

/// A worker that could not be created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionFailure {
    /// Position of the worker within the request
    pub index: u32,

    pub error: String,
}

impl ProvisionResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker(&mut self, handle: WorkerHandle) {
        self.workers.push(handle);
    }

    pub fn add_failure(&mut self, index: u32, error: impl Into<String>) {
        self.failures.push(ProvisionFailure {
            index,
            error: error.into(),
        });
    }

    /// Workers missing relative to `requested`.
    pub fn shortfall(&self, requested: u32) -> u32 {
        requested.saturating_sub(self.workers.len() as u32)
    }

    pub fn is_complete(&self, requested: u32) -> bool {
        self.shortfall(requested) == 0
    }

    /// Joined failure messages, if any
    pub fn error_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        Some(
            self.failures
                .iter()
                .map(|f| format!("worker #{}: {}", f.index, f.error))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}
