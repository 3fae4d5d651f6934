//! Deployment data model
//!
//! Pure data shared by the orchestrator, the reconciler and every provider
//! adapter. Nothing here performs I/O.

use crate::error::CloudError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Tag key attached to every provisioned worker, valued with the deployment name.
pub const DEPLOYMENT_TAG: &str = "dcpfleet-deployment";

/// `key:value` tag string for providers that only support flat string tags
pub fn flat_tag(key: &str, value: &str) -> String {
    format!("{key}:{value}")
}

/// Flat tag identifying the workers of `deployment`
pub fn deployment_tag(deployment: &str) -> String {
    flat_tag(DEPLOYMENT_TAG, deployment)
}

/// Config template / variable set selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Headless worker fleet driven by the DCP processing backend
    BackendAutomation,
    /// Operator-accessible machines for manual validation runs
    ManualTesting,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::BackendAutomation, Scenario::ManualTesting];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::BackendAutomation => "backend-automation",
            Scenario::ManualTesting => "manual-testing",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scenario {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "backend-automation" | "backend" => Ok(Scenario::BackendAutomation),
            "manual-testing" | "manual" => Ok(Scenario::ManualTesting),
            other => Err(CloudError::InvalidConfig(format!("unknown scenario: {other}"))),
        }
    }
}

/// Lifecycle state of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Draft,
    Deploying,
    Deployed,
    Failed,
    Destroying,
    Destroyed,
}

impl DeploymentStatus {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Draft, Deploying)
                | (Deployed, Deploying)
                | (Failed, Deploying)
                | (Deploying, Deployed)
                | (Deploying, Failed)
                | (Deployed, Destroying)
                | (Failed, Destroying)
                | (Destroying, Destroyed)
                | (Destroying, Deployed)
                | (Destroying, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == DeploymentStatus::Destroyed
    }

    /// Only observable while an operation holds the deployment lock.
    pub fn is_transient(self) -> bool {
        matches!(self, DeploymentStatus::Deploying | DeploymentStatus::Destroying)
    }

    /// Whether user edits of the deployment definition are accepted.
    pub fn is_editable(self) -> bool {
        matches!(self, DeploymentStatus::Draft | DeploymentStatus::Failed)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentStatus::Draft => "draft",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Destroying => "destroying",
            DeploymentStatus::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

impl FromStr for DeploymentStatus {
    type Err = CloudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "draft" => Ok(DeploymentStatus::Draft),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "deployed" => Ok(DeploymentStatus::Deployed),
            "failed" => Ok(DeploymentStatus::Failed),
            "destroying" => Ok(DeploymentStatus::Destroying),
            "destroyed" => Ok(DeploymentStatus::Destroyed),
            other => Err(CloudError::InvalidConfig(format!("unknown status: {other}"))),
        }
    }
}

/// Rejected lifecycle edge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid transition {from} -> {to}")]
pub struct TransitionError {
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
}

/// State of a single worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Provisioning,
    Running,
    Unhealthy,
    Terminating,
    Terminated,
}

impl WorkerState {
    /// Counts towards the fleet size.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            WorkerState::Provisioning | WorkerState::Running | WorkerState::Unhealthy
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerState::Provisioning => "provisioning",
            WorkerState::Running => "running",
            WorkerState::Unhealthy => "unhealthy",
            WorkerState::Terminating => "terminating",
            WorkerState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Handle on a provisioned worker, owned by its deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerHandle {
    /// Vendor-assigned instance identifier
    pub provider_worker_id: String,

    pub state: WorkerState,

    pub created_at: DateTime<Utc>,

    pub last_seen_at: DateTime<Utc>,

    /// First time the worker was observed unhealthy in its current streak
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_since: Option<DateTime<Utc>>,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>, state: WorkerState, created_at: DateTime<Utc>) -> Self {
        Self {
            provider_worker_id: id.into(),
            state,
            created_at,
            last_seen_at: created_at,
            unhealthy_since: (state == WorkerState::Unhealthy).then_some(created_at),
        }
    }

    /// Record a polled state.
    ///
    /// The provider's report wins: a worker marked `Terminating` that is
    /// still reported active counts towards the fleet again, so the next
    /// plan re-issues its termination.
    pub fn observe(&mut self, state: WorkerState, at: DateTime<Utc>) {
        self.last_seen_at = at;
        if state == WorkerState::Unhealthy {
            self.unhealthy_since.get_or_insert(at);
        } else {
            self.unhealthy_since = None;
        }
        self.state = state;
    }

    pub fn unhealthy_for(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.unhealthy_since.map(|since| now - since)
    }
}

/// Worker state as reported by a provider poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub provider_worker_id: String,
    pub state: WorkerState,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkerStatus {
    pub fn new(id: impl Into<String>, state: WorkerState) -> Self {
        Self {
            provider_worker_id: id.into(),
            state,
            created_at: None,
        }
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

fn default_instance_count() -> u32 {
    1
}

/// User-supplied definition of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    pub name: String,

    pub scenario: Scenario,

    pub provider: String,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default = "default_instance_count")]
    pub instance_count: u32,

    /// Provider/scenario-specific parameters (plan, image, network, ...)
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,

    /// Attribution/billing tags applied to provisioned resources
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl DeploymentSpec {
    pub fn new(name: impl Into<String>, scenario: Scenario, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scenario,
            provider: provider.into(),
            region: None,
            instance_count: default_instance_count(),
            variables: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_instance_count(mut self, count: u32) -> Self {
        self.instance_count = count;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// String variable, trimmed; empty strings count as absent.
    pub fn variable_str(&self, key: &str) -> Option<&str> {
        self.variables
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn has_variable(&self, key: &str) -> bool {
        match self.variables.get(key) {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::String(s)) => !s.trim().is_empty(),
            Some(serde_json::Value::Array(a)) => !a.is_empty(),
            Some(_) => true,
        }
    }
}

/// Recorded lifecycle edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: DeploymentStatus,
    pub to: DeploymentStatus,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Persisted deployment: definition plus lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(flatten)]
    pub spec: DeploymentSpec,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub workers: Vec<WorkerHandle>,

    /// Human-readable summary of the last failure
    #[serde(default)]
    pub last_error: Option<String>,

    /// Workers missing after the last apply
    #[serde(default)]
    pub shortfall: u32,

    #[serde(default)]
    pub history: Vec<StatusTransition>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl DeploymentConfig {
    pub fn from_spec(spec: DeploymentSpec) -> Self {
        let now = Utc::now();
        Self {
            spec,
            status: DeploymentStatus::Draft,
            workers: Vec::new(),
            last_error: None,
            shortfall: 0,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Move along a lifecycle edge, recording it in the history.
    pub fn transition(
        &mut self,
        to: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        self.history.push(StatusTransition {
            from: self.status,
            to,
            at: now,
            reason,
        });
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn active_workers(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.iter().filter(|w| w.state.is_active())
    }

    pub fn active_count(&self) -> u32 {
        self.active_workers().count() as u32
    }

    /// Non-terminated workers, including those being torn down.
    pub fn live_worker_ids(&self) -> Vec<String> {
        self.workers
            .iter()
            .filter(|w| w.state != WorkerState::Terminated)
            .map(|w| w.provider_worker_id.clone())
            .collect()
    }

    /// Add freshly provisioned handles, replacing any with the same id.
    pub fn record_workers(&mut self, handles: impl IntoIterator<Item = WorkerHandle>) {
        for handle in handles {
            match self
                .workers
                .iter_mut()
                .find(|w| w.provider_worker_id == handle.provider_worker_id)
            {
                Some(existing) => *existing = handle,
                None => self.workers.push(handle),
            }
        }
        self.updated_at = Utc::now();
    }

    /// Fold a provider poll into the worker handles.
    ///
    /// Handles already terminated are dropped, handles the provider no longer
    /// reports become `Terminated`, and unknown workers carrying this
    /// deployment's tag are adopted.
    pub fn merge_observed(&mut self, observed: &[WorkerStatus], now: DateTime<Utc>) {
        self.workers.retain(|w| w.state != WorkerState::Terminated);

        let by_id: HashMap<&str, &WorkerStatus> = observed
            .iter()
            .map(|s| (s.provider_worker_id.as_str(), s))
            .collect();

        for handle in &mut self.workers {
            match by_id.get(handle.provider_worker_id.as_str()) {
                Some(status) => handle.observe(status.state, now),
                None => {
                    handle.state = WorkerState::Terminated;
                    handle.unhealthy_since = None;
                }
            }
        }

        for status in observed {
            let known = self
                .workers
                .iter()
                .any(|w| w.provider_worker_id == status.provider_worker_id);
            if !known && status.state != WorkerState::Terminated {
                let mut handle = WorkerHandle::new(
                    status.provider_worker_id.clone(),
                    status.state,
                    status.created_at.unwrap_or(now),
                );
                handle.last_seen_at = now;
                self.workers.push(handle);
            }
        }

        self.updated_at = now;
    }

    pub fn mark_terminating(&mut self, ids: &[String]) {
        for handle in &mut self.workers {
            if ids.contains(&handle.provider_worker_id) {
                handle.state = WorkerState::Terminating;
            }
        }
        self.updated_at = Utc::now();
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
