//! Deployment lifecycle service
//!
//! Drives a deployment through `Draft → Deploying → Deployed/Failed →
//! Destroying → Destroyed`. Every operation on a name runs under that
//! name's [`DeploymentLocks`] entry; provider failures during an apply are
//! recorded on the deployment rather than returned as errors.

use crate::error::{OrchestratorError, Result};
use crate::lock::{DeploymentGuard, DeploymentLocks};
use crate::plan::{FleetPlan, PlanSummary};
use crate::reconciler::FleetReconciler;
use crate::repository::DeploymentRepository;
use chrono::Utc;
use dcpfleet_cloud::{
    CloudProvider, DeploymentConfig, DeploymentSpec, DeploymentStatus, InfraDocument,
    ProviderDescriptor, ProviderRegistry, ProvisionRequest, ValidationIssue, WorkerHandle,
    WorkerState,
};
use dcpfleet_tofu::{ConfigGenerator, Workspace};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9._-]{0,62}$").expect("valid name pattern"));

/// Timing knobs for lifecycle operations
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long an operation waits for a busy deployment (zero = fail fast)
    pub lock_wait: Duration,

    /// How long `destroy()` waits for a cancelled deploy to let go
    pub cancel_wait: Duration,

    /// Deadline for one provisioning call
    pub apply_timeout: Duration,

    pub unhealthy_grace: Duration,

    /// Polls after termination until the provider reports no workers
    pub destroy_confirm_attempts: u32,

    pub destroy_confirm_delay: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_wait: Duration::ZERO,
            cancel_wait: Duration::from_secs(30),
            apply_timeout: Duration::from_secs(1800),
            unhealthy_grace: Duration::from_secs(300),
            destroy_confirm_attempts: 5,
            destroy_confirm_delay: Duration::from_secs(2),
        }
    }
}

/// Result of `deploy()`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployOutcome {
    pub deployment: String,
    pub status: DeploymentStatus,
    pub workers: Vec<WorkerHandle>,
    pub shortfall: u32,
    pub error: Option<String>,
    pub plan: Option<PlanSummary>,
}

impl DeployOutcome {
    fn from_config(config: &DeploymentConfig, plan: Option<PlanSummary>) -> Self {
        Self {
            deployment: config.name().to_string(),
            status: config.status,
            workers: config.active_workers().cloned().collect(),
            shortfall: config.shortfall,
            error: config.last_error.clone(),
            plan,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Deployed
    }
}

/// Why an apply stopped early
enum ApplyAbort {
    Cancelled(&'static str),
    Failed(String),
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn DeploymentRepository>,
    workspace: Arc<dyn Workspace>,
    generator: Arc<ConfigGenerator>,
    locks: Arc<DeploymentLocks>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        repository: Arc<dyn DeploymentRepository>,
        workspace: Arc<dyn Workspace>,
        generator: Arc<ConfigGenerator>,
    ) -> Self {
        Self {
            registry,
            repository,
            workspace,
            generator,
            locks: Arc::new(DeploymentLocks::new()),
            config: OrchestratorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn locks(&self) -> &Arc<DeploymentLocks> {
        &self.locks
    }

    /// Reconciler sharing this orchestrator's registry, store and locks
    pub fn reconciler(&self) -> FleetReconciler {
        FleetReconciler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.repository),
            Arc::clone(&self.generator),
            Arc::clone(&self.locks),
        )
        .with_unhealthy_grace(self.config.unhealthy_grace)
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn CloudProvider>> {
        self.registry
            .resolve(name)
            .map_err(|_| OrchestratorError::UnknownProvider(name.to_string()))
    }

    async fn lock(&self, name: &str) -> Result<DeploymentGuard> {
        self.locks
            .acquire(name, self.config.lock_wait)
            .await
            .ok_or_else(|| OrchestratorError::DeploymentBusy(name.to_string()))
    }

    async fn load(&self, name: &str) -> Result<DeploymentConfig> {
        self.repository
            .load(name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))
    }

    /// Load for a mutating operation.
    ///
    /// Holding the lock means nothing in this process is mid-operation, so a
    /// `Deploying`/`Destroying` status was left behind by an interrupted run
    /// and is resolved to `Failed`.
    async fn load_for_change(&self, name: &str) -> Result<DeploymentConfig> {
        let mut config = self.load(name).await?;
        if config.status.is_transient() {
            let reason = format!("interrupted while {}", config.status);
            warn!(deployment = %name, status = %config.status, "Recovering interrupted deployment");
            config.last_error = Some(reason.clone());
            self.transition(&mut config, DeploymentStatus::Failed, Some(reason))
                .await?;
        }
        Ok(config)
    }

    /// Checks that need no provider I/O
    fn check_definition(&self, spec: &DeploymentSpec) -> Result<()> {
        let mut issues = Vec::new();
        if !NAME_PATTERN.is_match(&spec.name) {
            issues.push(ValidationIssue::new(
                "name",
                "must be 1-63 characters of a-z, 0-9, '.', '_' or '-' and start with a letter or digit",
            ));
        }
        if spec.instance_count == 0 {
            issues.push(ValidationIssue::new(
                "instance_count",
                "instance_count must be at least 1",
            ));
        }
        if !issues.is_empty() {
            return Err(OrchestratorError::Validation {
                deployment: spec.name.clone(),
                issues,
            });
        }

        self.provider(&spec.provider)?;
        if self
            .generator
            .templates()
            .get(&spec.provider, spec.scenario)
            .is_none()
        {
            return Err(OrchestratorError::Template(format!(
                "no template for provider '{}' and scenario '{}'",
                spec.provider, spec.scenario
            )));
        }
        Ok(())
    }

    pub async fn create_deployment(&self, spec: DeploymentSpec) -> Result<DeploymentConfig> {
        self.check_definition(&spec)?;
        let _guard = self.lock(&spec.name).await?;

        if self.repository.exists(&spec.name).await? {
            return Err(OrchestratorError::AlreadyExists(spec.name));
        }

        let config = DeploymentConfig::from_spec(spec);
        self.repository.save(&config).await?;
        info!(
            deployment = %config.name(),
            provider = %config.spec.provider,
            scenario = %config.spec.scenario,
            count = config.spec.instance_count,
            "Created deployment"
        );
        Ok(config)
    }

    /// Replace the definition of a `Draft` or `Failed` deployment.
    pub async fn update_deployment(&self, spec: DeploymentSpec) -> Result<DeploymentConfig> {
        self.check_definition(&spec)?;
        let _guard = self.lock(&spec.name).await?;
        let mut config = self.load_for_change(&spec.name).await?;

        match config.status {
            DeploymentStatus::Destroyed => {
                return Err(OrchestratorError::TerminalState(spec.name));
            }
            status if !status.is_editable() => {
                return Err(OrchestratorError::InvalidTransition {
                    deployment: spec.name,
                    status,
                    operation: "update",
                });
            }
            _ => {}
        }

        config.spec = spec;
        config.updated_at = Utc::now();
        self.repository.save(&config).await?;
        info!(deployment = %config.name(), "Updated deployment");
        Ok(config)
    }

    /// Change the target fleet size. Deployed fleets converge on the next
    /// reconciliation pass or deploy.
    pub async fn scale(&self, name: &str, instance_count: u32) -> Result<DeploymentConfig> {
        if instance_count == 0 {
            return Err(OrchestratorError::Validation {
                deployment: name.to_string(),
                issues: vec![ValidationIssue::new(
                    "instance_count",
                    "instance_count must be at least 1",
                )],
            });
        }

        let _guard = self.lock(name).await?;
        let mut config = self.load_for_change(name).await?;
        match config.status {
            DeploymentStatus::Destroyed => {
                return Err(OrchestratorError::TerminalState(name.to_string()));
            }
            DeploymentStatus::Draft | DeploymentStatus::Failed | DeploymentStatus::Deployed => {}
            status => {
                return Err(OrchestratorError::InvalidTransition {
                    deployment: name.to_string(),
                    status,
                    operation: "scale",
                });
            }
        }

        let previous = config.spec.instance_count;
        config.spec.instance_count = instance_count;
        config.updated_at = Utc::now();
        self.repository.save(&config).await?;
        info!(
            deployment = %name,
            from = previous,
            to = instance_count,
            "Scaled deployment"
        );
        Ok(config)
    }

    pub async fn deploy(&self, name: &str) -> Result<DeployOutcome> {
        let guard = self.lock(name).await?;
        let mut config = self.load_for_change(name).await?;

        match config.status {
            DeploymentStatus::Destroyed => {
                return Err(OrchestratorError::TerminalState(name.to_string()));
            }
            status if !status.can_transition_to(DeploymentStatus::Deploying) => {
                return Err(OrchestratorError::InvalidTransition {
                    deployment: name.to_string(),
                    status,
                    operation: "deploy",
                });
            }
            _ => {}
        }

        let provider = self.provider(&config.spec.provider)?;
        let issues = provider.validate_config(&config.spec).await?;
        if !issues.is_empty() {
            return Err(OrchestratorError::Validation {
                deployment: name.to_string(),
                issues,
            });
        }
        let document = self.generator.render(&config.spec)?;

        self.transition(&mut config, DeploymentStatus::Deploying, None)
            .await?;
        info!(deployment = %name, provider = %provider.name(), "Deploying");

        let applied = self
            .apply(&mut config, provider.as_ref(), &document, guard.token())
            .await;
        let (status, plan) = match applied {
            Ok(plan) => (DeploymentStatus::Deployed, Some(plan.summary())),
            Err(abort) => {
                config.last_error = Some(match abort {
                    ApplyAbort::Cancelled(stage) => format!("cancelled {stage}"),
                    ApplyAbort::Failed(message) => message,
                });
                config.shortfall = config
                    .spec
                    .instance_count
                    .saturating_sub(config.active_count());
                (DeploymentStatus::Failed, None)
            }
        };
        let reason = config.last_error.clone();
        self.transition(&mut config, status, reason).await?;

        if status == DeploymentStatus::Deployed {
            info!(
                deployment = %name,
                workers = config.active_count(),
                "Deployment is up"
            );
        } else {
            warn!(
                deployment = %name,
                shortfall = config.shortfall,
                error = config.last_error.as_deref().unwrap_or_default(),
                "Deployment failed"
            );
        }
        Ok(DeployOutcome::from_config(&config, plan))
    }

    /// Generate, observe and converge. Leaves `config` holding every handle
    /// that was created, even when aborting.
    async fn apply(
        &self,
        config: &mut DeploymentConfig,
        provider: &dyn CloudProvider,
        document: &InfraDocument,
        token: &CancellationToken,
    ) -> std::result::Result<FleetPlan, ApplyAbort> {
        config.last_error = None;
        config.shortfall = 0;

        if token.is_cancelled() {
            return Err(ApplyAbort::Cancelled("before generating"));
        }
        self.workspace
            .write_atomic(config.name(), document.as_bytes())
            .await
            .map_err(|e| ApplyAbort::Failed(e.to_string()))?;

        if token.is_cancelled() {
            return Err(ApplyAbort::Cancelled("before apply"));
        }
        let observed = provider
            .get_worker_status(config.name())
            .await
            .map_err(|e| ApplyAbort::Failed(e.to_string()))?;
        config.merge_observed(&observed, Utc::now());

        let plan = FleetPlan::compute(config, Utc::now(), self.config.unhealthy_grace);
        debug!(deployment = %config.name(), plan = %plan.summary(), "Planned fleet");

        let converge = execute_plan(config, provider, Some(document), &plan);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(ApplyAbort::Cancelled("during apply")),
            result = tokio::time::timeout(self.config.apply_timeout, converge) => match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(message)) => Err(ApplyAbort::Failed(message)),
                Err(_) => Err(ApplyAbort::Failed(format!(
                    "timed out after {}s",
                    self.config.apply_timeout.as_secs()
                ))),
            },
        };
        result?;

        if token.is_cancelled() {
            return Err(ApplyAbort::Cancelled("after apply"));
        }
        Ok(plan)
    }

    async fn transition(
        &self,
        config: &mut DeploymentConfig,
        to: DeploymentStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let from = config.status;
        config
            .transition(to, reason)
            .map_err(|e| OrchestratorError::InvalidTransition {
                deployment: config.name().to_string(),
                status: e.from,
                operation: "transition",
            })?;
        self.repository.save(config).await?;
        debug!(deployment = %config.name(), %from, %to, "Status changed");
        Ok(())
    }

    /// Tear down every worker of a `Deployed` or `Failed` deployment.
    ///
    /// An in-flight deploy on the same name is cancelled first.
    pub async fn destroy(&self, name: &str) -> Result<DeploymentConfig> {
        let _guard = match self.locks.try_acquire(name) {
            Some(guard) => guard,
            None => {
                if self.locks.cancel(name) {
                    info!(deployment = %name, "Cancelling in-flight operation for destroy");
                }
                self.locks
                    .acquire(name, self.config.cancel_wait.max(self.config.lock_wait))
                    .await
                    .ok_or_else(|| OrchestratorError::DeploymentBusy(name.to_string()))?
            }
        };

        let mut config = self.load_for_change(name).await?;
        let prior = config.status;
        match prior {
            DeploymentStatus::Destroyed => {
                return Err(OrchestratorError::TerminalState(name.to_string()));
            }
            DeploymentStatus::Deployed | DeploymentStatus::Failed => {}
            status => {
                return Err(OrchestratorError::InvalidTransition {
                    deployment: name.to_string(),
                    status,
                    operation: "destroy",
                });
            }
        }

        self.transition(&mut config, DeploymentStatus::Destroying, None)
            .await?;
        info!(deployment = %name, "Destroying");

        match self.teardown(&mut config).await {
            Ok(()) => {
                config.last_error = None;
                config.shortfall = 0;
                self.transition(&mut config, DeploymentStatus::Destroyed, None)
                    .await?;
                info!(deployment = %name, "Destroyed");
                Ok(config)
            }
            Err(message) => {
                config.last_error = Some(message.clone());
                self.transition(&mut config, prior, Some(format!("destroy failed: {message}")))
                    .await?;
                warn!(deployment = %name, error = %message, "Destroy failed");
                Err(OrchestratorError::Destroy {
                    deployment: name.to_string(),
                    message,
                })
            }
        }
    }

    async fn teardown(&self, config: &mut DeploymentConfig) -> std::result::Result<(), String> {
        let provider = self
            .provider(&config.spec.provider)
            .map_err(|e| e.to_string())?;

        let observed = provider
            .get_worker_status(config.name())
            .await
            .map_err(|e| e.to_string())?;
        config.merge_observed(&observed, Utc::now());

        let ids = config.live_worker_ids();
        if !ids.is_empty() {
            info!(deployment = %config.name(), count = ids.len(), "Terminating workers");
            let accepted = provider
                .terminate_workers(&ids)
                .await
                .map_err(|e| e.to_string())?;
            if !accepted {
                warn!(deployment = %config.name(), "Provider accepted only part of the termination");
            }
            config.mark_terminating(&ids);
        }

        let attempts = self.config.destroy_confirm_attempts.max(1);
        let mut remaining = Vec::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.destroy_confirm_delay).await;
            }
            let observed = provider
                .get_worker_status(config.name())
                .await
                .map_err(|e| e.to_string())?;
            config.merge_observed(&observed, Utc::now());
            remaining = observed
                .iter()
                .filter(|s| s.state != WorkerState::Terminated)
                .map(|s| s.provider_worker_id.clone())
                .collect();
            if remaining.is_empty() {
                break;
            }

            // Still reported active: the termination was dropped, ask again
            let stalled: Vec<String> = observed
                .iter()
                .filter(|s| s.state.is_active())
                .map(|s| s.provider_worker_id.clone())
                .collect();
            if !stalled.is_empty() && attempt < attempts {
                debug!(deployment = %config.name(), count = stalled.len(), "Re-issuing termination");
                provider
                    .terminate_workers(&stalled)
                    .await
                    .map_err(|e| e.to_string())?;
                config.mark_terminating(&stalled);
            }
        }
        if !remaining.is_empty() {
            return Err(format!(
                "{} worker(s) still present: {}",
                remaining.len(),
                remaining.join(", ")
            ));
        }

        for handle in &mut config.workers {
            handle.state = WorkerState::Terminated;
        }
        self.workspace
            .remove(config.name())
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub async fn get_status(&self, name: &str) -> Result<DeploymentConfig> {
        self.load(name).await
    }

    pub async fn list_deployments(
        &self,
        status: Option<DeploymentStatus>,
    ) -> Result<Vec<DeploymentConfig>> {
        Ok(match status {
            Some(status) => self.repository.list_by_status(status).await?,
            None => self.repository.list_all().await?,
        })
    }

    /// Monthly cost of a definition; nothing is persisted.
    pub async fn estimate_cost(&self, spec: &DeploymentSpec) -> Result<f64> {
        let provider = self.provider(&spec.provider)?;
        Ok(provider.calculate_cost(spec).await?)
    }

    pub fn list_providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.descriptors()
    }

    /// Render and persist the document of a stored deployment.
    pub async fn generate(&self, name: &str) -> Result<InfraDocument> {
        let _guard = self.lock(name).await?;
        let config = self.load(name).await?;
        if config.status == DeploymentStatus::Destroyed {
            return Err(OrchestratorError::TerminalState(name.to_string()));
        }
        Ok(self
            .generator
            .generate(&config.spec, self.workspace.as_ref())
            .await?)
    }

    pub async fn test_connection(&self, provider: &str) -> Result<bool> {
        Ok(self.provider(provider)?.test_connection().await?)
    }
}

/// Run the plan's terminations, then its provisioning.
///
/// Returns a failure message when any step came up short; handles that were
/// created are recorded either way. `document` is only needed when the plan
/// provisions.
pub(crate) async fn execute_plan(
    config: &mut DeploymentConfig,
    provider: &dyn CloudProvider,
    document: Option<&InfraDocument>,
    plan: &FleetPlan,
) -> std::result::Result<(), String> {
    let terminations = plan.terminations();
    if !terminations.is_empty() {
        let accepted = provider
            .terminate_workers(&terminations)
            .await
            .map_err(|e| e.to_string())?;
        config.mark_terminating(&terminations);
        if !accepted {
            warn!(
                deployment = %config.name(),
                count = terminations.len(),
                "Provider accepted only part of the termination"
            );
        }
    }

    let count = plan.provision_count();
    if count == 0 {
        return Ok(());
    }
    let Some(document) = document else {
        return Err(format!("no document to provision {count} worker(s) from"));
    };

    let request = ProvisionRequest::new(document.clone(), count)
        .with_first_index(config.workers.len() as u32);
    let result = provider
        .deploy_workers(&request)
        .await
        .map_err(|e| e.to_string())?;
    let created = result.workers.len();
    config.record_workers(result.workers.clone());

    let shortfall = result.shortfall(count);
    config.shortfall = shortfall;
    info!(
        deployment = %config.name(),
        requested = count,
        created,
        duration_ms = result.duration_ms,
        "Provisioned workers"
    );
    if shortfall > 0 {
        let message = result
            .error_summary()
            .unwrap_or_else(|| format!("provider created {created} of {count} workers"));
        config.last_error = Some(message.clone());
        return Err(message);
    }
    Ok(())
}
