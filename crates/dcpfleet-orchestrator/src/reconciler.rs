//! Background fleet reconciliation
//!
//! Keeps every `Deployed` deployment at its target size: unhealthy workers
//! past the grace period are replaced, surplus workers are terminated and
//! missing workers are provisioned. The workspace is never read; the
//! document is re-rendered in memory for each pass that needs to provision.
//! A pass gives way to `destroy()`: its provisioning stops when the lock's
//! cancellation token fires.

use crate::error::{OrchestratorError, Result};
use crate::lock::DeploymentLocks;
use crate::orchestrator::execute_plan;
use crate::plan::{FleetPlan, PlanSummary};
use crate::repository::DeploymentRepository;
use chrono::Utc;
use dcpfleet_cloud::{DeploymentStatus, ProviderRegistry};
use dcpfleet_tofu::ConfigGenerator;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of reconciling one deployment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub deployment: String,

    /// Lock held elsewhere or deployment not `Deployed`
    pub skipped: bool,

    pub plan: Option<PlanSummary>,

    pub provisioned: u32,

    pub terminated: Vec<String>,

    pub error: Option<String>,
}

impl ReconcileReport {
    fn skipped(deployment: &str) -> Self {
        Self {
            deployment: deployment.to_string(),
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.skipped || (self.provisioned == 0 && self.terminated.is_empty())
    }
}

#[derive(Clone)]
pub struct FleetReconciler {
    registry: Arc<ProviderRegistry>,
    repository: Arc<dyn DeploymentRepository>,
    generator: Arc<ConfigGenerator>,
    locks: Arc<DeploymentLocks>,
    unhealthy_grace: Duration,
}

impl FleetReconciler {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        repository: Arc<dyn DeploymentRepository>,
        generator: Arc<ConfigGenerator>,
        locks: Arc<DeploymentLocks>,
    ) -> Self {
        Self {
            registry,
            repository,
            generator,
            locks,
            unhealthy_grace: Duration::from_secs(300),
        }
    }

    pub fn with_unhealthy_grace(mut self, grace: Duration) -> Self {
        self.unhealthy_grace = grace;
        self
    }

    /// One pass over a single deployment.
    pub async fn reconcile_once(&self, name: &str) -> Result<ReconcileReport> {
        let Some(guard) = self.locks.try_acquire(name) else {
            debug!(deployment = %name, "Skipping reconcile, deployment is busy");
            return Ok(ReconcileReport::skipped(name));
        };

        let mut config = self
            .repository
            .load(name)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(name.to_string()))?;
        if config.status != DeploymentStatus::Deployed {
            return Ok(ReconcileReport::skipped(name));
        }

        let provider = self
            .registry
            .resolve(&config.spec.provider)
            .map_err(|_| OrchestratorError::UnknownProvider(config.spec.provider.clone()))?;

        let mut report = ReconcileReport {
            deployment: name.to_string(),
            ..ReconcileReport::default()
        };

        let observed = match provider.get_worker_status(name).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(deployment = %name, error = %e, "Worker poll failed");
                report.error = Some(e.to_string());
                return Ok(report);
            }
        };
        config.merge_observed(&observed, Utc::now());

        let plan = FleetPlan::compute(&config, Utc::now(), self.unhealthy_grace);
        report.plan = Some(plan.summary());
        if plan.is_noop() {
            config.shortfall = 0;
            self.repository.save(&config).await?;
            return Ok(report);
        }
        info!(deployment = %name, plan = %plan.summary(), "Reconciling fleet");

        let document = if plan.provision_count() > 0 {
            Some(self.generator.render(&config.spec)?)
        } else {
            None
        };

        let before = config.workers.len();
        let result = tokio::select! {
            biased;
            _ = guard.token().cancelled() => Err("cancelled during reconcile".to_string()),
            result = execute_plan(&mut config, provider.as_ref(), document.as_ref(), &plan) => result,
        };

        report.terminated = plan.terminations();
        report.provisioned = config.workers.len().saturating_sub(before) as u32;
        match result {
            Ok(()) => {
                config.last_error = None;
                config.shortfall = 0;
            }
            Err(message) => {
                warn!(deployment = %name, error = %message, "Reconcile came up short");
                config.shortfall = config
                    .spec
                    .instance_count
                    .saturating_sub(config.active_count());
                config.last_error = Some(message.clone());
                report.error = Some(message);
            }
        }
        self.repository.save(&config).await?;
        Ok(report)
    }

    /// One pass over every `Deployed` deployment, in parallel.
    pub async fn reconcile_all(&self) -> Result<Vec<ReconcileReport>> {
        let deployed = self
            .repository
            .list_by_status(DeploymentStatus::Deployed)
            .await?;

        let passes = deployed.iter().map(|config| async move {
            let name = config.name();
            match self.reconcile_once(name).await {
                Ok(report) => report,
                Err(e) => {
                    warn!(deployment = %name, error = %e, "Reconcile failed");
                    ReconcileReport {
                        deployment: name.to_string(),
                        error: Some(e.to_string()),
                        ..ReconcileReport::default()
                    }
                }
            }
        });
        Ok(join_all(passes).await)
    }

    /// Reconcile on every tick until `shutdown` becomes `true`.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Fleet reconciler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile_all().await {
                        Ok(reports) => {
                            let changed = reports.iter().filter(|r| !r.is_noop()).count();
                            debug!(deployments = reports.len(), changed, "Reconcile pass finished");
                        }
                        Err(e) => warn!(error = %e, "Reconcile pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Fleet reconciler stopped");
    }
}
