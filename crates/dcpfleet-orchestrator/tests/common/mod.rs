#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dcpfleet_cloud::{
    AuthStatus, CloudError, CloudProvider, DeploymentSpec, InstanceType, PriceTable,
    ProviderDescriptor, ProviderRegistry, ProvisionRequest, ProvisionResult, Region, Scenario,
    ValidationIssue, WorkerHandle, WorkerState, WorkerStatus,
};
use dcpfleet_orchestrator::{
    DeploymentRepository, MemoryRepository, Orchestrator, OrchestratorConfig,
};
use dcpfleet_tofu::{ConfigGenerator, MemoryWorkspace};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const DEPLOYMENT: &str = "fest-2025-enc";

pub fn created_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 10, 9, 0, 0).unwrap()
}

/// Encoder fleet on the fake vultr provider
pub fn encoder_spec(count: u32) -> DeploymentSpec {
    DeploymentSpec::new(DEPLOYMENT, Scenario::BackendAutomation, "vultr")
        .with_region("nrt")
        .with_instance_count(count)
        .with_variable("plan", json!("vc2-1c-1gb"))
        .with_variable("worker_image", json!("ghcr.io/dcp/encoder:1.4"))
}

#[derive(Default)]
struct FakeState {
    /// id → (deployment, status)
    workers: BTreeMap<String, (String, WorkerStatus)>,
    next_id: u32,
    deploy_calls: Vec<u32>,
    terminate_calls: Vec<Vec<String>>,
    create_limit: Option<u32>,
    deploy_error: Option<String>,
    deploy_delay: Option<Duration>,
    ignore_terminate: bool,
    partial_terminations: u32,
}

/// In-process provider registered as "vultr"
#[derive(Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    /// Create at most `n` workers per deploy call; the rest fail with a quota error.
    pub fn limit_creates(&self, n: u32) {
        self.state().create_limit = Some(n);
    }

    pub fn clear_limit(&self) {
        self.state().create_limit = None;
    }

    pub fn fail_deploys(&self, message: &str) {
        self.state().deploy_error = Some(message.to_string());
    }

    pub fn slow_deploys(&self, delay: Duration) {
        self.state().deploy_delay = Some(delay);
    }

    /// Accept terminations without removing anything.
    pub fn ignore_terminations(&self) {
        self.state().ignore_terminate = true;
    }

    pub fn accept_terminations(&self) {
        self.state().ignore_terminate = false;
    }

    /// The next `calls` termination requests drop their last id and report
    /// `Ok(false)`.
    pub fn partial_terminations(&self, calls: u32) {
        self.state().partial_terminations = calls;
    }

    pub fn deploy_calls(&self) -> Vec<u32> {
        self.state().deploy_calls.clone()
    }

    pub fn terminate_calls(&self) -> Vec<Vec<String>> {
        self.state().terminate_calls.clone()
    }

    pub fn worker_ids(&self, deployment: &str) -> Vec<String> {
        self.state()
            .workers
            .iter()
            .filter(|(_, (d, _))| d == deployment)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Worker disappears without the orchestrator's involvement.
    pub fn lose_worker(&self, id: &str) {
        self.state().workers.remove(id);
    }

    pub fn set_state(&self, id: &str, state: WorkerState) {
        if let Some((_, status)) = self.state().workers.get_mut(id) {
            status.state = state;
        }
    }

    /// Worker created outside of any orchestrator call
    pub fn adopt(&self, deployment: &str, id: &str) {
        self.state().workers.insert(
            id.to_string(),
            (
                deployment.to_string(),
                WorkerStatus::new(id, WorkerState::Running).with_created_at(created_at()),
            ),
        );
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    fn name(&self) -> &str {
        "vultr"
    }

    fn display_name(&self) -> &str {
        "Fake Vultr"
    }

    fn descriptor(&self) -> ProviderDescriptor {
        let small = InstanceType {
            id: "vc2-1c-1gb".into(),
            vcpus: 1,
            memory_mb: 1024,
            disk_gb: 25,
            hourly_cost: 0.007,
            regions: vec![],
        };
        ProviderDescriptor {
            name: "vultr".into(),
            display_name: "Fake Vultr".into(),
            scenarios: vec![Scenario::BackendAutomation, Scenario::ManualTesting],
            base_pricing: PriceTable::from_instance_types("USD", std::slice::from_ref(&small)),
            instance_types: vec![small],
            regions: vec![Region::new("nrt", "Tokyo", "JP")],
        }
    }

    async fn check_auth(&self) -> dcpfleet_cloud::Result<AuthStatus> {
        Ok(AuthStatus::ok("fake@example.com"))
    }

    async fn deploy_workers(
        &self,
        request: &ProvisionRequest,
    ) -> dcpfleet_cloud::Result<ProvisionResult> {
        let (delay, error) = {
            let mut state = self.state();
            state.deploy_calls.push(request.count);
            (state.deploy_delay, state.deploy_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(CloudError::ApiError(message));
        }

        let mut state = self.state();
        let mut result = ProvisionResult::new();
        for offset in 0..request.count {
            if state.create_limit.is_some_and(|limit| offset >= limit) {
                result.add_failure(offset, "quota exceeded");
                continue;
            }
            state.next_id += 1;
            let id = format!("vultr-{:04}", state.next_id);
            state.workers.insert(
                id.clone(),
                (
                    request.deployment.clone(),
                    WorkerStatus::new(&id, WorkerState::Running).with_created_at(created_at()),
                ),
            );
            result.add_worker(WorkerHandle::new(id, WorkerState::Running, created_at()));
        }
        Ok(result)
    }

    async fn get_worker_status(&self, deployment: &str) -> dcpfleet_cloud::Result<Vec<WorkerStatus>> {
        Ok(self
            .state()
            .workers
            .values()
            .filter(|(d, _)| d == deployment)
            .map(|(_, status)| status.clone())
            .collect())
    }

    async fn terminate_workers(&self, worker_ids: &[String]) -> dcpfleet_cloud::Result<bool> {
        let mut state = self.state();
        state.terminate_calls.push(worker_ids.to_vec());
        let partial = state.partial_terminations > 0;
        let applied = if partial {
            state.partial_terminations -= 1;
            &worker_ids[..worker_ids.len().saturating_sub(1)]
        } else {
            worker_ids
        };
        if !state.ignore_terminate {
            for id in applied {
                state.workers.remove(id);
            }
        }
        Ok(!partial)
    }

    async fn pricing(&self) -> dcpfleet_cloud::Result<PriceTable> {
        Ok(self.descriptor().base_pricing)
    }

    async fn check_availability(&self, region: &str) -> dcpfleet_cloud::Result<bool> {
        Ok(self.descriptor().has_region(region))
    }

    async fn available_instance_types(&self) -> dcpfleet_cloud::Result<Vec<InstanceType>> {
        Ok(self.descriptor().instance_types)
    }

    async fn available_regions(&self) -> dcpfleet_cloud::Result<Vec<Region>> {
        Ok(self.descriptor().regions)
    }

    async fn calculate_cost(&self, spec: &DeploymentSpec) -> dcpfleet_cloud::Result<f64> {
        let plan = spec.variable_str("plan").unwrap_or("vc2-1c-1gb");
        self.descriptor()
            .base_pricing
            .monthly_estimate(plan, spec.instance_count)
            .ok_or_else(|| CloudError::InvalidConfig(format!("unknown plan {plan}")))
    }

    async fn validate_config(
        &self,
        spec: &DeploymentSpec,
    ) -> dcpfleet_cloud::Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        match spec.region.as_deref() {
            Some(region) if self.descriptor().has_region(region) => {}
            Some(region) => issues.push(ValidationIssue::new(
                "region",
                format!("unknown region {region}"),
            )),
            None => issues.push(ValidationIssue::new("region", "region is required")),
        }
        Ok(issues)
    }
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        lock_wait: Duration::ZERO,
        cancel_wait: Duration::from_secs(5),
        apply_timeout: Duration::from_secs(5),
        unhealthy_grace: Duration::from_secs(300),
        destroy_confirm_attempts: 2,
        destroy_confirm_delay: Duration::from_millis(10),
    }
}

pub struct Harness {
    pub provider: Arc<FakeProvider>,
    pub repository: Arc<MemoryRepository>,
    pub workspace: Arc<MemoryWorkspace>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: OrchestratorConfig) -> Self {
        let provider = FakeProvider::new();
        let repository = Arc::new(MemoryRepository::new());
        let workspace = Arc::new(MemoryWorkspace::new());
        let orchestrator = build_orchestrator(
            Arc::clone(&provider),
            Arc::clone(&repository) as Arc<dyn DeploymentRepository>,
            Arc::clone(&workspace) as _,
            config,
        );
        Self {
            provider,
            repository,
            workspace,
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn build_orchestrator(
    provider: Arc<FakeProvider>,
    repository: Arc<dyn DeploymentRepository>,
    workspace: Arc<dyn dcpfleet_tofu::Workspace>,
    config: OrchestratorConfig,
) -> Orchestrator {
    let registry = ProviderRegistry::new().with_provider(provider);
    Orchestrator::new(
        Arc::new(registry),
        repository,
        workspace,
        Arc::new(ConfigGenerator::builtin().unwrap()),
    )
    .with_config(config)
}
