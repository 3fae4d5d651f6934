//! Vultr provider implementation

use crate::api::{CreateInstanceRequest, Instance, VultrClient, VultrCredentials, encode_user_data};
use crate::error::VultrError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dcpfleet_cloud::{
    AuthStatus, Cached, CloudError, CloudProvider, DeploymentSpec, InstanceType, PriceTable,
    ProviderDescriptor, ProvisionRequest, ProvisionResult, Region, RetryConfig, Scenario,
    ValidationIssue, WorkerHandle, WorkerState, WorkerStatus, deployment_tag,
};
use serde::Deserialize;
use std::time::{Duration, Instant};

pub const PROVIDER_NAME: &str = "vultr";

/// Default lifetime of cached plan pricing
pub const DEFAULT_PRICING_TTL: Duration = Duration::from_secs(3600);

/// Resource in the generated document that describes one worker
const WORKER_RESOURCE: (&str, &str) = ("vultr_instance", "worker");

const COUNT_INDEX: &str = "${count.index}";

/// Vultr provider
pub struct VultrProvider {
    client: VultrClient,
    plans: Cached<Vec<InstanceType>>,
    regions: Cached<Vec<Region>>,
}

impl VultrProvider {
    pub fn new(credentials: VultrCredentials) -> Result<Self, VultrError> {
        Ok(Self {
            client: VultrClient::new(credentials)?,
            plans: Cached::new(DEFAULT_PRICING_TTL),
            regions: Cached::forever(),
        })
    }

    /// Create from `VULTR_API_KEY`
    pub fn from_env() -> Result<Self, VultrError> {
        Self::new(VultrCredentials::from_env(crate::api::VULTR_API_KEY_ENV)?)
    }

    pub fn with_pricing_ttl(mut self, ttl: Duration) -> Self {
        self.plans = Cached::new(ttl);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.client = self.client.with_retry(retry);
        self
    }

    pub fn client(&self) -> &VultrClient {
        &self.client
    }

    async fn plans(&self) -> Result<Vec<InstanceType>, VultrError> {
        self.plans
            .get_or_try_fetch(|| async {
                let plans = self.client.list_plans().await?;
                tracing::debug!(count = plans.len(), "Fetched Vultr plans");
                Ok::<_, VultrError>(
                    plans
                        .into_iter()
                        .map(|p| InstanceType {
                            hourly_cost: p.hourly(),
                            id: p.id,
                            vcpus: p.vcpu_count,
                            memory_mb: p.ram,
                            disk_gb: p.disk,
                            regions: p.locations,
                        })
                        .collect::<Vec<_>>(),
                )
            })
            .await
    }

    async fn regions(&self) -> Result<Vec<Region>, VultrError> {
        self.regions
            .get_or_try_fetch(|| async {
                let regions = self.client.list_regions().await?;
                Ok::<_, VultrError>(
                    regions
                        .into_iter()
                        .map(|r| Region::new(r.id, r.city, r.country))
                        .collect::<Vec<_>>(),
                )
            })
            .await
    }
}

/// `vultr_instance.worker` block of a generated document
#[derive(Debug, Clone, Deserialize)]
struct WorkerBlock {
    region: String,
    plan: String,
    os_id: i64,
    label: String,
    hostname: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    ssh_key_ids: Vec<String>,
    #[serde(default)]
    enable_ipv6: bool,
    #[serde(default = "default_backups")]
    backups: String,
    #[serde(default)]
    activation_email: bool,
    #[serde(default)]
    user_data: String,
}

fn default_backups() -> String {
    "disabled".to_string()
}

impl WorkerBlock {
    fn from_request(request: &ProvisionRequest) -> Result<Self, VultrError> {
        let (resource_type, name) = WORKER_RESOURCE;
        let value = request
            .document
            .require_resource(resource_type, name)
            .map_err(|e| VultrError::InvalidDefinition(e.to_string()))?;
        let mut block: WorkerBlock = serde_json::from_value(value.clone())
            .map_err(|e| VultrError::InvalidDefinition(format!("{resource_type}.{name}: {e}")))?;

        let tag = deployment_tag(&request.deployment);
        if !block.tags.contains(&tag) {
            block.tags.push(tag);
        }
        Ok(block)
    }

    fn instance_request(&self, index: u32) -> CreateInstanceRequest {
        let index = index.to_string();
        CreateInstanceRequest {
            region: self.region.clone(),
            plan: self.plan.clone(),
            os_id: self.os_id,
            label: self.label.replace(COUNT_INDEX, &index),
            hostname: self.hostname.replace(COUNT_INDEX, &index),
            tags: self.tags.clone(),
            ssh_key_ids: self.ssh_key_ids.clone(),
            enable_ipv6: self.enable_ipv6,
            backups: self.backups.clone(),
            activation_email: self.activation_email,
            user_data: encode_user_data(&self.user_data),
        }
    }
}

/// Map Vultr's three status fields onto a worker state.
pub fn worker_state(instance: &Instance) -> WorkerState {
    match instance.status.as_str() {
        "pending" | "resizing" => WorkerState::Provisioning,
        "suspended" => WorkerState::Unhealthy,
        "active" => match (instance.power_status.as_str(), instance.server_status.as_str()) {
            ("running", "ok") => WorkerState::Running,
            ("running", _) => WorkerState::Provisioning,
            _ => WorkerState::Unhealthy,
        },
        _ => WorkerState::Unhealthy,
    }
}

fn created_at(instance: &Instance) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&instance.date_created)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Built-in catalog used for the static descriptor
fn builtin_regions() -> Vec<Region> {
    [
        ("ams", "Amsterdam", "NL"),
        ("fra", "Frankfurt", "DE"),
        ("lhr", "London", "GB"),
        ("cdg", "Paris", "FR"),
        ("ewr", "New Jersey", "US"),
        ("lax", "Los Angeles", "US"),
        ("nrt", "Tokyo", "JP"),
        ("sgp", "Singapore", "SG"),
    ]
    .into_iter()
    .map(|(id, city, country)| Region::new(id, city, country))
    .collect()
}

fn builtin_instance_types() -> Vec<InstanceType> {
    [
        ("vc2-1c-1gb", 1, 1024, 25, 0.007),
        ("vc2-1c-2gb", 1, 2048, 55, 0.015),
        ("vc2-2c-4gb", 2, 4096, 80, 0.03),
        ("vc2-4c-8gb", 4, 8192, 160, 0.06),
        ("vhf-4c-16gb", 4, 16384, 384, 0.131),
        ("vc2-6c-16gb", 6, 16384, 320, 0.119),
    ]
    .into_iter()
    .map(|(id, vcpus, memory_mb, disk_gb, hourly_cost)| InstanceType {
        id: id.to_string(),
        vcpus,
        memory_mb,
        disk_gb,
        hourly_cost,
        regions: Vec::new(),
    })
    .collect()
}

#[async_trait]
impl CloudProvider for VultrProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn display_name(&self) -> &str {
        "Vultr"
    }

    fn descriptor(&self) -> ProviderDescriptor {
        let instance_types = builtin_instance_types();
        ProviderDescriptor {
            name: PROVIDER_NAME.to_string(),
            display_name: self.display_name().to_string(),
            scenarios: Scenario::ALL.to_vec(),
            base_pricing: PriceTable::from_instance_types("USD", &instance_types),
            instance_types,
            regions: builtin_regions(),
        }
    }

    async fn check_auth(&self) -> dcpfleet_cloud::Result<AuthStatus> {
        match self.client.account().await {
            Ok(account) => Ok(AuthStatus::ok(format!("{} ({})", account.name, account.email))),
            Err(e @ VultrError::AuthenticationFailed(_)) => Ok(AuthStatus::failed(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn deploy_workers(
        &self,
        request: &ProvisionRequest,
    ) -> dcpfleet_cloud::Result<ProvisionResult> {
        let started = Instant::now();
        let block = WorkerBlock::from_request(request)?;
        let mut result = ProvisionResult::new();

        tracing::info!(
            deployment = %request.deployment,
            count = request.count,
            region = %block.region,
            plan = %block.plan,
            "Provisioning Vultr workers"
        );

        for offset in 0..request.count {
            let index = request.first_index + offset;
            match self.client.create_instance(&block.instance_request(index)).await {
                Ok(instance) => {
                    let created = created_at(&instance).unwrap_or_else(Utc::now);
                    tracing::info!(
                        deployment = %request.deployment,
                        worker = %instance.id,
                        "Worker created"
                    );
                    result.add_worker(WorkerHandle::new(
                        instance.id.clone(),
                        worker_state(&instance),
                        created,
                    ));
                }
                Err(e) if e.is_fatal() => {
                    if result.workers.is_empty() && matches!(e, VultrError::AuthenticationFailed(_)) {
                        return Err(e.into());
                    }
                    tracing::warn!(
                        deployment = %request.deployment,
                        worker_index = index,
                        error = %e,
                        "Aborting provisioning batch"
                    );
                    let message = e.to_string();
                    for remaining in offset..request.count {
                        result.add_failure(request.first_index + remaining, message.clone());
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        deployment = %request.deployment,
                        worker_index = index,
                        error = %e,
                        "Worker creation failed"
                    );
                    result.add_failure(index, e.to_string());
                }
            }
        }

        result.duration_ms = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    async fn get_worker_status(&self, deployment: &str) -> dcpfleet_cloud::Result<Vec<WorkerStatus>> {
        let instances = self.client.list_instances(&deployment_tag(deployment)).await?;
        Ok(instances
            .iter()
            .map(|instance| {
                let status = WorkerStatus::new(instance.id.clone(), worker_state(instance));
                match created_at(instance) {
                    Some(at) => status.with_created_at(at),
                    None => status,
                }
            })
            .collect())
    }

    async fn terminate_workers(&self, worker_ids: &[String]) -> dcpfleet_cloud::Result<bool> {
        let mut all_accepted = true;
        for id in worker_ids {
            match self.client.delete_instance(id).await {
                Ok(()) => tracing::info!(worker = %id, "Worker termination requested"),
                Err(VultrError::NotFound(_)) => {
                    tracing::debug!(worker = %id, "Worker already gone");
                }
                Err(e @ VultrError::AuthenticationFailed(_)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(worker = %id, error = %e, "Worker termination failed");
                    all_accepted = false;
                }
            }
        }
        Ok(all_accepted)
    }

    async fn pricing(&self) -> dcpfleet_cloud::Result<PriceTable> {
        let plans = self.plans().await?;
        Ok(PriceTable::from_instance_types("USD", &plans))
    }

    async fn check_availability(&self, region: &str) -> dcpfleet_cloud::Result<bool> {
        match self.client.region_availability(region).await {
            Ok(plans) => Ok(!plans.is_empty()),
            Err(VultrError::NotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn available_instance_types(&self) -> dcpfleet_cloud::Result<Vec<InstanceType>> {
        Ok(self.plans().await?)
    }

    async fn available_regions(&self) -> dcpfleet_cloud::Result<Vec<Region>> {
        Ok(self.regions().await?)
    }

    async fn calculate_cost(&self, spec: &DeploymentSpec) -> dcpfleet_cloud::Result<f64> {
        let plan = spec
            .variable_str("plan")
            .ok_or_else(|| CloudError::InvalidConfig("variables.plan is required".to_string()))?;
        let pricing = self.pricing().await?;
        pricing
            .monthly_estimate(plan, spec.instance_count)
            .ok_or_else(|| CloudError::InvalidConfig(format!("Unknown Vultr plan: {plan}")))
    }

    async fn validate_config(
        &self,
        spec: &DeploymentSpec,
    ) -> dcpfleet_cloud::Result<Vec<ValidationIssue>> {
        let mut issues = Vec::new();

        let region = spec.region.as_deref().map(str::trim).filter(|r| !r.is_empty());
        let region_known = match region {
            None => {
                issues.push(ValidationIssue::new("region", "region is required"));
                false
            }
            Some(region) => {
                let regions = self.regions().await?;
                let known = regions.iter().any(|r| r.id == region);
                if !known {
                    issues.push(ValidationIssue::new(
                        "region",
                        format!("unknown Vultr region '{region}'"),
                    ));
                }
                known
            }
        };

        match spec.variable_str("plan") {
            None => issues.push(ValidationIssue::new("variables.plan", "plan is required")),
            Some(plan) => {
                let plans = self.plans().await?;
                if !plans.iter().any(|p| p.id == plan) {
                    issues.push(ValidationIssue::new(
                        "variables.plan",
                        format!("unknown Vultr plan '{plan}'"),
                    ));
                } else if let Some(region) = region
                    && region_known
                {
                    let available = match self.client.region_availability(region).await {
                        Ok(plans) => plans,
                        Err(VultrError::NotFound(_)) => Vec::new(),
                        Err(e) => return Err(e.into()),
                    };
                    if !available.iter().any(|p| p == plan) {
                        issues.push(ValidationIssue::new(
                            "variables.plan",
                            format!("plan '{plan}' is not available in region '{region}'"),
                        ));
                    }
                }
            }
        }

        if spec.instance_count == 0 {
            issues.push(ValidationIssue::new(
                "instance_count",
                "instance_count must be at least 1",
            ));
        }

        Ok(issues)
    }
}
