//! Cloud provider trait definition

use crate::catalog::{InstanceType, PriceTable, ProviderDescriptor, Region};
use crate::error::Result;
use crate::model::{DeploymentSpec, ValidationIssue, WorkerStatus};
use crate::provision::{ProvisionRequest, ProvisionResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cloud provider abstraction trait
///
/// Every vendor adapter implements this trait so the orchestrator and the
/// reconciler can drive worker fleets without knowing which cloud they run
/// on. Any operation may fail with a [`CloudError`](crate::CloudError)
/// carrying the vendor-specific cause; partial success is only expected
/// where an operation documents it.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Returns the provider name (e.g., "vultr")
    fn name(&self) -> &str;

    /// Returns the provider display name for UI
    fn display_name(&self) -> &str;

    /// Static capability descriptor; no I/O.
    fn descriptor(&self) -> ProviderDescriptor;

    /// Check if the provider is properly configured and authenticated
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Credential/connectivity smoke test
    async fn test_connection(&self) -> Result<bool> {
        Ok(self.check_auth().await?.authenticated)
    }

    /// Provision `request.count` workers from the materialized document.
    ///
    /// May return fewer handles than requested; the missing workers are
    /// listed in [`ProvisionResult::failures`].
    async fn deploy_workers(&self, request: &ProvisionRequest) -> Result<ProvisionResult>;

    /// Poll the workers attributed to `deployment`. Idempotent and side-effect free.
    async fn get_worker_status(&self, deployment: &str) -> Result<Vec<WorkerStatus>>;

    /// Request termination of the given workers.
    ///
    /// Returns `Ok(false)` when only a subset was accepted; callers re-poll
    /// to find out which.
    async fn terminate_workers(&self, worker_ids: &[String]) -> Result<bool>;

    /// Current price table
    async fn pricing(&self) -> Result<PriceTable>;

    /// Whether new workers can currently be placed in `region`
    async fn check_availability(&self, region: &str) -> Result<bool>;

    async fn available_instance_types(&self) -> Result<Vec<InstanceType>>;

    async fn available_regions(&self) -> Result<Vec<Region>>;

    /// Estimated monthly cost of the deployment
    async fn calculate_cost(&self, spec: &DeploymentSpec) -> Result<f64>;

    /// Validation errors for the deployment; empty means valid
    async fn validate_config(&self, spec: &DeploymentSpec) -> Result<Vec<ValidationIssue>>;
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for provider read operations
///
/// Only idempotent reads are retried; mutating calls surface their error to
/// the orchestrator, which leaves retrying to the operator.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.backoff_multiplier.powi(attempt as i32 - 2);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delays() {
        let retry = RetryConfig::default();
        assert_eq!(retry.delay_for(1), Duration::ZERO);
        assert_eq!(retry.delay_for(2), Duration::from_secs(1));
        assert_eq!(retry.delay_for(3), Duration::from_secs(2));
        assert_eq!(retry.delay_for(10), Duration::from_secs(30));
    }
}
