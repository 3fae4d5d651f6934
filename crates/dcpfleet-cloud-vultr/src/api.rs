//! Vultr v2 API client
//!
//! Direct REST implementation with bearer token authentication. Read-only
//! requests are retried with exponential backoff when Vultr answers 429;
//! instance creation and deletion are sent exactly once.

use crate::error::{Result, VultrError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use dcpfleet_cloud::RetryConfig;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const VULTR_API_BASE: &str = "https://api.vultr.com/v2";

/// Environment variable holding the API key
pub const VULTR_API_KEY_ENV: &str = "VULTR_API_KEY";

const PAGE_SIZE: u32 = 100;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Credentials passed at provider construction
#[derive(Debug, Clone)]
pub struct VultrCredentials {
    pub api_key: String,

    /// Override for the API endpoint (tests, proxies)
    pub base_url: Option<String>,
}

impl VultrCredentials {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
        }
    }

    /// Create credentials from the given environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let api_key = std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| VultrError::MissingApiKey(var.to_string()))?;
        Ok(Self::new(api_key))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Vultr API client
pub struct VultrClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryConfig,
}

impl VultrClient {
    pub fn new(credentials: VultrCredentials) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("dcpfleet/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_key: credentials.api_key,
            base_url: credentials
                .base_url
                .unwrap_or_else(|| VULTR_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    /// GET with retry on 429
    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let mut attempt = 1;
        loop {
            let response = self.request(Method::GET, path).query(query).send().await?;
            match check_response(response).await {
                Err(VultrError::RateLimited(msg)) if attempt < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay_for(attempt);
                    tracing::warn!(
                        path,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Rate limited by Vultr, retrying: {}",
                        msg
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
                Ok(response) => return Ok(response.json().await?),
            }
        }
    }

    /// Account owning the API key
    pub async fn account(&self) -> Result<Account> {
        let response: AccountResponse = self.get("/account", &[]).await?;
        Ok(response.account)
    }

    pub async fn list_regions(&self) -> Result<Vec<ApiRegion>> {
        let mut regions = Vec::new();
        let mut cursor = None;
        loop {
            let page: RegionsPage = self.get("/regions", &page_query(&cursor)).await?;
            regions.extend(page.regions);
            cursor = page.meta.and_then(Meta::next_cursor);
            if cursor.is_none() {
                return Ok(regions);
            }
        }
    }

    /// Plan ids that can currently be deployed in `region`
    pub async fn region_availability(&self, region: &str) -> Result<Vec<String>> {
        let response: AvailabilityResponse = self
            .get(&format!("/regions/{region}/availability"), &[])
            .await?;
        Ok(response.available_plans)
    }

    pub async fn list_plans(&self) -> Result<Vec<ApiPlan>> {
        let mut plans = Vec::new();
        let mut cursor = None;
        loop {
            let page: PlansPage = self.get("/plans", &page_query(&cursor)).await?;
            plans.extend(page.plans);
            cursor = page.meta.and_then(Meta::next_cursor);
            if cursor.is_none() {
                return Ok(plans);
            }
        }
    }

    /// Instances carrying `tag`
    pub async fn list_instances(&self, tag: &str) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        let mut cursor = None;
        loop {
            let mut query = page_query(&cursor);
            query.push(("tag", tag.to_string()));
            let page: InstancesPage = self.get("/instances", &query).await?;
            instances.extend(page.instances);
            cursor = page.meta.and_then(Meta::next_cursor);
            if cursor.is_none() {
                return Ok(instances);
            }
        }
    }

    /// Create an instance. Never retried.
    pub async fn create_instance(&self, request: &CreateInstanceRequest) -> Result<Instance> {
        tracing::debug!(label = %request.label, region = %request.region, "Creating Vultr instance");
        let response = self
            .request(Method::POST, "/instances")
            .json(request)
            .send()
            .await?;
        let created: InstanceResponse = check_response(response).await?.json().await?;
        Ok(created.instance)
    }

    /// Delete an instance. Never retried.
    pub async fn delete_instance(&self, id: &str) -> Result<()> {
        tracing::debug!(instance = %id, "Deleting Vultr instance");
        let response = self
            .request(Method::DELETE, &format!("/instances/{id}"))
            .send()
            .await?;
        match check_response(response).await {
            Err(VultrError::NotFound(_)) => Err(VultrError::NotFound(id.to_string())),
            other => other.map(|_| ()),
        }
    }
}

fn page_query(cursor: &Option<String>) -> Vec<(&'static str, String)> {
    let mut query = vec![("per_page", PAGE_SIZE.to_string())];
    if let Some(cursor) = cursor {
        query.push(("cursor", cursor.clone()));
    }
    query
}

/// Map non-success responses to typed errors
async fn check_response(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => VultrError::AuthenticationFailed(message),
        StatusCode::TOO_MANY_REQUESTS => VultrError::RateLimited(message),
        StatusCode::NOT_FOUND => VultrError::NotFound(message),
        _ if is_quota_message(&message) => VultrError::QuotaExceeded(message),
        _ => VultrError::ApiError {
            status: status.as_u16(),
            message,
        },
    })
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("limit") || lower.contains("quota") || lower.contains("insufficient")
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: String,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    next: String,
}

impl Meta {
    fn next_cursor(self) -> Option<String> {
        Some(self.links.next).filter(|next| !next.is_empty())
    }
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    account: Account,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct RegionsPage {
    regions: Vec<ApiRegion>,
    meta: Option<Meta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRegion {
    pub id: String,
    pub city: String,
    pub country: String,
}

#[derive(Debug, Deserialize)]
struct AvailabilityResponse {
    #[serde(default)]
    available_plans: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlansPage {
    plans: Vec<ApiPlan>,
    meta: Option<Meta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiPlan {
    pub id: String,
    pub vcpu_count: u32,
    /// MB
    pub ram: u32,
    /// GB
    pub disk: u32,
    pub monthly_cost: f64,
    #[serde(default)]
    pub hourly_cost: Option<f64>,
    #[serde(default)]
    pub locations: Vec<String>,
}

impl ApiPlan {
    /// Hourly price; derived from the monthly price when the API omits it
    pub fn hourly(&self) -> f64 {
        self.hourly_cost
            .unwrap_or(self.monthly_cost / dcpfleet_cloud::HOURS_PER_MONTH)
    }
}

#[derive(Debug, Deserialize)]
struct InstancesPage {
    instances: Vec<Instance>,
    meta: Option<Meta>,
}

#[derive(Debug, Deserialize)]
struct InstanceResponse {
    instance: Instance,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub date_created: String,
    /// pending / active / suspended / resizing
    pub status: String,
    /// running / stopped
    #[serde(default)]
    pub power_status: String,
    /// none / locked / installingbooting / ok
    #[serde(default)]
    pub server_status: String,
    #[serde(default)]
    pub main_ip: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub plan: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// `POST /instances` body
#[derive(Debug, Clone, Serialize)]
pub struct CreateInstanceRequest {
    pub region: String,
    pub plan: String,
    pub os_id: i64,
    pub label: String,
    pub hostname: String,
    pub tags: Vec<String>,
    #[serde(rename = "sshkey_id", skip_serializing_if = "Vec::is_empty")]
    pub ssh_key_ids: Vec<String>,
    pub enable_ipv6: bool,
    pub backups: String,
    pub activation_email: bool,
    /// Base64 encoded
    #[serde(skip_serializing_if = "String::is_empty")]
    pub user_data: String,
}

/// Encode a bootstrap script the way the instances API expects it.
pub fn encode_user_data(script: &str) -> String {
    if script.is_empty() {
        String::new()
    } else {
        BASE64.encode(script)
    }
}
