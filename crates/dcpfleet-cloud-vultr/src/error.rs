//! Vultr provider error types

use dcpfleet_cloud::CloudError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VultrError {
    #[error("Vultr API key not configured (set {0})")]
    MissingApiKey(String),

    #[error("Vultr authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Vultr rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Vultr quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Vultr resource not found: {0}")]
    NotFound(String),

    #[error("Vultr API error ({status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid worker definition: {0}")]
    InvalidDefinition(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VultrError>;

impl VultrError {
    /// Errors after which further calls in the same batch are pointless
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VultrError::MissingApiKey(_)
                | VultrError::AuthenticationFailed(_)
                | VultrError::QuotaExceeded(_)
        )
    }
}

impl From<VultrError> for CloudError {
    fn from(e: VultrError) -> Self {
        match e {
            VultrError::MissingApiKey(_) | VultrError::AuthenticationFailed(_) => {
                CloudError::AuthenticationFailed(e.to_string())
            }
            VultrError::RateLimited(_) => CloudError::RateLimited(e.to_string()),
            VultrError::QuotaExceeded(_) => CloudError::QuotaExceeded(e.to_string()),
            VultrError::NotFound(id) => CloudError::WorkerNotFound(id),
            VultrError::InvalidDefinition(msg) => CloudError::InvalidDocument(msg),
            VultrError::Http(ref inner) if inner.is_timeout() => CloudError::Timeout(e.to_string()),
            VultrError::JsonError(inner) => CloudError::Json(inner),
            other => CloudError::ApiError(other.to_string()),
        }
    }
}
