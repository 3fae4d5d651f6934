//! DCPFleet Cloud Infrastructure
//!
//! This crate provides the cloud provider abstraction for DCPFleet and the
//! deployment data model shared by the orchestrator and every provider
//! adapter.
//!
//! # Supported Providers
//!
//! - **Vultr**: cloud compute instances (via the Vultr v2 API)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  dcpfleet CLI                    │
//! │          (create / deploy / destroy / ...)       │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │             dcpfleet-orchestrator                │
//! │   lifecycle state machine · fleet reconciler     │
//! └───────┬─────────────────┬───────────────────────┘
//!         │                 │
//! ┌───────▼───────┐ ┌───────▼───────────────────────┐
//! │ dcpfleet-tofu │ │        dcpfleet-cloud          │
//! │  generator    │ │  trait CloudProvider { ... }   │
//! └───────────────┘ │  ProviderRegistry · model      │
//!                   └───────┬───────────────────────┘
//!                           │
//!                   ┌───────▼───────┐
//!                   │     vultr     │
//!                   │   provider    │
//!                   └───────────────┘
//! ```

pub mod cache;
pub mod catalog;
pub mod document;
pub mod error;
pub mod model;
pub mod provider;
pub mod provision;
pub mod registry;

// Re-exports
pub use cache::Cached;
pub use catalog::{HOURS_PER_MONTH, InstanceType, PriceTable, ProviderDescriptor, Region};
pub use document::{DOCUMENT_FILE, InfraDocument};
pub use error::{CloudError, Result};
pub use model::{
    DEPLOYMENT_TAG, DeploymentConfig, DeploymentSpec, DeploymentStatus, Scenario,
    StatusTransition, TransitionError, ValidationIssue, WorkerHandle, WorkerState, WorkerStatus,
    deployment_tag, flat_tag,
};
pub use provider::{AuthStatus, CloudProvider, RetryConfig};
pub use provision::{ProvisionFailure, ProvisionRequest, ProvisionResult};
pub use registry::ProviderRegistry;
