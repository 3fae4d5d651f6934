//! Vultr provider for DCPFleet
//!
//! This crate implements the CloudProvider trait for Vultr, enabling
//! DCPFleet to run DCP worker fleets on Vultr cloud compute instances.
//!
//! # Features
//!
//! - Worker provisioning from the generated `vultr_instance.worker` block
//! - Status polling scoped by the `dcpfleet-deployment:<name>` tag
//! - Plan pricing and region catalog with caching
//!
//! # Requirements
//!
//! - A Vultr API key (`VULTR_API_KEY` or the `providers.vultr` config section)
//!
//! # Example
//!
//! ```ignore
//! use dcpfleet_cloud_vultr::{VultrCredentials, VultrProvider};
//! use dcpfleet_cloud::CloudProvider;
//!
//! let provider = VultrProvider::new(VultrCredentials::from_env("VULTR_API_KEY")?)?;
//!
//! let auth = provider.check_auth().await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//!
//! let workers = provider.get_worker_status("fest-2025-enc").await?;
//! ```

pub mod api;
pub mod error;
pub mod provider;

pub use api::{VULTR_API_BASE, VULTR_API_KEY_ENV, VultrClient, VultrCredentials};
pub use error::{Result, VultrError};
pub use provider::{DEFAULT_PRICING_TTL, PROVIDER_NAME, VultrProvider, worker_state};
