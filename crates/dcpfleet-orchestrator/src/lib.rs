//! DCPFleet Orchestrator
//!
//! Owns the deployment lifecycle (`create → deploy → destroy`) and the
//! background reconciler that keeps deployed fleets at their target size.
//!
//! ```text
//! Orchestrator ──┬── ProviderRegistry ── dyn CloudProvider
//!                ├── ConfigGenerator ─── Workspace
//!                ├── DeploymentRepository
//!                └── DeploymentLocks ◄── FleetReconciler
//! ```
//!
//! Status changes follow the edges of
//! [`DeploymentStatus::can_transition_to`](dcpfleet_cloud::DeploymentStatus::can_transition_to)
//! and are persisted before the next step runs.

pub mod error;
pub mod lock;
pub mod orchestrator;
pub mod plan;
pub mod reconciler;
pub mod repository;

pub use error::{OrchestratorError, Result};
pub use lock::{DeploymentGuard, DeploymentLocks};
pub use orchestrator::{DeployOutcome, Orchestrator, OrchestratorConfig};
pub use plan::{FleetAction, FleetPlan, PlanSummary, TerminateReason};
pub use reconciler::{FleetReconciler, ReconcileReport};
pub use repository::{
    DeploymentRepository, JsonFileRepository, MemoryRepository, RepositoryError,
};
