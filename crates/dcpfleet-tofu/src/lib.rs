//! DCPFleet OpenTofu integration
//!
//! - [`ConfigGenerator`]: renders a deployment definition into a
//!   `main.tf.json` document from the `(provider, scenario)` template
//! - [`Workspace`]: per-deployment document store with atomic replacement
//! - [`Tofu`]: thin wrapper over the `tofu` CLI for plan/apply by hand

pub mod error;
pub mod generator;
pub mod template;
pub mod tofu;
pub mod workspace;

pub use error::{GenerateError, Result, TofuError, WorkspaceError};
pub use generator::{ConfigGenerator, SCENARIO_TAG, resource_tags};
pub use template::{TemplateRegistry, TemplateSpec, template_key};
pub use tofu::{ChangeSummary, Diagnostic, Tofu, ValidateReport, parse_change_summary};
pub use workspace::{FsWorkspace, MemoryWorkspace, Workspace};
