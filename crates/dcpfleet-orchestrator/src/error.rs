//! Orchestrator error types

use crate::repository::RepositoryError;
use dcpfleet_cloud::{CloudError, DeploymentStatus, ValidationIssue};
use dcpfleet_tofu::{GenerateError, WorkspaceError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Invalid deployment '{deployment}': {}", join_issues(.issues))]
    Validation {
        deployment: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Template error: {0}")]
    Template(String),

    #[error("Missing required variables for '{deployment}': {}", .missing.join(", "))]
    Variable {
        deployment: String,
        missing: Vec<String>,
    },

    #[error("Deployment '{0}' is busy with another operation")]
    DeploymentBusy(String),

    #[error("Failed to destroy deployment '{deployment}': {message}")]
    Destroy { deployment: String, message: String },

    #[error("Deployment not found: {0}")]
    NotFound(String),

    #[error("Deployment already exists: {0}")]
    AlreadyExists(String),

    #[error("Deployment '{0}' has been destroyed")]
    TerminalState(String),

    #[error("Cannot {operation} deployment '{deployment}' while it is {status}")]
    InvalidTransition {
        deployment: String,
        status: DeploymentStatus,
        operation: &'static str,
    },

    #[error("Provider error: {0}")]
    Provider(#[from] CloudError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<GenerateError> for OrchestratorError {
    fn from(e: GenerateError) -> Self {
        match e {
            GenerateError::MissingVariables {
                deployment,
                missing,
            } => OrchestratorError::Variable {
                deployment,
                missing,
            },
            GenerateError::Workspace(e) => OrchestratorError::Workspace(e),
            other => OrchestratorError::Template(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
