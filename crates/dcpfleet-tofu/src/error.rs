//! Error types for document generation, workspaces and the tofu CLI

use dcpfleet_cloud::Scenario;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerateError {
    #[error("No template registered for provider '{provider}' and scenario '{scenario}'")]
    TemplateNotFound { provider: String, scenario: Scenario },

    #[error("Template error in {template}: {message}")]
    Template { template: String, message: String },

    #[error("Missing required variables for {deployment}: {}", .missing.join(", "))]
    MissingVariables {
        deployment: String,
        missing: Vec<String>,
    },

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("Invalid workspace key: {0:?}")]
    InvalidKey(String),

    #[error("Workspace IO error: {path}\nReason: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum TofuError {
    #[error("tofu not found. Please install OpenTofu: https://opentofu.org/docs/intro/install/")]
    TofuNotFound,

    #[error("tofu {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Unexpected tofu output: {0}")]
    UnexpectedOutput(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenerateError>;
