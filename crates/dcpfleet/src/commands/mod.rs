pub mod catalog;
pub mod definition;
pub mod deploy;
pub mod destroy;
pub mod plan;
pub mod reconcile;
pub mod status;

use colored::{ColoredString, Colorize};
use dcpfleet_cloud::{DeploymentStatus, WorkerState};

pub fn status_colored(status: DeploymentStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        DeploymentStatus::Deployed => label.green(),
        DeploymentStatus::Failed => label.red(),
        DeploymentStatus::Deploying | DeploymentStatus::Destroying => label.yellow(),
        DeploymentStatus::Draft => label.cyan(),
        DeploymentStatus::Destroyed => label.dimmed(),
    }
}

pub fn worker_state_colored(state: WorkerState) -> ColoredString {
    let label = state.to_string();
    match state {
        WorkerState::Running => label.green(),
        WorkerState::Provisioning => label.yellow(),
        WorkerState::Unhealthy => label.red(),
        WorkerState::Terminating | WorkerState::Terminated => label.dimmed(),
    }
}
