//! Fleet planning
//!
//! Pure comparison of a deployment's worker handles against its target
//! size. Both `deploy()` and the reconciler execute the resulting plan.

use chrono::{DateTime, TimeDelta, Utc};
use dcpfleet_cloud::{DeploymentConfig, WorkerHandle, WorkerState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    /// Unhealthy for longer than the grace period
    Unhealthy,
    /// More active workers than the target
    Surplus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FleetAction {
    Terminate {
        worker_ids: Vec<String>,
        reason: TerminateReason,
    },
    Provision {
        count: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetPlan {
    pub deployment: String,
    pub target: u32,
    /// Active workers before the plan runs
    pub active: u32,
    /// Terminations first, provisioning last
    pub actions: Vec<FleetAction>,
}

impl FleetPlan {
    /// Plan the actions that bring `config` to its target size.
    ///
    /// Surplus workers are chosen from the youngest end: the oldest
    /// `instance_count` active workers (by `created_at`, then lowest
    /// `provider_worker_id`) are kept.
    pub fn compute(config: &DeploymentConfig, now: DateTime<Utc>, grace: Duration) -> Self {
        let grace = TimeDelta::from_std(grace).unwrap_or(TimeDelta::MAX);
        let target = config.spec.instance_count;

        let (expired, mut keep): (Vec<&WorkerHandle>, Vec<&WorkerHandle>) = config
            .active_workers()
            .partition(|w| {
                w.state == WorkerState::Unhealthy
                    && w.unhealthy_for(now).is_some_and(|d| d > grace)
            });
        let active = (expired.len() + keep.len()) as u32;

        let mut actions = Vec::new();
        if !expired.is_empty() {
            actions.push(FleetAction::Terminate {
                worker_ids: sorted_ids(&expired),
                reason: TerminateReason::Unhealthy,
            });
        }

        keep.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.provider_worker_id.cmp(&b.provider_worker_id))
        });
        if keep.len() > target as usize {
            let surplus = keep.split_off(target as usize);
            actions.push(FleetAction::Terminate {
                worker_ids: sorted_ids(&surplus),
                reason: TerminateReason::Surplus,
            });
        }

        let shortfall = target.saturating_sub(keep.len() as u32);
        if shortfall > 0 {
            actions.push(FleetAction::Provision { count: shortfall });
        }

        Self {
            deployment: config.name().to_string(),
            target,
            active,
            actions,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn provision_count(&self) -> u32 {
        self.actions
            .iter()
            .map(|a| match a {
                FleetAction::Provision { count } => *count,
                FleetAction::Terminate { .. } => 0,
            })
            .sum()
    }

    /// Every worker id the plan terminates
    pub fn terminations(&self) -> Vec<String> {
        self.actions
            .iter()
            .flat_map(|a| match a {
                FleetAction::Terminate { worker_ids, .. } => worker_ids.clone(),
                FleetAction::Provision { .. } => Vec::new(),
            })
            .collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            target: self.target,
            active: self.active,
            to_provision: self.provision_count(),
            to_terminate: self.terminations().len() as u32,
        }
    }
}

fn sorted_ids(workers: &[&WorkerHandle]) -> Vec<String> {
    let mut ids: Vec<String> = workers
        .iter()
        .map(|w| w.provider_worker_id.clone())
        .collect();
    ids.sort();
    ids
}

/// Counts for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub target: u32,
    pub active: u32,
    pub to_provision: u32,
    pub to_terminate: u32,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to provision, {} to terminate ({}/{} active)",
            self.to_provision, self.to_terminate, self.active, self.target
        )
    }
}
