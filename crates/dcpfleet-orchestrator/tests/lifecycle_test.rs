//! Deployment lifecycle against an in-process provider

mod common;

use common::{DEPLOYMENT, FakeProvider, Harness, build_orchestrator, encoder_spec, test_config};
use dcpfleet_cloud::{DeploymentStatus, WorkerState};
use dcpfleet_orchestrator::{
    DeploymentRepository, JsonFileRepository, OrchestratorConfig, OrchestratorError,
};
use dcpfleet_tofu::{FsWorkspace, Workspace};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn edges(config: &dcpfleet_cloud::DeploymentConfig) -> Vec<(DeploymentStatus, DeploymentStatus)> {
    config.history.iter().map(|t| (t.from, t.to)).collect()
}

#[tokio::test]
async fn test_encoder_fleet_lifecycle() {
    let h = Harness::new();
    let created = h
        .orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    assert_eq!(created.status, DeploymentStatus::Draft);

    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.workers.len(), 2);
    assert!(outcome.workers.iter().all(|w| w.state == WorkerState::Running));
    assert_eq!(h.provider.deploy_calls(), vec![2]);

    let status = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(
        edges(&status),
        vec![
            (DeploymentStatus::Draft, DeploymentStatus::Deploying),
            (DeploymentStatus::Deploying, DeploymentStatus::Deployed),
        ]
    );
    assert!(h.workspace.contains(DEPLOYMENT));

    h.orchestrator.scale(DEPLOYMENT, 1).await.unwrap();
    let report = h
        .orchestrator
        .reconciler()
        .reconcile_once(DEPLOYMENT)
        .await
        .unwrap();
    assert_eq!(report.terminated, vec!["vultr-0002".to_string()]);
    assert_eq!(report.provisioned, 0);
    assert_eq!(
        h.provider.terminate_calls(),
        vec![vec!["vultr-0002".to_string()]]
    );
    assert_eq!(h.provider.worker_ids(DEPLOYMENT), vec!["vultr-0001"]);
}

#[tokio::test]
async fn test_destroy_is_terminal() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();

    let destroyed = h.orchestrator.destroy(DEPLOYMENT).await.unwrap();
    assert_eq!(destroyed.status, DeploymentStatus::Destroyed);
    assert_eq!(destroyed.active_count(), 0);
    assert!(h.provider.worker_ids(DEPLOYMENT).is_empty());
    assert!(!h.workspace.contains(DEPLOYMENT));
    assert_eq!(
        &edges(&destroyed)[2..],
        &[
            (DeploymentStatus::Deployed, DeploymentStatus::Destroying),
            (DeploymentStatus::Destroying, DeploymentStatus::Destroyed),
        ]
    );

    assert!(matches!(
        h.orchestrator.deploy(DEPLOYMENT).await,
        Err(OrchestratorError::TerminalState(_))
    ));
    assert!(matches!(
        h.orchestrator.destroy(DEPLOYMENT).await,
        Err(OrchestratorError::TerminalState(_))
    ));
    assert!(matches!(
        h.orchestrator.scale(DEPLOYMENT, 3).await,
        Err(OrchestratorError::TerminalState(_))
    ));
    assert!(matches!(
        h.orchestrator.create_deployment(encoder_spec(1)).await,
        Err(OrchestratorError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_concurrent_deploys_one_proceeds() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.provider.slow_deploys(Duration::from_millis(100));

    let (a, b, c) = tokio::join!(
        h.orchestrator.deploy(DEPLOYMENT),
        h.orchestrator.deploy(DEPLOYMENT),
        h.orchestrator.deploy(DEPLOYMENT),
    );
    let results = [a, b, c];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let busy = results
        .iter()
        .filter(|r| matches!(r, Err(OrchestratorError::DeploymentBusy(_))))
        .count();
    assert_eq!((succeeded, busy), (1, 2));
    assert_eq!(h.provider.deploy_calls(), vec![2]);
}

#[tokio::test]
async fn test_partial_provisioning_records_created_workers() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(3))
        .await
        .unwrap();
    h.provider.limit_creates(2);

    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert_eq!(outcome.status, DeploymentStatus::Failed);
    assert_eq!(outcome.shortfall, 1);
    assert_eq!(outcome.workers.len(), 2);
    assert!(outcome.error.unwrap().contains("quota exceeded"));

    let stored = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(stored.workers.len(), 2);
    assert_eq!(stored.shortfall, 1);

    // a retry only asks for what is missing
    h.provider.clear_limit();
    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.workers.len(), 3);
    assert_eq!(outcome.shortfall, 0);
    assert_eq!(h.provider.deploy_calls(), vec![3, 1]);
}

#[tokio::test]
async fn test_provider_error_is_recorded_not_returned() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.provider.fail_deploys("service unavailable");

    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert_eq!(outcome.status, DeploymentStatus::Failed);
    assert!(outcome.error.unwrap().contains("service unavailable"));

    let stored = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(stored.shortfall, 2);
    assert!(stored.last_error.is_some());
}

#[tokio::test]
async fn test_apply_timeout_fails_deployment() {
    let h = Harness::with_config(OrchestratorConfig {
        apply_timeout: Duration::from_millis(50),
        ..test_config()
    });
    h.orchestrator
        .create_deployment(encoder_spec(1))
        .await
        .unwrap();
    h.provider.slow_deploys(Duration::from_secs(2));

    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert_eq!(outcome.status, DeploymentStatus::Failed);
    assert!(outcome.error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_destroy_cancels_inflight_deploy() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.provider.slow_deploys(Duration::from_secs(10));

    let deploying = {
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move { orchestrator.deploy(DEPLOYMENT).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let destroyed = h.orchestrator.destroy(DEPLOYMENT).await.unwrap();
    assert_eq!(destroyed.status, DeploymentStatus::Destroyed);

    let outcome = deploying.await.unwrap().unwrap();
    assert_eq!(outcome.status, DeploymentStatus::Failed);
    assert!(outcome.error.unwrap().contains("cancelled"));
    assert!(edges(&destroyed).contains(&(DeploymentStatus::Failed, DeploymentStatus::Destroying)));
}

#[tokio::test]
async fn test_destroy_failure_restores_status() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    h.provider.ignore_terminations();

    let err = h.orchestrator.destroy(DEPLOYMENT).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Destroy { .. }));

    let stored = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Deployed);
    assert!(stored.last_error.unwrap().contains("still present"));
    assert!(h.workspace.contains(DEPLOYMENT));
}

#[tokio::test]
async fn test_destroy_reissues_dropped_termination() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    h.provider.partial_terminations(1);

    let destroyed = h.orchestrator.destroy(DEPLOYMENT).await.unwrap();
    assert_eq!(destroyed.status, DeploymentStatus::Destroyed);
    assert_eq!(
        h.provider.terminate_calls(),
        vec![
            vec!["vultr-0001".to_string(), "vultr-0002".to_string()],
            vec!["vultr-0002".to_string()],
        ]
    );
    assert!(h.provider.worker_ids(DEPLOYMENT).is_empty());
}

#[tokio::test]
async fn test_interrupted_deploy_is_recovered() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(1))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();

    // process died mid-apply: the store says Deploying, nobody holds the lock
    let mut stuck = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    stuck.status = DeploymentStatus::Deploying;
    h.repository.save(&stuck).await.unwrap();

    let destroyed = h.orchestrator.destroy(DEPLOYMENT).await.unwrap();
    assert_eq!(destroyed.status, DeploymentStatus::Destroyed);
    let history = edges(&destroyed);
    assert!(history.contains(&(DeploymentStatus::Deploying, DeploymentStatus::Failed)));
    assert!(history.ends_with(&[
        (DeploymentStatus::Failed, DeploymentStatus::Destroying),
        (DeploymentStatus::Destroying, DeploymentStatus::Destroyed),
    ]));
    let reason = destroyed
        .history
        .iter()
        .find(|t| t.from == DeploymentStatus::Deploying && t.to == DeploymentStatus::Failed)
        .and_then(|t| t.reason.clone())
        .unwrap();
    assert!(reason.contains("interrupted"));
}

#[tokio::test]
async fn test_interrupted_destroy_is_recovered() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(1))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();

    let mut stuck = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    stuck.status = DeploymentStatus::Destroying;
    h.repository.save(&stuck).await.unwrap();

    // Failed is editable, so the definition can be fixed before redeploying
    let updated = h
        .orchestrator
        .update_deployment(encoder_spec(2))
        .await
        .unwrap();
    assert_eq!(updated.status, DeploymentStatus::Failed);
    assert!(updated.last_error.unwrap().contains("interrupted while destroying"));

    let outcome = h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.workers.len(), 2);
    assert_eq!(h.provider.deploy_calls(), vec![1, 1]);
}

#[tokio::test]
async fn test_destroy_terminates_unrecorded_workers() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(1))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();
    h.provider.adopt(DEPLOYMENT, "vultr-stray");

    h.orchestrator.destroy(DEPLOYMENT).await.unwrap();
    let mut terminated = h.provider.terminate_calls().concat();
    terminated.sort();
    assert_eq!(terminated, vec!["vultr-0001", "vultr-stray"]);
}

#[tokio::test]
async fn test_regeneration_is_byte_identical() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2).with_tag("team", "encode"))
        .await
        .unwrap();

    let first = h.orchestrator.generate(DEPLOYMENT).await.unwrap();
    let stored_first = h.workspace.read(DEPLOYMENT).await.unwrap().unwrap();
    let second = h.orchestrator.generate(DEPLOYMENT).await.unwrap();
    let stored_second = h.workspace.read(DEPLOYMENT).await.unwrap().unwrap();

    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(stored_first, stored_second);
    assert_eq!(stored_first, first.as_bytes());
}

#[tokio::test]
async fn test_invalid_definitions_are_rejected_before_any_change() {
    let h = Harness::new();

    let bad_name = encoder_spec(1);
    let bad_name = dcpfleet_cloud::DeploymentSpec {
        name: "Fest 2025".into(),
        ..bad_name
    };
    assert!(matches!(
        h.orchestrator.create_deployment(bad_name).await,
        Err(OrchestratorError::Validation { .. })
    ));
    assert!(matches!(
        h.orchestrator.create_deployment(encoder_spec(0)).await,
        Err(OrchestratorError::Validation { .. })
    ));

    let mut unknown = encoder_spec(1);
    unknown.provider = "aws".into();
    assert!(matches!(
        h.orchestrator.create_deployment(unknown).await,
        Err(OrchestratorError::UnknownProvider(p)) if p == "aws"
    ));
    assert!(h.orchestrator.list_deployments(None).await.unwrap().is_empty());

    // missing worker_image passes create but stops deploy before Deploying
    let mut incomplete = encoder_spec(1);
    incomplete.variables.remove("worker_image");
    h.orchestrator.create_deployment(incomplete).await.unwrap();
    match h.orchestrator.deploy(DEPLOYMENT).await {
        Err(OrchestratorError::Variable { missing, .. }) => {
            assert_eq!(missing, vec!["worker_image"])
        }
        other => panic!("expected Variable error, got {other:?}"),
    }

    // provider-side validation
    h.orchestrator
        .update_deployment(encoder_spec(1).with_region("atlantis"))
        .await
        .unwrap();
    assert!(matches!(
        h.orchestrator.deploy(DEPLOYMENT).await,
        Err(OrchestratorError::Validation { .. })
    ));

    let stored = h.orchestrator.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Draft);
    assert!(stored.history.is_empty());
    assert!(h.provider.deploy_calls().is_empty());
}

#[tokio::test]
async fn test_update_only_when_editable() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(1))
        .await
        .unwrap();
    h.orchestrator
        .update_deployment(encoder_spec(1).with_variable("queue_url", json!("redis://q")))
        .await
        .unwrap();
    h.orchestrator.deploy(DEPLOYMENT).await.unwrap();

    assert!(matches!(
        h.orchestrator.update_deployment(encoder_spec(4)).await,
        Err(OrchestratorError::InvalidTransition {
            status: DeploymentStatus::Deployed,
            ..
        })
    ));
    // scaling a deployed fleet is fine
    let scaled = h.orchestrator.scale(DEPLOYMENT, 4).await.unwrap();
    assert_eq!(scaled.spec.instance_count, 4);
    assert_eq!(scaled.status, DeploymentStatus::Deployed);
}

#[tokio::test]
async fn test_queries() {
    let h = Harness::new();
    h.orchestrator
        .create_deployment(encoder_spec(2))
        .await
        .unwrap();

    let providers = h.orchestrator.list_providers();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].name, "vultr");

    let cost = h.orchestrator.estimate_cost(&encoder_spec(2)).await.unwrap();
    assert!((cost - 10.22).abs() < f64::EPSILON);

    assert!(h.orchestrator.test_connection("vultr").await.unwrap());
    assert!(matches!(
        h.orchestrator.test_connection("aws").await,
        Err(OrchestratorError::UnknownProvider(_))
    ));

    assert!(matches!(
        h.orchestrator.get_status("missing").await,
        Err(OrchestratorError::NotFound(_))
    ));
    let drafts = h
        .orchestrator
        .list_deployments(Some(DeploymentStatus::Draft))
        .await
        .unwrap();
    assert_eq!(drafts.len(), 1);
    assert!(h
        .orchestrator
        .list_deployments(Some(DeploymentStatus::Deployed))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_state_survives_restart_with_json_store() {
    let temp_dir = tempfile::tempdir().unwrap();
    let state_dir = temp_dir.path().join("state");
    let workspace = Arc::new(FsWorkspace::new(temp_dir.path().join("workspaces")));
    let provider = FakeProvider::new();

    let first = build_orchestrator(
        Arc::clone(&provider),
        Arc::new(JsonFileRepository::new(&state_dir)),
        Arc::clone(&workspace) as Arc<dyn Workspace>,
        test_config(),
    );
    first.create_deployment(encoder_spec(2)).await.unwrap();
    first.deploy(DEPLOYMENT).await.unwrap();
    assert!(workspace.document_path(DEPLOYMENT).exists());
    drop(first);

    let second = build_orchestrator(
        Arc::clone(&provider),
        Arc::new(JsonFileRepository::new(&state_dir)),
        Arc::clone(&workspace) as Arc<dyn Workspace>,
        test_config(),
    );
    let stored = second.get_status(DEPLOYMENT).await.unwrap();
    assert_eq!(stored.status, DeploymentStatus::Deployed);
    assert_eq!(stored.active_count(), 2);

    second.destroy(DEPLOYMENT).await.unwrap();
    assert!(!workspace.document_path(DEPLOYMENT).exists());
}
