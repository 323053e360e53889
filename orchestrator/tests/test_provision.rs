//! Provisioning executor tests

mod common;

use std::time::Duration;

use steward::bootscript;
use steward::compiler;
use steward::errors::OrchestratorError;
use steward::provision::executor::{Executor, ExecutorOptions, StepOutcome};
use steward::provision::{Deployer, DeployReport};
use steward::reconcile::DeploymentStatus;
use steward::store::{records, MemoryStore};

use common::{sample_config, FakeCloud};

fn fast_options() -> ExecutorOptions {
    ExecutorOptions {
        identity_propagation_wait: Duration::ZERO,
        operation_poll_attempts: 2,
        operation_poll_delay: Duration::ZERO,
    }
}

async fn run_plan(cloud: &FakeCloud) -> Result<Vec<StepOutcome>, OrchestratorError> {
    let config = sample_config();
    let compiled = compiler::compile(&config)?;
    let payload = bootscript::generate(&compiled.boot);
    let reports = Executor::new(cloud, fast_options())
        .execute(&compiled.plan, &config.secrets, &payload)
        .await?;
    Ok(reports.iter().map(|r| r.outcome).collect())
}

#[tokio::test]
async fn test_fresh_run_applies_every_step() {
    let cloud = FakeCloud::new();
    let outcomes = run_plan(&cloud).await.unwrap();
    assert_eq!(outcomes.len(), 9);
    assert!(outcomes.iter().all(|o| *o == StepOutcome::Applied));

    let calls = cloud.calls();
    // identity exists before the policy is written
    let identity = calls
        .iter()
        .position(|c| c.starts_with("create_service_identity"))
        .unwrap();
    let grant = calls.iter().position(|c| c == "set_iam_policy").unwrap();
    assert!(identity < grant);
    // router exists before NAT is patched onto it
    let router = calls.iter().position(|c| c.starts_with("create_router")).unwrap();
    let patch = calls.iter().position(|c| c == "patch_router").unwrap();
    assert!(router < patch);
    // instance is last
    assert!(calls.last().unwrap().starts_with("create_instance"));
}

#[tokio::test]
async fn test_second_run_creates_nothing_destroys_nothing() {
    let cloud = FakeCloud::new();
    run_plan(&cloud).await.unwrap();
    let outcomes = run_plan(&cloud).await.unwrap();

    // enable-apis re-applies; everything else reports the existing resource
    assert_eq!(outcomes[0], StepOutcome::Applied);
    assert!(outcomes[1..].iter().all(|o| *o == StepOutcome::AlreadyExisted));

    // no deletes anywhere, and the existing-instance path was taken
    assert_eq!(cloud.call_count("delete"), 0);
    assert_eq!(cloud.call_count("update_instance_metadata"), 1);
    assert_eq!(cloud.call_count("reset_instance"), 1);
    // secret versions are re-added each run; consumers read `latest`
    assert_eq!(cloud.call_count("add_secret_version"), 4);
}

#[tokio::test]
async fn test_existing_nat_is_not_patched_again() {
    let cloud = FakeCloud::new();
    run_plan(&cloud).await.unwrap();
    assert_eq!(cloud.call_count("patch_router"), 1);
    run_plan(&cloud).await.unwrap();
    assert_eq!(cloud.call_count("patch_router"), 1);
}

#[tokio::test]
async fn test_policy_grant_is_idempotent() {
    let cloud = FakeCloud::new();
    run_plan(&cloud).await.unwrap();
    let writes = cloud.call_count("set_iam_policy");
    run_plan(&cloud).await.unwrap();
    // second run finds the member already present and skips the write
    assert_eq!(cloud.call_count("set_iam_policy"), writes);
}

#[tokio::test]
async fn test_failure_names_the_step() {
    let cloud = FakeCloud::new();
    *cloud.fail_on.lock().unwrap() = Some("create_firewall_rule:allow-iap-ssh".to_string());
    match run_plan(&cloud).await {
        Err(OrchestratorError::StepFailed { step, .. }) => {
            assert_eq!(step, "create-firewall-rule:allow-iap-ssh");
        }
        other => panic!("expected StepFailed, got {:?}", other),
    }
    // execution stopped at the failing step
    assert_eq!(cloud.call_count("create_instance"), 0);
}

#[tokio::test]
async fn test_default_compute_grant_failure_is_soft() {
    let cloud = FakeCloud::with_project_number("12345");
    // the extra grant does a second get/set pair; failing it must not abort
    *cloud.fail_on.lock().unwrap() = Some("project_number".to_string());
    let outcomes = run_plan(&cloud).await.unwrap();
    assert_eq!(outcomes.len(), 9);
}

#[tokio::test]
async fn test_deployer_persists_record() {
    let cloud = FakeCloud::new();
    let store = MemoryStore::new();
    let deployer = Deployer::new(&cloud, &store, fast_options());
    let DeployReport {
        record_id,
        steps,
        warning,
    } = deployer.deploy(&sample_config(), None).await.unwrap();

    assert_eq!(steps.len(), 9);
    assert!(warning.is_none());
    let id = record_id.unwrap();
    let record = records::load(&store, &id).await.unwrap().unwrap();
    assert_eq!(record.project_id, "acme-1");
    assert_eq!(record.status, DeploymentStatus::Provisioning);
    // keys are stored masked
    assert!(record
        .api_keys
        .iter()
        .all(|k| !k.masked_value.contains("exampleexample")));
}

#[tokio::test]
async fn test_deployer_marks_existing_record_on_failure() {
    let cloud = FakeCloud::new();
    let store = MemoryStore::new();
    let record = records::DeploymentRecord::from_config(&sample_config(), Some("r1"));
    records::save(&store, &record).await.unwrap();

    *cloud.fail_on.lock().unwrap() = Some("create_instance".to_string());
    let deployer = Deployer::new(&cloud, &store, fast_options());
    assert!(deployer.deploy(&sample_config(), Some("r1")).await.is_err());

    let record = records::load(&store, "r1").await.unwrap().unwrap();
    assert_eq!(record.status, DeploymentStatus::Error);
}

#[tokio::test]
async fn test_boot_payload_reaches_instance_metadata() {
    let cloud = FakeCloud::new();
    run_plan(&cloud).await.unwrap();
    // the fake records the payload; a re-run must push the same payload again
    let config = sample_config();
    let compiled = compiler::compile(&config).unwrap();
    let payload = bootscript::generate(&compiled.boot);
    assert!(payload.contains("fetch_secret"));
    assert!(payload.starts_with("#!/usr/bin/env bash"));
}
