//! Integration tests for the upgrade orchestrator with the shipped steps

mod common;

use cmdb_store::{doc, Datastore};
use cmdb_upgrader::tables::instance_table;
use cmdb_upgrader::{Orchestrator, StepRegistry, UpgradeError, UpgraderConfig, RESHARD_VERSION};
use common::*;
use serde_json::json;
use std::sync::Arc;

fn config() -> UpgraderConfig {
    UpgraderConfig::default().with_workers(8).with_page_size(7)
}

fn orchestrator(store: Arc<dyn Datastore>) -> Orchestrator {
    Orchestrator::new(store, StepRegistry::standard().unwrap(), config())
}

// ============ Watermark ============

#[tokio::test]
async fn test_upgrade_applies_reshard_and_records_watermark() {
    init_tracing();
    let store = seeded_store().await;
    let orchestrator = orchestrator(store.clone());

    assert!(orchestrator.current_version().await.unwrap().is_none());

    let report = orchestrator.upgrade().await.unwrap();
    assert_eq!(report.applied, vec![RESHARD_VERSION]);
    assert_eq!(report.from_version, None);
    assert_eq!(report.to_version.as_deref(), Some(RESHARD_VERSION));

    let watermark = store
        .find_one("cc_System", &doc(json!({"type": "version"})))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(watermark["current_version"], json!(RESHARD_VERSION));
    assert!(watermark["last_time"].is_string());

    assert_eq!(
        store.count(&instance_table("0", "switch"), &doc(json!({}))).await.unwrap(),
        SWITCHES
    );
}

#[tokio::test]
async fn test_completed_upgrade_is_skipped() {
    let store = seeded_store().await;
    orchestrator(store.clone()).upgrade().await.unwrap();
    let before = snapshot(store.as_ref()).await;

    let report = orchestrator(store.clone()).upgrade().await.unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.skipped, vec![RESHARD_VERSION]);
    assert_eq!(report.from_version.as_deref(), Some(RESHARD_VERSION));

    // Nothing is rewritten, the watermark included
    assert_eq!(snapshot(store.as_ref()).await, before);
}

#[tokio::test]
async fn test_upgrade_to_named_version() {
    let store = seeded_store().await;
    let orchestrator = orchestrator(store.clone());

    let report = orchestrator.upgrade_to(RESHARD_VERSION).await.unwrap();
    assert_eq!(report.applied, vec![RESHARD_VERSION]);

    let err = orchestrator.upgrade_to("y3.9.202001011200").await.unwrap_err();
    assert!(matches!(err, UpgradeError::InvalidVersion(_)));
    let err = orchestrator.upgrade_to("not-a-version").await.unwrap_err();
    assert!(matches!(err, UpgradeError::InvalidVersion(_)));
}

// ============ Failure ============

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_step_keeps_watermark_and_reruns() {
    init_tracing();
    let inner = seeded_store().await;
    let flaky = Arc::new(FlakyStore::new(inner.clone(), 3));

    let err = orchestrator(flaky).upgrade().await.unwrap_err();
    assert_eq!(err.failed_version(), Some(RESHARD_VERSION));
    match err {
        UpgradeError::StepFailed { source, .. } => {
            assert!(matches!(*source, UpgradeError::Copy { .. }), "{source}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let rerun = orchestrator(inner.clone());
    assert!(rerun.current_version().await.unwrap().is_none());

    let report = rerun.upgrade().await.unwrap();
    assert_eq!(report.applied, vec![RESHARD_VERSION]);
    assert_eq!(
        inner.count("cc_ObjectBaseMapping", &doc(json!({}))).await.unwrap(),
        SWITCHES + ROUTERS
    );
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_running() {
    let store = seeded_store().await;
    let orchestrator = Orchestrator::new(
        store.clone(),
        StepRegistry::standard().unwrap(),
        UpgraderConfig::default().with_workers(0),
    );

    let err = orchestrator.upgrade().await.unwrap_err();
    assert!(matches!(err, UpgradeError::Config(_)));
    assert!(!store.has_table("cc_ObjectBaseMapping").await.unwrap());
}
