//! A healthy single-node cluster passes the core category.

use k3s_validator::report;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome, ReportFormat};

use crate::helpers::runs::{RunSpec, assert_fixture_released_once};

#[tokio::test(start_paused = true)]
async fn test_e2e_healthy_core_run_has_no_failures() {
    let (cluster, outcome) =
        RunSpec::new(SimulatedCluster::healthy_single_node(), &[Category::Core])
            .run()
            .await;
    let suite = &outcome.suite;

    assert_eq!(suite.failed(), 0, "unexpected failures: {:?}", suite.results());
    assert_eq!(outcome.exit_code(), 0);
    assert!(suite.is_consistent());
    assert_eq!(suite.modules().len(), 6);
    assert!(
        suite
            .modules()
            .iter()
            .all(|m| m.outcome == ModuleOutcome::Completed)
    );
    assert_fixture_released_once(&cluster).await;

    let mut text = Vec::new();
    report::render(suite, ReportFormat::Text, &mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.trim_end().ends_with("0 failed."), "report was:\n{text}");
}

#[tokio::test(start_paused = true)]
async fn test_e2e_results_stay_in_catalog_order() {
    let (_cluster, outcome) =
        RunSpec::new(SimulatedCluster::healthy_single_node(), &[Category::Core])
            .run()
            .await;
    let order: Vec<&str> = outcome
        .suite
        .modules()
        .iter()
        .map(|m| m.module.as_str())
        .collect();
    assert_eq!(
        order,
        vec!["api-server", "nodes", "system-pods", "networking", "dns", "storage"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_e2e_rendering_json_after_run() {
    let (_cluster, outcome) = RunSpec::new(
        SimulatedCluster::healthy_cluster(3, 1),
        &[Category::Production],
    )
    .run()
    .await;

    let mut json = Vec::new();
    report::render(&outcome.suite, ReportFormat::Json, &mut json).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed["success"], true);
    assert_eq!(parsed["failed"], 0);
    assert_eq!(parsed["name"], "k3s-validation");
    assert_eq!(parsed["modules"].as_array().unwrap().len(), 2);
}
