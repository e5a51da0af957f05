//! Dry runs resolve modules without a cluster.

use std::sync::Arc;

use k3s_validator::modules::{DiscoveryStatus, ModuleRegistry};
use k3s_validator::orchestrator::Orchestrator;
use k3s_validator::report;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ReportFormat, ValidatorConfig};

use crate::helpers::runs::options;

#[tokio::test]
async fn test_e2e_dry_run_plans_every_module_without_cluster_calls() {
    let cluster = Arc::new(SimulatedCluster::healthy_single_node());
    let orchestrator: Orchestrator<SimulatedCluster> = Orchestrator::new(
        ValidatorConfig::default(),
        ModuleRegistry::with_builtin_modules(),
        options(&Category::ALL, false),
    );

    let plan = orchestrator.plan();
    assert_eq!(plan.len(), 18);
    assert!(plan.iter().all(|e| e.status == DiscoveryStatus::FoundBuiltin));
    assert!(cluster.calls().await.is_empty());

    let mut text = Vec::new();
    report::render_plan(&plan, ReportFormat::Text, &mut text).unwrap();
    let text = String::from_utf8(text).unwrap();
    assert!(text.starts_with("Execution plan (18 modules):"));
    assert!(text.contains("embedded-datastore"));
}

#[test]
fn test_e2e_dry_run_reports_missing_and_disabled() {
    let mut config = ValidatorConfig::default();
    config
        .modules
        .enabled
        .insert("security/api-tls".to_owned(), false);
    let registry = ModuleRegistry::<SimulatedCluster>::with_builtin_modules()
        .without(Category::Security, "pod-security");
    let orchestrator = Orchestrator::new(config, registry, options(&[Category::Security], false));

    let statuses: Vec<(&str, DiscoveryStatus)> = orchestrator
        .plan()
        .iter()
        .map(|e| (e.module, e.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("pod-security", DiscoveryStatus::Missing),
            ("api-tls", DiscoveryStatus::Disabled),
        ]
    );

    let mut json = Vec::new();
    report::render_plan(&orchestrator.plan(), ReportFormat::Json, &mut json).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed[0]["status"], "missing");
    assert_eq!(parsed[1]["category"], "security");
}
