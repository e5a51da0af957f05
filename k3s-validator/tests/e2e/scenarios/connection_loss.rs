//! Losing the API server aborts the run; nothing else does.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use k3s_validator::modules::ModuleRegistry;
use k3s_validator::orchestrator::Orchestrator;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome, ValidatorConfig};

use crate::helpers::runs::{RunSpec, assert_fixture_released_once, module_outcome, options};

#[tokio::test(start_paused = true)]
async fn test_e2e_unreachable_at_startup_creates_no_fixture() {
    let cluster = Arc::new(SimulatedCluster::healthy_single_node().unreachable());
    let orchestrator = Orchestrator::new(
        ValidatorConfig::default(),
        ModuleRegistry::with_builtin_modules(),
        options(&Category::ALL, false),
    );
    let err = orchestrator
        .run(Arc::clone(&cluster), CancellationToken::new(), None)
        .await
        .expect_err("unreachable cluster must abort");
    assert!(err.is_fatal());
    assert_eq!(cluster.count_calls("create_namespace").await, 0);
    assert_eq!(cluster.count_calls("delete_namespace").await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_connection_loss_mid_run_aborts_and_releases() {
    let cluster = SimulatedCluster::healthy_single_node().with_unreachable_operation("list_nodes");
    let (cluster, outcome) = RunSpec::new(cluster, &[Category::Core, Category::Production])
        .run()
        .await;
    let suite = &outcome.suite;

    assert!(outcome.aborted.is_some());
    assert!(!outcome.interrupted);
    assert_eq!(outcome.exit_code(), 1);
    assert!(suite.failed() >= 1);
    assert!(matches!(
        module_outcome(suite, "api-server"),
        Some(ModuleOutcome::Failed { .. })
    ));
    // core stops at the failing module; later categories are cancelled
    assert_eq!(module_outcome(suite, "storage"), None);
    assert_eq!(
        module_outcome(suite, "ha-control-plane"),
        Some(&ModuleOutcome::Cancelled)
    );
    assert_fixture_released_once(&cluster).await;
}
