//! A failing or panicking module never takes its category down with it.

use k3s_validator::modules::ModuleRegistry;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome, TestStatus};

use crate::helpers::modules::PanickingDns;
use crate::helpers::runs::{RunSpec, assert_fixture_released_once, module_outcome, results_of};

#[tokio::test(start_paused = true)]
async fn test_e2e_panicking_module_is_recorded_and_category_continues() {
    let mut registry = ModuleRegistry::with_builtin_modules();
    registry.register(PanickingDns);
    let (cluster, outcome) = RunSpec::new(SimulatedCluster::healthy_single_node(), &[Category::Core])
        .registry(registry)
        .run()
        .await;
    let suite = &outcome.suite;

    match module_outcome(suite, "dns") {
        Some(ModuleOutcome::Failed { reason }) => {
            assert!(reason.contains("resolver state corrupted"), "{reason}");
        }
        other => panic!("dns should have failed, got {other:?}"),
    }
    assert_eq!(
        results_of(suite, "dns"),
        vec![("before-panic", TestStatus::Pass), ("entry-point", TestStatus::Fail)]
    );

    // storage runs after dns in the catalog
    assert_eq!(module_outcome(suite, "storage"), Some(&ModuleOutcome::Completed));
    assert!(!results_of(suite, "storage").is_empty());

    assert_eq!(suite.failed(), 1);
    assert_eq!(outcome.exit_code(), 1);
    assert!(outcome.aborted.is_none());
    assert_fixture_released_once(&cluster).await;
}

#[tokio::test(start_paused = true)]
async fn test_e2e_resource_errors_stay_local_to_the_check() {
    let cluster = SimulatedCluster::healthy_single_node().with_failing_operation("create_pvc");
    let (cluster, outcome) = RunSpec::new(cluster, &[Category::Core, Category::Production])
        .run()
        .await;
    let suite = &outcome.suite;

    assert!(outcome.aborted.is_none());
    assert!(suite.failed() >= 1);
    assert!(
        suite
            .modules()
            .iter()
            .all(|m| m.outcome == ModuleOutcome::Completed),
        "{:?}",
        suite.modules()
    );
    assert_eq!(suite.results_for(Category::Production).count(), 3);
    assert_fixture_released_once(&cluster).await;
}
