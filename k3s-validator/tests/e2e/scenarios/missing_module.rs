//! A module with no implementation is counted, not failed.

use k3s_validator::modules::ModuleRegistry;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome};

use crate::helpers::runs::{RunSpec, assert_fixture_released_once, module_outcome, results_of};

#[tokio::test(start_paused = true)]
async fn test_e2e_missing_ingress_module_does_not_stop_category() {
    let registry = ModuleRegistry::with_builtin_modules()
        .without(Category::K3sSpecific, "ingress-controller");
    let (cluster, outcome) = RunSpec::new(
        SimulatedCluster::healthy_cluster(1, 2),
        &[Category::K3sSpecific],
    )
    .registry(registry)
    .run()
    .await;
    let suite = &outcome.suite;

    assert_eq!(suite.missing_modules(), 1);
    assert_eq!(
        module_outcome(suite, "ingress-controller"),
        Some(&ModuleOutcome::Missing)
    );
    assert!(results_of(suite, "ingress-controller").is_empty());

    for module in ["service-lb", "local-path", "embedded-datastore", "agent-server"] {
        assert_eq!(
            module_outcome(suite, module),
            Some(&ModuleOutcome::Completed),
            "{module}"
        );
        assert!(!results_of(suite, module).is_empty(), "{module} recorded nothing");
    }
    assert_eq!(suite.failed(), 0, "unexpected failures: {:?}", suite.results());
    assert_eq!(outcome.exit_code(), 0);
    assert_fixture_released_once(&cluster).await;
}

#[tokio::test(start_paused = true)]
async fn test_e2e_disabled_module_is_not_counted_as_missing() {
    let mut spec = RunSpec::new(
        SimulatedCluster::healthy_cluster(3, 1),
        &[Category::Production],
    );
    spec.config
        .modules
        .enabled
        .insert("production/default-storage-class".to_owned(), false);
    let (_cluster, outcome) = spec.run().await;

    assert_eq!(outcome.suite.missing_modules(), 0);
    assert_eq!(
        module_outcome(&outcome.suite, "default-storage-class"),
        Some(&ModuleOutcome::Disabled)
    );
    assert!(results_of(&outcome.suite, "default-storage-class").is_empty());
}
