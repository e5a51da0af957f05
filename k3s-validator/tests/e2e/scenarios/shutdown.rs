//! Interrupted runs stop dispatching, release the fixture and exit 1.

use tokio_util::sync::CancellationToken;

use k3s_validator::modules::ModuleRegistry;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome};

use crate::helpers::modules::InterruptingNodes;
use crate::helpers::runs::{RunSpec, assert_fixture_released_once, module_outcome};

#[tokio::test(start_paused = true)]
async fn test_e2e_interrupt_mid_module_cancels_remaining_work() {
    let shutdown = CancellationToken::new();
    let mut registry = ModuleRegistry::with_builtin_modules();
    registry.register(InterruptingNodes {
        shutdown: shutdown.clone(),
    });

    let (cluster, outcome) = RunSpec::new(
        SimulatedCluster::healthy_single_node(),
        &[Category::Core, Category::Production],
    )
    .registry(registry)
    .shutdown(shutdown)
    .run()
    .await;
    let suite = &outcome.suite;

    assert!(outcome.interrupted);
    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(module_outcome(suite, "api-server"), Some(&ModuleOutcome::Completed));
    for module in [
        "nodes",
        "system-pods",
        "networking",
        "dns",
        "storage",
        "ha-control-plane",
        "default-storage-class",
    ] {
        assert_eq!(
            module_outcome(suite, module),
            Some(&ModuleOutcome::Cancelled),
            "{module}"
        );
    }
    assert_fixture_released_once(&cluster).await;
}

#[tokio::test(start_paused = true)]
async fn test_e2e_interrupt_before_start_still_releases_fixture() {
    let shutdown = CancellationToken::new();
    shutdown.cancel();
    let (cluster, outcome) =
        RunSpec::new(SimulatedCluster::healthy_single_node(), &Category::ALL)
            .shutdown(shutdown)
            .parallel()
            .run()
            .await;

    assert!(outcome.interrupted);
    assert_eq!(outcome.suite.total(), 0);
    assert_eq!(outcome.suite.modules().len(), 18);
    assert_fixture_released_once(&cluster).await;
}
