//! Parallel and sequential runs aggregate the same counts.

use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::Category;

use crate::helpers::runs::{RunSpec, assert_fixture_released_once, counters};

#[tokio::test(start_paused = true)]
async fn test_e2e_parallel_matches_sequential_counts() {
    let categories = Category::ALL;

    let (seq_cluster, sequential) =
        RunSpec::new(SimulatedCluster::healthy_single_node(), &categories)
            .run()
            .await;
    let (par_cluster, parallel) =
        RunSpec::new(SimulatedCluster::healthy_single_node(), &categories)
            .parallel()
            .run()
            .await;

    assert_eq!(counters(&sequential.suite), counters(&parallel.suite));
    assert_eq!(sequential.suite.total(), parallel.suite.total());
    assert_eq!(
        sequential.suite.modules().len(),
        parallel.suite.modules().len()
    );
    assert!(parallel.suite.is_consistent());
    assert_eq!(sequential.exit_code(), parallel.exit_code());

    assert_fixture_released_once(&seq_cluster).await;
    assert_fixture_released_once(&par_cluster).await;
}

#[tokio::test(start_paused = true)]
async fn test_e2e_parallel_results_keep_module_order_within_category() {
    let (_cluster, outcome) = RunSpec::new(
        SimulatedCluster::healthy_single_node(),
        &[Category::Core, Category::Security],
    )
    .parallel()
    .run()
    .await;

    let core: Vec<&str> = outcome
        .suite
        .modules()
        .iter()
        .filter(|m| m.category == Category::Core)
        .map(|m| m.module.as_str())
        .collect();
    assert_eq!(
        core,
        vec!["api-server", "nodes", "system-pods", "networking", "dns", "storage"]
    );
}
