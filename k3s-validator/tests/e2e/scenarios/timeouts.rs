//! Conditions that never hold are bounded by their timeouts.

use k3s_validator_cluster::{PvcBinding, SimulatedCluster};
use k3s_validator_core::{Category, TestStatus};

use crate::helpers::runs::{RunSpec, assert_fixture_released_once};

#[tokio::test(start_paused = true)]
async fn test_e2e_pvc_never_bound_fails_and_is_cleaned_up() {
    let cluster = SimulatedCluster::healthy_single_node().with_pvc_binding(PvcBinding::Never);
    let (cluster, outcome) = RunSpec::new(cluster, &[Category::Core]).run().await;
    let suite = &outcome.suite;

    let binding = suite
        .results()
        .iter()
        .find(|r| r.module == "storage" && r.name == "pvc-binding")
        .expect("pvc-binding result");
    assert_eq!(binding.status, TestStatus::Fail);
    assert!(binding.message.contains("timed out after 60"), "{}", binding.message);
    assert!(binding.message.contains("Pending"), "{}", binding.message);

    assert_eq!(suite.failed(), 1);
    assert_eq!(outcome.exit_code(), 1);
    assert!(cluster.count_calls("delete_pvc").await >= 1);
    assert_fixture_released_once(&cluster).await;
}
