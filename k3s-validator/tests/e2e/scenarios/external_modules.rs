//! Modules without a built-in implementation fall back to executables.
//!
//! Serialized: writing a script while another test forks can fail the
//! exec with `ETXTBSY`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serial_test::serial;

use k3s_validator::modules::{DiscoveryStatus, ModuleRegistry};
use k3s_validator::orchestrator::Orchestrator;
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome, TestStatus};

use crate::helpers::runs::{
    RunSpec, assert_fixture_released_once, module_outcome, options, results_of,
};

fn write_script(dir: &Path, category: &str, name: &str, body: &str) {
    let category_dir = dir.join(category);
    fs::create_dir_all(&category_dir).unwrap();
    let path = category_dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

#[tokio::test]
#[serial]
async fn test_e2e_external_script_replaces_missing_module() {
    let dir = tempfile::tempdir().unwrap();
    write_script(
        dir.path(),
        "production",
        "default-storage-class.sh",
        r#"echo "PASS namespace: $TEST_NAMESPACE"
echo "WARN module: $TEST_CATEGORY/$TEST_MODULE"
echo "not a result line""#,
    );
    let registry = ModuleRegistry::with_builtin_modules()
        .without(Category::Production, "default-storage-class")
        .with_external_dir(dir.path());

    let (cluster, outcome) = RunSpec::new(
        SimulatedCluster::healthy_cluster(3, 1),
        &[Category::Production],
    )
    .registry(registry)
    .run()
    .await;
    let suite = &outcome.suite;

    assert_eq!(suite.missing_modules(), 0);
    assert_eq!(
        module_outcome(suite, "default-storage-class"),
        Some(&ModuleOutcome::Completed)
    );
    assert_eq!(
        results_of(suite, "default-storage-class"),
        vec![("namespace", TestStatus::Pass), ("module", TestStatus::Warn)]
    );
    let namespace = &suite
        .results()
        .iter()
        .find(|r| r.name == "namespace")
        .unwrap()
        .message;
    assert!(namespace.starts_with("k3s-test-"), "{namespace}");
    let module = &suite.results().iter().find(|r| r.name == "module").unwrap().message;
    assert_eq!(module, "production/default-storage-class");
    assert_fixture_released_once(&cluster).await;
}

#[tokio::test]
#[serial]
async fn test_e2e_failing_script_records_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    write_script(dir.path(), "security", "api-tls", "echo 'boom' >&2\nexit 3");
    let registry = ModuleRegistry::<SimulatedCluster>::with_builtin_modules()
        .without(Category::Security, "api-tls")
        .with_external_dir(dir.path());

    let mut spec = RunSpec::new(SimulatedCluster::healthy_single_node(), &[Category::Security]);
    spec.config
        .modules
        .enabled
        .insert("security/pod-security".to_owned(), false);
    let plan = Orchestrator::new(
        spec.config.clone(),
        ModuleRegistry::<SimulatedCluster>::new().with_external_dir(dir.path()),
        options(&[Category::Security], false),
    )
    .plan();
    assert_eq!(plan[1].status, DiscoveryStatus::FoundExternal);

    let (_cluster, outcome) = spec.registry(registry).run().await;
    let results = results_of(&outcome.suite, "api-tls");
    assert_eq!(results, vec![("exit-status", TestStatus::Fail)]);
    let message = &outcome.suite.results()[0].message;
    assert!(message.ends_with(": boom"), "{message}");
    assert_eq!(outcome.exit_code(), 1);
}
