//! Run builders and suite inspection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use k3s_validator::modules::ModuleRegistry;
use k3s_validator::orchestrator::{Orchestrator, RunOptions, RunOutcome};
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::{Category, ModuleOutcome, TestStatus, TestSuite, TraceLevel, ValidatorConfig};

/// Prefix of every fixture namespace created with the default config.
pub const FIXTURE_PREFIX: &str = "k3s-test-";

pub fn options(categories: &[Category], parallel: bool) -> RunOptions {
    RunOptions {
        categories: categories.to_vec(),
        parallel,
        trace_level: TraceLevel::Off,
    }
}

/// Everything one E2E run needs.
pub struct RunSpec {
    pub cluster: SimulatedCluster,
    pub registry: ModuleRegistry<SimulatedCluster>,
    pub config: ValidatorConfig,
    pub categories: Vec<Category>,
    pub parallel: bool,
    pub shutdown: CancellationToken,
}

impl RunSpec {
    pub fn new(cluster: SimulatedCluster, categories: &[Category]) -> Self {
        Self {
            cluster,
            registry: ModuleRegistry::with_builtin_modules(),
            config: ValidatorConfig::default(),
            categories: categories.to_vec(),
            parallel: false,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(mut self, registry: ModuleRegistry<SimulatedCluster>) -> Self {
        self.registry = registry;
        self
    }

    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Execute the run, panicking if it cannot start.
    pub async fn run(self) -> (Arc<SimulatedCluster>, RunOutcome) {
        let cluster = Arc::new(self.cluster);
        let orchestrator = Orchestrator::new(
            self.config,
            self.registry,
            options(&self.categories, self.parallel),
        );
        let outcome = orchestrator
            .run(Arc::clone(&cluster), self.shutdown, None)
            .await
            .expect("run should start against a reachable cluster");
        (cluster, outcome)
    }
}

/// Fixture namespaces that still exist.
pub async fn fixture_namespaces(cluster: &SimulatedCluster) -> Vec<String> {
    cluster
        .namespaces()
        .await
        .into_iter()
        .filter(|ns| ns.starts_with(FIXTURE_PREFIX))
        .collect()
}

/// Assert the fixture was created once and deleted exactly once.
pub async fn assert_fixture_released_once(cluster: &SimulatedCluster) {
    assert_eq!(cluster.count_calls("create_namespace").await, 1);
    assert_eq!(
        cluster.count_calls("delete_namespace").await,
        1,
        "fixture namespace must be deleted exactly once"
    );
    assert!(
        fixture_namespaces(cluster).await.is_empty(),
        "fixture namespace left behind"
    );
}

pub fn module_outcome<'a>(suite: &'a TestSuite, module: &str) -> Option<&'a ModuleOutcome> {
    suite
        .modules()
        .iter()
        .find(|m| m.module == module)
        .map(|m| &m.outcome)
}

/// `(module, test, status)` for every result of `module`.
pub fn results_of<'a>(suite: &'a TestSuite, module: &str) -> Vec<(&'a str, TestStatus)> {
    suite
        .results()
        .iter()
        .filter(|r| r.module == module)
        .map(|r| (r.name.as_str(), r.status))
        .collect()
}

/// Status counters as a tuple: `(passed, failed, warned, skipped)`.
pub fn counters(suite: &TestSuite) -> (u64, u64, u64, u64) {
    (suite.passed(), suite.failed(), suite.warned(), suite.skipped())
}
