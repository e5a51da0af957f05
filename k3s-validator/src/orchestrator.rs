//! Run orchestration -- fixture lifecycle, category dispatch and result collection.
//!
//! The [`Orchestrator`] owns one validation run against one cluster.
//!
//! # Run States
//!
//! ```text
//! initializing -> fixture-acquired -> categories-running -> fixture-released
//!              -> reporting -> success | failure
//! ```
//!
//! Every transition is logged. The fixture namespace is released on every
//! path once it has been acquired: normal completion, loss of the cluster
//! connection, or interruption through the shutdown token.
//!
//! # Parallelism
//!
//! Sequential runs execute categories in the order given. With `parallel`
//! each category gets its own task and its own [`Tracer`] fork; modules
//! inside a category always run one after another.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use k3s_validator_cluster::{ClusterClient, ClusterError, Fixture, ReleaseSummary};
use k3s_validator_core::{
    Category, CollectorHandle, ResultObserver, TestSuite, TraceLevel, Tracer, ValidatorConfig,
};

use crate::modules::{CategoryRun, ModuleRegistry, PlanEntry};

const SUITE_NAME: &str = "k3s-validation";

/// Run-level state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Initializing,
    FixtureAcquired,
    CategoriesRunning,
    FixtureReleased,
    Reporting,
    Success,
    Failure,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::FixtureAcquired => "fixture-acquired",
            Self::CategoriesRunning => "categories-running",
            Self::FixtureReleased => "fixture-released",
            Self::Reporting => "reporting",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options taken from the command line.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Categories to run, in order.
    pub categories: Vec<Category>,
    pub parallel: bool,
    pub trace_level: TraceLevel,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            categories: Category::ALL.to_vec(),
            parallel: false,
            trace_level: TraceLevel::Off,
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub suite: TestSuite,
    /// The shutdown token fired before all categories finished.
    pub interrupted: bool,
    /// Set when the cluster became unreachable mid-run.
    pub aborted: Option<String>,
    pub release: ReleaseSummary,
}

impl RunOutcome {
    /// Process exit status: `0` only for a complete run without failures.
    pub fn exit_code(&self) -> i32 {
        if self.interrupted || self.aborted.is_some() {
            1
        } else {
            self.suite.exit_code()
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}

/// Coordinates one validation run.
pub struct Orchestrator<C: ClusterClient> {
    config: Arc<ValidatorConfig>,
    registry: Arc<ModuleRegistry<C>>,
    options: RunOptions,
}

impl<C: ClusterClient> Orchestrator<C> {
    /// Build an orchestrator.
    ///
    /// `modules.external_dir` from the configuration is applied to the
    /// registry unless the registry already has one.
    pub fn new(config: ValidatorConfig, registry: ModuleRegistry<C>, options: RunOptions) -> Self {
        let registry = if registry.external_dir().is_none() && !config.modules.external_dir.is_empty()
        {
            registry.with_external_dir(&config.modules.external_dir)
        } else {
            registry
        };
        info!(
            modules = registry.count(),
            categories = options.categories.len(),
            parallel = options.parallel,
            trace = %options.trace_level,
            "orchestrator initialized"
        );
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            options,
        }
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Resolve every selected module without touching the cluster.
    pub fn plan(&self) -> Vec<PlanEntry> {
        self.registry.plan(&self.options.categories, &self.config)
    }

    /// Execute the run.
    ///
    /// # Errors
    ///
    /// Returns an error only when the cluster cannot be reached or the
    /// fixture namespace cannot be created; nothing is left behind in that
    /// case. Everything after fixture acquisition ends in a [`RunOutcome`].
    pub async fn run(
        &self,
        client: Arc<C>,
        shutdown: CancellationToken,
        observer: Option<Box<dyn ResultObserver>>,
    ) -> Result<RunOutcome, ClusterError> {
        let started = Instant::now();
        transition(RunState::Initializing);

        let version = client.server_version().await.map_err(|e| {
            error!(endpoint = %client.endpoint(), error = %e, "cluster unreachable");
            e
        })?;
        info!(endpoint = %client.endpoint(), version = %version, "connected to cluster");

        let fixture = Fixture::acquire(Arc::clone(&client), &self.config.fixture).await?;
        transition(RunState::FixtureAcquired);

        let (root, collector) = CollectorHandle::spawn(SUITE_NAME, observer);
        let tracer = Tracer::new(self.options.trace_level);
        // Cancelled on interrupt (parent) or on a fatal category error.
        let cancel = shutdown.child_token();

        transition(RunState::CategoriesRunning);
        let runs: Vec<CategoryRun<C>> = self
            .options
            .categories
            .iter()
            .map(|&category| CategoryRun {
                category,
                client: Arc::clone(&client),
                fixture: Arc::clone(&fixture),
                recorder: root.clone(),
                tracer: if self.options.parallel {
                    tracer.fork(category.as_str())
                } else {
                    tracer.clone()
                },
                config: Arc::clone(&self.config),
                shutdown: cancel.clone(),
            })
            .collect();

        let aborted = if self.options.parallel {
            self.run_parallel(runs).await
        } else {
            self.run_sequential(runs).await
        };

        let release = fixture.release().await;
        transition(RunState::FixtureReleased);
        if release.failures > 0 {
            warn!(
                failures = release.failures,
                namespace = %fixture.namespace(),
                "fixture cleanup incomplete"
            );
        }
        drop(fixture);

        let suite = collector.finish(root).await;
        transition(RunState::Reporting);

        let outcome = RunOutcome {
            suite,
            interrupted: shutdown.is_cancelled(),
            aborted,
            release,
        };
        let terminal = if outcome.is_success() {
            RunState::Success
        } else {
            RunState::Failure
        };
        info!(
            state = %terminal,
            total = outcome.suite.total(),
            failed = outcome.suite.failed(),
            missing_modules = outcome.suite.missing_modules(),
            interrupted = outcome.interrupted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(outcome)
    }

    async fn run_sequential(&self, runs: Vec<CategoryRun<C>>) -> Option<String> {
        let mut aborted = None;
        for run in runs {
            if let Err(e) = self.registry.run_category(&run).await {
                run.shutdown.cancel();
                aborted.get_or_insert_with(|| e.to_string());
            }
        }
        aborted
    }

    async fn run_parallel(&self, runs: Vec<CategoryRun<C>>) -> Option<String> {
        let handles: Vec<_> = runs
            .into_iter()
            .map(|run| {
                let registry = Arc::clone(&self.registry);
                let category = run.category;
                let handle = tokio::spawn(async move {
                    let result = registry.run_category(&run).await;
                    if result.is_err() {
                        run.shutdown.cancel();
                    }
                    result
                });
                (category, handle)
            })
            .collect();

        let mut aborted = None;
        for (category, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    aborted.get_or_insert_with(|| e.to_string());
                }
                Err(e) => {
                    error!(category = %category, error = %e, "category task failed");
                    aborted.get_or_insert_with(|| format!("category {category} task failed: {e}"));
                }
            }
        }
        aborted
    }
}

fn transition(state: RunState) {
    info!(state = %state, "run state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::ModuleOutcome;

    fn orchestrator(categories: &[Category], parallel: bool) -> Orchestrator<SimulatedCluster> {
        Orchestrator::new(
            ValidatorConfig::default(),
            ModuleRegistry::with_builtin_modules(),
            RunOptions {
                categories: categories.to_vec(),
                parallel,
                trace_level: TraceLevel::Off,
            },
        )
    }

    #[test]
    fn exit_code_reflects_interruption() {
        let mut outcome = RunOutcome {
            suite: TestSuite::new("unit"),
            interrupted: false,
            aborted: None,
            release: ReleaseSummary::default(),
        };
        assert_eq!(outcome.exit_code(), 0);
        outcome.interrupted = true;
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn unreachable_cluster_creates_nothing() {
        let cluster = Arc::new(SimulatedCluster::healthy_single_node().unreachable());
        let err = orchestrator(&[Category::Core], false)
            .run(Arc::clone(&cluster), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(cluster.count_calls("create_namespace").await, 0);
    }

    #[tokio::test]
    async fn production_run_releases_fixture_once() {
        let cluster = Arc::new(SimulatedCluster::healthy_cluster(3, 1));
        let outcome = orchestrator(&[Category::Production], false)
            .run(Arc::clone(&cluster), CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(outcome.release.performed);
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.suite.modules().len(), 2);
        assert!(
            outcome
                .suite
                .modules()
                .iter()
                .all(|m| m.outcome == ModuleOutcome::Completed)
        );
        assert_eq!(cluster.count_calls("delete_namespace").await, 1);
    }

    #[tokio::test]
    async fn pre_cancelled_run_records_cancelled_modules() {
        let cluster = Arc::new(SimulatedCluster::healthy_single_node());
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let outcome = orchestrator(&[Category::Security, Category::Failure], true)
            .run(Arc::clone(&cluster), shutdown, None)
            .await
            .unwrap();
        assert!(outcome.interrupted);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.suite.total(), 0);
        assert!(
            outcome
                .suite
                .modules()
                .iter()
                .all(|m| m.outcome == ModuleOutcome::Cancelled)
        );
        assert_eq!(cluster.count_calls("delete_namespace").await, 1);
    }
}
