//! Test results, the aggregate [`TestSuite`], and the collector task that owns it.
//!
//! Modules never touch the suite directly. Every assertion is sent as a
//! [`SuiteEvent`] through a [`Recorder`] into a single collector task, which
//! is the only writer of the counters. Concurrently running categories can
//! therefore record at the same time without locking, and the counters always
//! equal the number of stored results partitioned by status.
//!
//! ```text
//! Recorder (core) ──┐
//! Recorder (k3s)  ──┼──mpsc──> collector task ──> TestSuite
//! Recorder (perf) ──┘               │
//!                                   └──> ResultObserver (streaming text)
//! ```

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::metrics as m;
use crate::types::{Category, TestStatus};

/// Outcome of a single assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub category: Category,
    pub module: String,
    pub name: String,
    pub status: TestStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// How a module invocation ended.
///
/// `Missing` is counted separately from test-level skips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum ModuleOutcome {
    /// Entry point returned normally (individual tests may still have failed).
    Completed,
    /// Entry point returned an error or panicked.
    Failed { reason: String },
    /// No implementation was discovered.
    Missing,
    /// Disabled in configuration.
    Disabled,
    /// The run was interrupted before or while the module executed.
    Cancelled,
}

impl ModuleOutcome {
    /// Fixed label for metrics and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Missing => "missing",
            Self::Disabled => "disabled",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Execution record of one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub category: Category,
    pub module: String,
    pub outcome: ModuleOutcome,
    pub duration_ms: u64,
}

/// Message accepted by the collector.
#[derive(Debug, Clone)]
pub enum SuiteEvent {
    Result(TestResult),
    Module(ModuleRecord),
}

/// Aggregate results of one orchestrator run.
///
/// Only the collector task mutates a suite; once [`CollectorHandle::finish`]
/// returns it, the value is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuite {
    name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    passed: u64,
    failed: u64,
    warned: u64,
    skipped: u64,
    missing_modules: u64,
    results: Vec<TestResult>,
    modules: Vec<ModuleRecord>,
}

impl TestSuite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
            passed: 0,
            failed: 0,
            warned: 0,
            skipped: 0,
            missing_modules: 0,
            results: Vec::new(),
            modules: Vec::new(),
        }
    }

    fn record(&mut self, result: TestResult) {
        match result.status {
            TestStatus::Pass => self.passed += 1,
            TestStatus::Fail => self.failed += 1,
            TestStatus::Warn => self.warned += 1,
            TestStatus::Skip => self.skipped += 1,
        }
        self.results.push(result);
    }

    fn record_module(&mut self, record: ModuleRecord) {
        if record.outcome == ModuleOutcome::Missing {
            self.missing_modules += 1;
        }
        self.modules.push(record);
    }

    fn finalize(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn passed(&self) -> u64 {
        self.passed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn warned(&self) -> u64 {
        self.warned
    }

    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Modules that were selected but had no implementation.
    pub fn missing_modules(&self) -> u64 {
        self.missing_modules
    }

    pub fn results(&self) -> &[TestResult] {
        &self.results
    }

    pub fn modules(&self) -> &[ModuleRecord] {
        &self.modules
    }

    /// Number of recorded test results.
    pub fn total(&self) -> u64 {
        self.results.len() as u64
    }

    /// Wall-clock duration of the run, if finalized.
    pub fn duration(&self) -> Option<Duration> {
        self.finished_at
            .and_then(|end| (end - self.started_at).to_std().ok())
    }

    /// The run succeeds iff nothing failed. Warnings and skips never count.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Process exit code for this suite.
    pub fn exit_code(&self) -> i32 {
        if self.is_success() { 0 } else { 1 }
    }

    /// Counters equal the results partitioned by status.
    pub fn is_consistent(&self) -> bool {
        let count = |status: TestStatus| {
            self.results.iter().filter(|r| r.status == status).count() as u64
        };
        self.passed + self.failed + self.warned + self.skipped == self.total()
            && self.passed == count(TestStatus::Pass)
            && self.failed == count(TestStatus::Fail)
            && self.warned == count(TestStatus::Warn)
            && self.skipped == count(TestStatus::Skip)
    }

    /// Results belonging to one category, in recording order.
    pub fn results_for(&self, category: Category) -> impl Iterator<Item = &TestResult> {
        self.results.iter().filter(move |r| r.category == category)
    }
}

/// Receives every event as the collector stores it.
///
/// Used for incremental text output while the run is in progress.
pub trait ResultObserver: Send {
    fn on_result(&mut self, result: &TestResult);

    fn on_module(&mut self, _record: &ModuleRecord) {}
}

/// Handle modules use to record assertions.
///
/// Cheap to clone; every clone keeps the collector alive, so all recorders
/// must be dropped before [`CollectorHandle::finish`] can complete.
#[derive(Debug, Clone)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<SuiteEvent>,
    category: Option<Category>,
    module: String,
}

impl Recorder {
    /// A recorder scoped to one module.
    pub fn for_module(&self, category: Category, module: impl Into<String>) -> Self {
        Self {
            tx: self.tx.clone(),
            category: Some(category),
            module: module.into(),
        }
    }

    pub fn pass(&self, name: &str, message: impl Into<String>) {
        self.record(TestStatus::Pass, name, message);
    }

    pub fn fail(&self, name: &str, message: impl Into<String>) {
        self.record(TestStatus::Fail, name, message);
    }

    pub fn warn(&self, name: &str, message: impl Into<String>) {
        self.record(TestStatus::Warn, name, message);
    }

    pub fn skip(&self, name: &str, message: impl Into<String>) {
        self.record(TestStatus::Skip, name, message);
    }

    /// Record an assertion outcome for the scoped module.
    pub fn record(&self, status: TestStatus, name: &str, message: impl Into<String>) {
        let Some(category) = self.category else {
            error!(test = name, "recorder is not scoped to a module, result dropped");
            return;
        };
        let result = TestResult {
            category,
            module: self.module.clone(),
            name: name.to_owned(),
            status,
            message: message.into(),
            timestamp: Utc::now(),
        };
        self.send(SuiteEvent::Result(result));
    }

    /// Record how a module invocation ended.
    pub fn module_finished(&self, record: ModuleRecord) {
        self.send(SuiteEvent::Module(record));
    }

    fn send(&self, event: SuiteEvent) {
        if let Err(e) = self.tx.send(event) {
            error!(event = ?e.0, "result collector has stopped, event lost");
        }
    }
}

/// Owner of the collector task.
pub struct CollectorHandle {
    task: JoinHandle<TestSuite>,
}

impl CollectorHandle {
    /// Spawn the collector task and return the root recorder.
    pub fn spawn(
        suite_name: impl Into<String>,
        observer: Option<Box<dyn ResultObserver>>,
    ) -> (Recorder, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let suite = TestSuite::new(suite_name);
        let task = tokio::spawn(collect(suite, rx, observer));
        let recorder = Recorder {
            tx,
            category: None,
            module: String::new(),
        };
        (recorder, Self { task })
    }

    /// Drop the root recorder, drain remaining events and return the final suite.
    ///
    /// Waits until every other [`Recorder`] clone has been dropped.
    pub async fn finish(self, root: Recorder) -> TestSuite {
        drop(root);
        match self.task.await {
            Ok(suite) => suite,
            Err(e) => {
                error!(error = %e, "result collector task failed");
                let mut suite = TestSuite::new("aborted");
                suite.finalize();
                suite
            }
        }
    }
}

async fn collect(
    mut suite: TestSuite,
    mut rx: mpsc::UnboundedReceiver<SuiteEvent>,
    mut observer: Option<Box<dyn ResultObserver>>,
) -> TestSuite {
    while let Some(event) = rx.recv().await {
        match event {
            SuiteEvent::Result(result) => {
                metrics::counter!(m::RESULTS_TOTAL, m::LABEL_STATUS => result.status.as_str())
                    .increment(1);
                if let Some(observer) = observer.as_mut() {
                    observer.on_result(&result);
                }
                suite.record(result);
            }
            SuiteEvent::Module(record) => {
                metrics::counter!(m::MODULES_TOTAL, m::LABEL_OUTCOME => record.outcome.as_str())
                    .increment(1);
                #[allow(clippy::cast_precision_loss)]
                metrics::histogram!(m::MODULE_DURATION_SECONDS, m::LABEL_CATEGORY => record.category.as_str())
                    .record(record.duration_ms as f64 / 1000.0);
                if let Some(observer) = observer.as_mut() {
                    observer.on_module(&record);
                }
                suite.record_module(record);
            }
        }
    }

    suite.finalize();
    debug!(
        total = suite.total(),
        failed = suite.failed(),
        "result collector drained"
    );
    suite
}
