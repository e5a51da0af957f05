//! Module registry and discovery.
//!
//! Every category has a static list of module identifiers ([`catalog`]).
//! Just before a module runs, the [`ModuleRegistry`] resolves it:
//!
//! 1. disabled in configuration → reported as disabled, not counted
//! 2. built-in implementation registered → run in-process
//! 3. executable under `modules.external_dir` → run as a subprocess
//! 4. otherwise → one "module not found" warning, `missing_modules += 1`
//!
//! Modules of one category run strictly one after another; a failing or
//! panicking module never stops its category. Only loss of the cluster
//! connection ends the category early.

pub mod core_checks;
pub mod external;
pub mod failure;
pub mod k3s;
pub mod performance;
pub mod production;
pub mod security;
pub mod support;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use k3s_validator_cluster::{ClusterClient, ClusterError, Fixture, TracedClient};
use k3s_validator_core::{
    Category, ModuleOutcome, ModuleRecord, Recorder, SafeExecError, Tracer, ValidatorConfig,
    safe_exec,
};

use crate::context::ModuleContext;
use crate::error::ModuleError;
use crate::module::{DynTestModule, ModuleInfo, TestModule};

/// Module identifiers of `category`, in execution order.
pub fn catalog(category: Category) -> &'static [&'static str] {
    match category {
        Category::Core => &[
            "api-server",
            "nodes",
            "system-pods",
            "networking",
            "dns",
            "storage",
        ],
        Category::K3sSpecific => &[
            "ingress-controller",
            "service-lb",
            "local-path",
            "embedded-datastore",
            "agent-server",
        ],
        Category::Performance => &["pod-startup", "api-throughput"],
        Category::Security => &["pod-security", "api-tls"],
        Category::Failure => &["pod-recovery"],
        Category::Production => &["ha-control-plane", "default-storage-class"],
    }
}

/// How a module was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryStatus {
    FoundBuiltin,
    FoundExternal,
    Missing,
    Disabled,
}

impl DiscoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FoundBuiltin => "found-builtin",
            Self::FoundExternal => "found-external",
            Self::Missing => "missing",
            Self::Disabled => "disabled",
        }
    }
}

/// A resolved module.
pub enum Discovery<C: ClusterClient> {
    Builtin(Arc<dyn DynTestModule<C>>),
    External(PathBuf),
    Missing,
    Disabled,
}

impl<C: ClusterClient> Discovery<C> {
    pub fn status(&self) -> DiscoveryStatus {
        match self {
            Self::Builtin(_) => DiscoveryStatus::FoundBuiltin,
            Self::External(_) => DiscoveryStatus::FoundExternal,
            Self::Missing => DiscoveryStatus::Missing,
            Self::Disabled => DiscoveryStatus::Disabled,
        }
    }
}

/// One line of the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub category: Category,
    pub module: &'static str,
    pub status: DiscoveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// What one category run needs from the orchestrator.
pub struct CategoryRun<C: ClusterClient> {
    pub category: Category,
    pub client: Arc<C>,
    pub fixture: Arc<Fixture<C>>,
    pub recorder: Recorder,
    pub tracer: Tracer,
    pub config: Arc<ValidatorConfig>,
    pub shutdown: CancellationToken,
}

/// Typed map `(category, module id) -> implementation`.
pub struct ModuleRegistry<C: ClusterClient> {
    modules: HashMap<(Category, &'static str), Arc<dyn DynTestModule<C>>>,
    external_dir: Option<PathBuf>,
}

impl<C: ClusterClient> Default for ModuleRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClusterClient> ModuleRegistry<C> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
            external_dir: None,
        }
    }

    /// A registry holding every built-in module.
    pub fn with_builtin_modules() -> Self {
        let mut registry = Self::new();
        core_checks::register(&mut registry);
        k3s::register(&mut registry);
        performance::register(&mut registry);
        security::register(&mut registry);
        failure::register(&mut registry);
        production::register(&mut registry);
        registry
    }

    /// Register a module under its own category and id.
    ///
    /// A module with the same key replaces the previous one.
    pub fn register<M: TestModule<C>>(&mut self, module: M) {
        let info = *TestModule::info(&module);
        debug!(module = %info, "registering module");
        self.modules.insert((info.category, info.id), Arc::new(module));
    }

    /// Remove a built-in module, leaving discovery to fall through.
    pub fn without(mut self, category: Category, id: &str) -> Self {
        self.modules.retain(|(c, m), _| !(*c == category && *m == id));
        self
    }

    /// Look for out-of-tree modules under `dir`.
    pub fn with_external_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.external_dir = Some(dir.into());
        self
    }

    pub fn external_dir(&self) -> Option<&Path> {
        self.external_dir.as_deref()
    }

    /// Number of registered built-in modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Resolve one catalog entry.
    pub fn discover(
        &self,
        category: Category,
        id: &'static str,
        config: &ValidatorConfig,
    ) -> Discovery<C> {
        if !config.module_enabled(category, id) {
            return Discovery::Disabled;
        }
        if let Some(module) = self.modules.get(&(category, id)) {
            return Discovery::Builtin(Arc::clone(module));
        }
        self.external_dir()
            .and_then(|dir| external::locate(dir, category.as_str(), id))
            .map_or(Discovery::Missing, Discovery::External)
    }

    /// Resolve every module of `categories` without running anything.
    pub fn plan(&self, categories: &[Category], config: &ValidatorConfig) -> Vec<PlanEntry> {
        categories
            .iter()
            .flat_map(|&category| {
                catalog(category).iter().map(move |&module| {
                    let discovery = self.discover(category, module, config);
                    let path = match &discovery {
                        Discovery::External(path) => Some(path.clone()),
                        _ => None,
                    };
                    PlanEntry {
                        category,
                        module,
                        status: discovery.status(),
                        path,
                    }
                })
            })
            .collect()
    }

    /// Run every module of one category in catalog order.
    ///
    /// Returns `Err` only when the cluster became unreachable; the remaining
    /// modules of the category are then not started.
    pub async fn run_category(&self, run: &CategoryRun<C>) -> Result<(), ClusterError> {
        let category = run.category;
        let _frame = run.tracer.enter(category.as_str());
        info!(category = %category, state = "dispatching", "category started");

        for &id in catalog(category) {
            let started = Instant::now();
            let finish = |outcome: ModuleOutcome| {
                run.recorder.module_finished(ModuleRecord {
                    category,
                    module: id.to_owned(),
                    outcome,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
            };

            if run.shutdown.is_cancelled() {
                debug!(category = %category, module = id, "run interrupted, module not started");
                finish(ModuleOutcome::Cancelled);
                continue;
            }

            let discovery = self.discover(category, id, &run.config);
            debug!(
                category = %category,
                module = id,
                state = "discovered",
                status = discovery.status().as_str(),
                "module resolved"
            );

            let (info, external_path) = match discovery {
                Discovery::Disabled => {
                    info!(category = %category, module = id, "module disabled in configuration");
                    finish(ModuleOutcome::Disabled);
                    continue;
                }
                Discovery::Missing => {
                    warn!(category = %category, module = id, "module not found");
                    finish(ModuleOutcome::Missing);
                    continue;
                }
                Discovery::Builtin(module) => (*module.info(), Either::Builtin(module)),
                Discovery::External(path) => (
                    ModuleInfo::new(category, id, "external module"),
                    Either::External(path),
                ),
            };

            let ctx = ModuleContext::new(
                info,
                TracedClient::new(Arc::clone(&run.client), run.tracer.clone()),
                Arc::clone(&run.fixture),
                &run.recorder,
                run.tracer.clone(),
                Arc::clone(&run.config),
            );

            let outcome = self.execute(info, external_path, ctx, run).await;
            match outcome {
                Ok(outcome) => {
                    info!(
                        category = %category,
                        module = id,
                        state = outcome.as_str(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "module finished"
                    );
                    finish(outcome);
                }
                Err(e) => {
                    error!(category = %category, module = id, error = %e, "cluster unreachable, aborting category");
                    finish(ModuleOutcome::Failed {
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }

        info!(category = %category, state = "complete", "category finished");
        Ok(())
    }

    async fn execute(
        &self,
        info: ModuleInfo,
        target: Either<C>,
        ctx: ModuleContext<C>,
        run: &CategoryRun<C>,
    ) -> Result<ModuleOutcome, ClusterError> {
        let key = info.key();
        let _frame = run.tracer.enter(key.clone());
        let _safe = run.tracer.enter_safe_mode();
        debug!(module = %info, state = "executing", "module started");

        let recorder_ctx = ctx.clone();
        let task = async move {
            match target {
                Either::Builtin(module) => module.run(&ctx).await,
                Either::External(path) => external::run(&path, &ctx).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = run.shutdown.cancelled() => return Ok(ModuleOutcome::Cancelled),
            result = safe_exec(&key, task) => result,
        };

        match result {
            Ok(()) => Ok(ModuleOutcome::Completed),
            Err(SafeExecError::Failed { error, .. }) => {
                if let ModuleError::Cluster(e) = error {
                    if e.is_fatal() {
                        recorder_ctx.fail("entry-point", e.to_string());
                        return Err(e);
                    }
                    recorder_ctx.fail("entry-point", format!("module failed: {e}"));
                    return Ok(ModuleOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
                recorder_ctx.fail("entry-point", format!("module failed: {error}"));
                Ok(ModuleOutcome::Failed {
                    reason: error.to_string(),
                })
            }
            Err(SafeExecError::Panicked { message, .. }) => {
                recorder_ctx.fail("entry-point", format!("module panicked: {message}"));
                Ok(ModuleOutcome::Failed {
                    reason: format!("panicked: {message}"),
                })
            }
            Err(SafeExecError::Cancelled { .. }) => Ok(ModuleOutcome::Cancelled),
        }
    }
}

enum Either<C: ClusterClient> {
    Builtin(Arc<dyn DynTestModule<C>>),
    External(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use k3s_validator_cluster::SimulatedCluster;

    type Registry = ModuleRegistry<SimulatedCluster>;

    #[test]
    fn catalog_ids_are_unique_and_dns_safe() {
        let mut total = 0;
        for category in Category::ALL {
            let ids = catalog(category);
            let mut sorted = ids.to_vec();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), ids.len(), "{category}");
            for id in ids {
                assert!(k3s_validator_core::naming::validate_dns_label(id).is_ok(), "{id}");
            }
            total += ids.len();
        }
        assert_eq!(total, 18);
    }

    #[test]
    fn every_catalog_entry_has_a_builtin() {
        let registry = Registry::with_builtin_modules();
        assert_eq!(registry.count(), 18);
        let config = ValidatorConfig::default();
        for entry in registry.plan(&Category::ALL, &config) {
            assert_eq!(entry.status, DiscoveryStatus::FoundBuiltin, "{}", entry.module);
        }
    }

    #[test]
    fn removed_module_is_missing() {
        let registry = Registry::with_builtin_modules().without(Category::K3sSpecific, "ingress-controller");
        let config = ValidatorConfig::default();
        let plan = registry.plan(&[Category::K3sSpecific], &config);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0].module, "ingress-controller");
        assert_eq!(plan[0].status, DiscoveryStatus::Missing);
        assert!(plan[1..].iter().all(|e| e.status == DiscoveryStatus::FoundBuiltin));
    }

    #[test]
    fn disabled_wins_over_builtin() {
        let registry = Registry::with_builtin_modules();
        let mut config = ValidatorConfig::default();
        config.modules.enabled.insert("core/dns".to_owned(), false);
        let discovery = registry.discover(Category::Core, "dns", &config);
        assert_eq!(discovery.status(), DiscoveryStatus::Disabled);
    }

    #[cfg(unix)]
    #[test]
    fn external_executable_fills_a_gap() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("security")).unwrap();
        let script = dir.path().join("security").join("api-tls.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let registry = Registry::with_builtin_modules()
            .without(Category::Security, "api-tls")
            .with_external_dir(dir.path());
        let plan = registry.plan(&[Category::Security], &ValidatorConfig::default());
        assert_eq!(plan[1].status, DiscoveryStatus::FoundExternal);
        assert_eq!(plan[1].path.as_deref(), Some(script.as_path()));
    }
}
