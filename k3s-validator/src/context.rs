//! Everything a module needs while it runs.
//!
//! A [`ModuleContext`] is built by the registry for one module invocation.
//! It carries the traced cluster client, the run's fixture, a recorder
//! scoped to the module, the category's tracer and the configuration.
//!
//! Resources created through the `create_*` helpers are registered with the
//! fixture, so they are deleted at release even when the module forgets or
//! fails before its own cleanup.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use k3s_validator_cluster::{
    ClusterClient, ClusterError, Condition, ConfigMapRequest, DaemonSetRequest,
    DeploymentRequest, Fixture, IngressRequest, PodRequest, PodState, PvcRequest, ResourceKind,
    ResourceRef, ServiceRequest, TracedClient, delete_resource, unique_name, wait_for_condition,
};
use k3s_validator_core::config::{ChecksConfig, TimeoutConfig};
use k3s_validator_core::{
    Recorder, RetryPolicy, TestStatus, Tracer, ValidatorConfig, with_error_recovery_if,
};

use crate::error::ModuleError;
use crate::module::ModuleInfo;

/// Outcome of one check, recorded by [`ModuleContext::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass(String),
    Fail(String),
    Warn(String),
    Skip(String),
}

impl Verdict {
    pub fn status(&self) -> TestStatus {
        match self {
            Self::Pass(_) => TestStatus::Pass,
            Self::Fail(_) => TestStatus::Fail,
            Self::Warn(_) => TestStatus::Warn,
            Self::Skip(_) => TestStatus::Skip,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Pass(m) | Self::Fail(m) | Self::Warn(m) | Self::Skip(m) => m,
        }
    }
}

/// Errors [`ModuleContext::retry`] may try again.
pub trait Retryable: fmt::Display {
    fn is_retryable(&self) -> bool;
}

/// Connection loss ends the run, so it is never retried.
impl Retryable for ClusterError {
    fn is_retryable(&self) -> bool {
        !self.is_fatal()
    }
}

pub struct ModuleContext<C: ClusterClient> {
    info: ModuleInfo,
    client: TracedClient<C>,
    fixture: Arc<Fixture<C>>,
    recorder: Recorder,
    tracer: Tracer,
    config: Arc<ValidatorConfig>,
    retry: RetryPolicy,
}

impl<C: ClusterClient> Clone for ModuleContext<C> {
    fn clone(&self) -> Self {
        Self {
            info: self.info,
            client: self.client.clone(),
            fixture: Arc::clone(&self.fixture),
            recorder: self.recorder.clone(),
            tracer: self.tracer.clone(),
            config: Arc::clone(&self.config),
            retry: self.retry,
        }
    }
}

impl<C: ClusterClient> ModuleContext<C> {
    /// Context for `info`, with `recorder` scoped to that module.
    pub fn new(
        info: ModuleInfo,
        client: TracedClient<C>,
        fixture: Arc<Fixture<C>>,
        recorder: &Recorder,
        tracer: Tracer,
        config: Arc<ValidatorConfig>,
    ) -> Self {
        let retry = RetryPolicy::from(&config.retry);
        Self {
            info,
            client,
            fixture,
            recorder: recorder.for_module(info.category, info.id),
            tracer,
            config,
            retry,
        }
    }

    // --- accessors ---

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn client(&self) -> &TracedClient<C> {
        &self.client
    }

    pub fn fixture(&self) -> &Arc<Fixture<C>> {
        &self.fixture
    }

    /// The run's fixture namespace.
    pub fn namespace(&self) -> &str {
        self.fixture.namespace()
    }

    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    pub fn checks(&self) -> &ChecksConfig {
        &self.config.checks
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.config.timeouts
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn test_image(&self) -> &str {
        &self.config.fixture.test_image
    }

    pub fn web_image(&self) -> &str {
        &self.config.fixture.web_image
    }

    // --- recording ---

    pub fn pass(&self, test: &str, message: impl Into<String>) {
        self.recorder.pass(test, message);
    }

    pub fn fail(&self, test: &str, message: impl Into<String>) {
        self.recorder.fail(test, message);
    }

    pub fn warn(&self, test: &str, message: impl Into<String>) {
        self.recorder.warn(test, message);
    }

    pub fn skip(&self, test: &str, message: impl Into<String>) {
        self.recorder.skip(test, message);
    }

    pub fn record(&self, status: TestStatus, test: &str, message: impl Into<String>) {
        self.recorder.record(status, test, message);
    }

    /// Run one check and record its verdict.
    ///
    /// A non-fatal cluster error is recorded as `fail` with the error text,
    /// which for timeouts includes the elapsed time and last observed state.
    /// A fatal error is returned so the run can abort.
    pub async fn check<F>(&self, test: &str, check: F) -> Result<(), ModuleError>
    where
        F: Future<Output = Result<Verdict, ClusterError>>,
    {
        let _frame = self.tracer.enter(format!("{}::{test}", self.info.id));
        match check.await {
            Ok(verdict) => {
                self.tracer.dump(test, &verdict);
                self.recorder.record(verdict.status(), test, verdict.message());
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.recorder.fail(test, e.to_string());
                Ok(())
            }
        }
    }

    /// Run a setup step that later checks depend on.
    ///
    /// A non-fatal failure is recorded as `fail` under `test` and yields
    /// `None`; the caller then skips the dependent checks.
    pub async fn setup<T, F>(&self, test: &str, step: F) -> Result<Option<T>, ModuleError>
    where
        F: Future<Output = Result<T, ClusterError>>,
    {
        match step.await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e.into()),
            Err(e) => {
                self.recorder.fail(test, e.to_string());
                Ok(None)
            }
        }
    }

    /// Record `skip` for every test in `tests`.
    pub fn skip_all(&self, tests: &[&str], reason: &str) {
        for test in tests {
            self.recorder.skip(test, reason);
        }
    }

    /// Retry `operation` under the configured policy.
    ///
    /// Errors that are not [`Retryable`] are returned on the first occurrence.
    pub async fn retry<T, E, F, Fut>(&self, operation: &str, attempt: F) -> Result<T, E>
    where
        E: Retryable,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _frame = self.tracer.enter(format!("retry {operation}"));
        with_error_recovery_if(operation, &self.retry, E::is_retryable, attempt).await
    }

    // --- resources ---

    /// `<prefix>-<8 hex chars>`.
    pub fn unique_name(&self, prefix: &str) -> String {
        unique_name(prefix)
    }

    pub async fn create_pod(&self, pod: &PodRequest) -> Result<ResourceRef, ClusterError> {
        self.client.create_pod(self.namespace(), pod).await?;
        Ok(self.track(ResourceRef::pod(self.namespace(), &pod.name)))
    }

    pub async fn create_pvc(&self, pvc: &PvcRequest) -> Result<ResourceRef, ClusterError> {
        self.client.create_pvc(self.namespace(), pvc).await?;
        Ok(self.track(ResourceRef::pvc(self.namespace(), &pvc.name)))
    }

    pub async fn create_deployment(
        &self,
        deployment: &DeploymentRequest,
    ) -> Result<ResourceRef, ClusterError> {
        self.client
            .create_deployment(self.namespace(), deployment)
            .await?;
        Ok(self.track(ResourceRef::deployment(self.namespace(), &deployment.name)))
    }

    pub async fn create_service(&self, service: &ServiceRequest) -> Result<ResourceRef, ClusterError> {
        self.client.create_service(self.namespace(), service).await?;
        Ok(self.track(ResourceRef::service(self.namespace(), &service.name)))
    }

    pub async fn create_ingress(&self, ingress: &IngressRequest) -> Result<ResourceRef, ClusterError> {
        self.client.create_ingress(self.namespace(), ingress).await?;
        Ok(self.track(ResourceRef::ingress(self.namespace(), &ingress.name)))
    }

    pub async fn create_daemonset(
        &self,
        daemonset: &DaemonSetRequest,
    ) -> Result<ResourceRef, ClusterError> {
        self.client
            .create_daemonset(self.namespace(), daemonset)
            .await?;
        Ok(self.track(ResourceRef::daemonset(self.namespace(), &daemonset.name)))
    }

    pub async fn create_config_map(
        &self,
        config_map: &ConfigMapRequest,
    ) -> Result<ResourceRef, ClusterError> {
        self.client
            .create_config_map(self.namespace(), config_map)
            .await?;
        Ok(self.track(ResourceRef::new(
            ResourceKind::ConfigMap,
            self.namespace(),
            &config_map.name,
        )))
    }

    fn track(&self, resource: ResourceRef) -> ResourceRef {
        self.fixture.track(resource.clone());
        resource
    }

    /// Best-effort delete; fixture release retries anything left behind.
    pub async fn cleanup(&self, resource: &ResourceRef) {
        if let Err(e) = delete_resource(&self.client, resource).await {
            warn!(
                module = %self.info,
                resource = %resource,
                error = %e,
                "module cleanup failed, fixture release will retry"
            );
        }
    }

    // --- waiting ---

    /// Wait for `condition` at the configured poll interval.
    pub async fn wait(
        &self,
        resource: &ResourceRef,
        condition: Condition,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        wait_for_condition(
            &self.client,
            resource,
            condition,
            timeout,
            self.timeouts().poll_interval(),
        )
        .await
    }

    /// Create a one-shot pod, wait for it to finish and return its final
    /// state and logs. The pod is deleted before returning.
    pub async fn run_to_completion(
        &self,
        pod: &PodRequest,
    ) -> Result<(PodState, String), ClusterError> {
        let resource = self.create_pod(pod).await?;
        let outcome = async {
            self.wait(&resource, Condition::PodCompleted, self.timeouts().pod_completion())
                .await?;
            let state = self.client.get_pod(self.namespace(), &pod.name).await?;
            let logs = self.client.pod_logs(self.namespace(), &pod.name).await?;
            Ok::<_, ClusterError>((state, logs))
        }
        .await;
        self.cleanup(&resource).await;
        outcome
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Context over a simulated cluster for module unit tests.

    use super::*;
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::{CollectorHandle, TestSuite};

    pub(crate) struct Harness {
        pub cluster: Arc<SimulatedCluster>,
        pub fixture: Arc<Fixture<SimulatedCluster>>,
        root: Recorder,
        collector: CollectorHandle,
        config: Arc<ValidatorConfig>,
    }

    impl Harness {
        pub(crate) async fn new(cluster: SimulatedCluster) -> Self {
            Self::with_config(cluster, ValidatorConfig::default()).await
        }

        pub(crate) async fn with_config(cluster: SimulatedCluster, config: ValidatorConfig) -> Self {
            let cluster = Arc::new(cluster);
            let fixture = Fixture::acquire(Arc::clone(&cluster), &config.fixture)
                .await
                .expect("fixture");
            let (root, collector) = CollectorHandle::spawn("unit", None);
            Self {
                cluster,
                fixture,
                root,
                collector,
                config: Arc::new(config),
            }
        }

        pub(crate) fn context(&self, info: ModuleInfo) -> ModuleContext<SimulatedCluster> {
            ModuleContext::new(
                info,
                TracedClient::new(Arc::clone(&self.cluster), Tracer::disabled()),
                Arc::clone(&self.fixture),
                &self.root,
                Tracer::disabled(),
                Arc::clone(&self.config),
            )
        }

        pub(crate) async fn finish(self) -> TestSuite {
            self.fixture.release().await;
            self.collector.finish(self.root).await
        }
    }

    pub(crate) fn statuses(suite: &TestSuite) -> Vec<(String, TestStatus)> {
        suite
            .results()
            .iter()
            .map(|r| (r.name.clone(), r.status))
            .collect()
    }
}
