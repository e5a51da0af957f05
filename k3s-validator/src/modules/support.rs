//! Building blocks shared by several modules.

use std::fmt;

use k3s_validator_cluster::{
    ClusterClient, ClusterError, Condition, DeploymentRequest, PodPhase, PodRequest, ResourceRef,
    ServiceKind, ServiceRequest,
};

use crate::context::{ModuleContext, Retryable};

/// Result of a one-shot shell pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutcome {
    pub succeeded: bool,
    /// Last non-empty log line, or the pod phase when there is none.
    pub detail: String,
    /// Pods run before this outcome.
    pub attempts: u32,
}

impl ShellOutcome {
    /// `" after N attempts"` when the probe needed more than one pod.
    pub fn attempts_note(&self) -> String {
        if self.attempts > 1 {
            format!(" after {} attempts", self.attempts)
        } else {
            String::new()
        }
    }
}

/// Run `script` in a throwaway pod from the test image and report whether it
/// exited zero.
pub async fn run_shell<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    prefix: &str,
    script: impl Into<String>,
    node: Option<&str>,
) -> Result<ShellOutcome, ClusterError> {
    let mut pod = PodRequest::new(ctx.unique_name(prefix), ctx.test_image()).shell(script);
    if let Some(node) = node {
        pod = pod.on_node(node);
    }
    let (state, logs) = ctx.run_to_completion(&pod).await?;
    let detail = logs
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map_or_else(|| state.phase.to_string(), str::to_owned);
    Ok(ShellOutcome {
        succeeded: state.phase == PodPhase::Succeeded,
        detail,
        attempts: 1,
    })
}

#[derive(Debug)]
enum ProbeFailure {
    Cluster(ClusterError),
    Exited(ShellOutcome),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cluster(e) => e.fmt(f),
            Self::Exited(outcome) => write!(f, "probe exited non-zero: {}", outcome.detail),
        }
    }
}

impl Retryable for ProbeFailure {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Cluster(e) => e.is_retryable(),
            Self::Exited(_) => true,
        }
    }
}

/// [`run_shell`] repeated under the context's retry policy until the script
/// exits zero.
///
/// Endpoints and kube-proxy rules lag behind pod readiness, so network
/// probes go through here. The last unsuccessful outcome is returned once
/// the policy is exhausted.
pub async fn probe_shell<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    prefix: &str,
    script: &str,
    node: Option<&str>,
) -> Result<ShellOutcome, ClusterError> {
    let mut attempts = 0;
    let result = ctx
        .retry(prefix, || {
            attempts += 1;
            async move {
                match run_shell(ctx, prefix, script, node).await {
                    Ok(outcome) if outcome.succeeded => Ok(outcome),
                    Ok(outcome) => Err(ProbeFailure::Exited(outcome)),
                    Err(e) => Err(ProbeFailure::Cluster(e)),
                }
            }
        })
        .await;
    match result {
        Ok(outcome) | Err(ProbeFailure::Exited(outcome)) => {
            Ok(ShellOutcome { attempts, ..outcome })
        }
        Err(ProbeFailure::Cluster(e)) => Err(e),
    }
}

/// `wget` script that succeeds when `url` answers.
pub fn http_probe(url: &str) -> String {
    format!("wget -q -O /dev/null -T 5 {url}")
}

/// [`http_probe`] with the `Host` header set, for name-based routing.
pub fn http_probe_host(url: &str, host: &str) -> String {
    format!("wget -q -O /dev/null -T 5 --header 'Host: {host}' {url}")
}

/// A web deployment behind a service, used as a connectivity target.
#[derive(Debug, Clone)]
pub struct WebBackend {
    pub name: String,
    pub deployment: ResourceRef,
    pub service: ResourceRef,
    pub selector: String,
}

impl WebBackend {
    pub const PORT: i32 = 80;

    /// Create the deployment and service and wait until every replica is available.
    ///
    /// Anything already created is removed again when a step fails.
    pub async fn deploy<C: ClusterClient>(
        ctx: &ModuleContext<C>,
        prefix: &str,
        replicas: i32,
        kind: ServiceKind,
    ) -> Result<Self, ClusterError> {
        let name = ctx.unique_name(prefix);
        let request = DeploymentRequest::new(&name, ctx.web_image(), replicas).port(Self::PORT);
        let deployment = ctx.create_deployment(&request).await?;

        let mut service_request = ServiceRequest::new(&name, request.labels.clone(), Self::PORT);
        if kind == ServiceKind::LoadBalancer {
            service_request = service_request.load_balancer();
        }
        let service = match ctx.create_service(&service_request).await {
            Ok(service) => service,
            Err(e) => {
                ctx.cleanup(&deployment).await;
                return Err(e);
            }
        };

        let backend = Self {
            name,
            deployment,
            service,
            selector: request.selector(),
        };
        if let Err(e) = ctx
            .wait(
                &backend.deployment,
                Condition::DeploymentAvailable,
                ctx.timeouts().deployment_ready(),
            )
            .await
        {
            backend.teardown(ctx).await;
            return Err(e);
        }
        Ok(backend)
    }

    /// Service DNS name inside the cluster.
    pub fn dns_name(&self) -> String {
        format!("{}.{}.svc.cluster.local", self.name, self.service.namespace)
    }

    pub async fn teardown<C: ClusterClient>(&self, ctx: &ModuleContext<C>) {
        ctx.cleanup(&self.service).await;
        ctx.cleanup(&self.deployment).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::Harness;
    use crate::module::ModuleInfo;
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::Category;

    const INFO: ModuleInfo = ModuleInfo::new(Category::Core, "networking", "test");

    #[tokio::test]
    async fn shell_outcome_reflects_exit_status() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_command("unreachable.test");
        let harness = Harness::new(cluster).await;
        let ctx = harness.context(INFO);

        let ok = run_shell(&ctx, "probe", http_probe("http://10.43.0.1"), None)
            .await
            .unwrap();
        assert!(ok.succeeded);
        assert_eq!(ok.detail, "ok");

        let failed = run_shell(&ctx, "probe", http_probe("http://unreachable.test"), None)
            .await
            .unwrap();
        assert!(!failed.succeeded);
        assert!(failed.detail.ends_with("exit status 1"));

        drop(ctx);
        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probe_retries_until_the_script_succeeds() {
        let cluster = SimulatedCluster::healthy_single_node().with_flaky_command("10.43.0.1", 1);
        let harness = Harness::new(cluster).await;
        let ctx = harness.context(INFO);

        let outcome = probe_shell(&ctx, "probe", &http_probe("http://10.43.0.1"), None)
            .await
            .unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.attempts_note(), " after 2 attempts");
        assert_eq!(harness.cluster.count_calls("create_pod").await, 2);

        drop(ctx);
        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn probe_returns_last_failure_when_exhausted() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_command("unreachable.test");
        let harness = Harness::new(cluster).await;
        let ctx = harness.context(INFO);

        let outcome = probe_shell(&ctx, "probe", &http_probe("http://unreachable.test"), None)
            .await
            .unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, ctx.retry_policy().max_attempts);
        assert!(outcome.detail.ends_with("exit status 1"));

        drop(ctx);
        harness.finish().await;
    }

    #[tokio::test]
    async fn backend_deploys_and_tears_down() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        let ctx = harness.context(INFO);
        let backend = WebBackend::deploy(&ctx, "web", 2, ServiceKind::ClusterIp)
            .await
            .unwrap();
        let pods = harness
            .cluster
            .list_pods(ctx.namespace(), Some(&backend.selector))
            .await
            .unwrap();
        assert_eq!(pods.len(), 2);
        assert!(backend.dns_name().ends_with(".svc.cluster.local"));

        backend.teardown(&ctx).await;
        assert!(
            harness
                .cluster
                .get_service(ctx.namespace(), &backend.name)
                .await
                .unwrap_err()
                .is_not_found()
        );
        drop(ctx);
        harness.finish().await;
    }
}
