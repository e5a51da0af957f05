//! Pod-to-pod and pod-to-service connectivity.

use k3s_validator_cluster::{ClusterClient, ClusterError, ServiceKind};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::{ShellOutcome, WebBackend, http_probe, probe_shell};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "networking",
    "pod-to-pod, service IP and service name connectivity",
);

const DEPENDENT: [&str; 3] = ["pod-to-pod", "service-ip", "service-name"];

pub struct Networking;

impl<C: ClusterClient> TestModule<C> for Networking {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let backend = ctx
            .setup(
                "backend-ready",
                WebBackend::deploy(ctx, "net", 1, ServiceKind::ClusterIp),
            )
            .await?;
        let Some(backend) = backend else {
            ctx.skip_all(&DEPENDENT, "connectivity target could not be deployed");
            return Ok(());
        };
        ctx.pass("backend-ready", format!("deployment {} available", backend.name));

        let outcome = async {
            ctx.check("pod-to-pod", pod_to_pod(ctx, &backend)).await?;
            ctx.check("service-ip", service_ip(ctx, &backend)).await?;
            ctx.check("service-name", service_name(ctx, &backend))
                .await?;
            Ok::<(), ModuleError>(())
        }
        .await;
        backend.teardown(ctx).await;
        outcome
    }
}

fn verdict(target: &str, outcome: &ShellOutcome) -> Verdict {
    if outcome.succeeded {
        Verdict::Pass(format!("reached {target}{}", outcome.attempts_note()))
    } else {
        Verdict::Fail(format!(
            "could not reach {target}{}: {}",
            outcome.attempts_note(),
            outcome.detail
        ))
    }
}

async fn pod_to_pod<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<Verdict, ClusterError> {
    let pods = ctx
        .client()
        .list_pods(ctx.namespace(), Some(&backend.selector))
        .await?;
    let Some(ip) = pods.iter().find_map(|p| p.pod_ip.clone()) else {
        return Ok(Verdict::Fail(format!(
            "no pod IP assigned to {} pods",
            backend.name
        )));
    };
    let target = format!("http://{ip}:{}", WebBackend::PORT);
    let outcome = probe_shell(ctx, "net-client", &http_probe(&target), None).await?;
    Ok(verdict(&target, &outcome))
}

async fn service_ip<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<Verdict, ClusterError> {
    let service = ctx
        .client()
        .get_service(ctx.namespace(), &backend.name)
        .await?;
    let Some(ip) = service.cluster_ip else {
        return Ok(Verdict::Fail(format!("service {} has no cluster IP", backend.name)));
    };
    let target = format!("http://{ip}:{}", WebBackend::PORT);
    let outcome = probe_shell(ctx, "net-client", &http_probe(&target), None).await?;
    Ok(verdict(&target, &outcome))
}

async fn service_name<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<Verdict, ClusterError> {
    let target = format!("http://{}:{}", backend.dns_name(), WebBackend::PORT);
    let outcome = probe_shell(ctx, "net-client", &http_probe(&target), None).await?;
    Ok(verdict(&target, &outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    #[tokio::test]
    async fn healthy_network_passes_and_cleans_up() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        let ctx = harness.context(INFO);
        Networking.run(&ctx).await.unwrap();
        let leftover = harness.cluster.list_pods(ctx.namespace(), None).await.unwrap();
        assert!(leftover.is_empty(), "{leftover:?}");
        drop(ctx);

        let suite = harness.finish().await;
        assert_eq!(
            statuses(&suite),
            vec![
                ("backend-ready".to_owned(), TestStatus::Pass),
                ("pod-to-pod".to_owned(), TestStatus::Pass),
                ("service-ip".to_owned(), TestStatus::Pass),
                ("service-name".to_owned(), TestStatus::Pass),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn broken_service_dns_fails_only_that_check() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_command(".svc.cluster.local");
        let harness = Harness::new(cluster).await;
        Networking.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 1);
        assert_eq!(suite.results()[3].name, "service-name");
        assert!(suite.results()[3].message.starts_with("could not reach http://net-"));
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_service_dns_passes_on_retry() {
        let cluster =
            SimulatedCluster::healthy_single_node().with_flaky_command(".svc.cluster.local", 1);
        let harness = Harness::new(cluster).await;
        Networking.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 0);
        let service_name = &suite.results()[3];
        assert_eq!(service_name.name, "service-name");
        assert_eq!(service_name.status, TestStatus::Pass);
        assert!(
            service_name.message.ends_with(" after 2 attempts"),
            "{}",
            service_name.message
        );
        assert!(!suite.results()[1].message.contains("attempts"));
    }

    #[tokio::test]
    async fn failed_deployment_skips_dependent_checks() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_operation("create_deployment");
        let harness = Harness::new(cluster).await;
        Networking.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 1);
        assert_eq!(suite.skipped(), 3);
    }
}
