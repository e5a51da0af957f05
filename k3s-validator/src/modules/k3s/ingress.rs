//! Traefik, the ingress controller k3s deploys by default.
//!
//! Besides the controller's own state, a throwaway backend is published
//! through an `Ingress` object and requested by host name via the Traefik
//! service.

use k3s_validator_cluster::{
    ClusterClient, ClusterError, IngressRequest, KUBE_SYSTEM, PodPhase, ServiceKind, ServiceState,
};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::{WebBackend, http_probe, http_probe_host, probe_shell};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::K3sSpecific,
    "ingress-controller",
    "Traefik ingress controller running, answering and routing by host",
);

const TRAEFIK_SELECTOR: &str = "app.kubernetes.io/name=traefik";
const TRAEFIK_SERVICE: &str = "traefik";

/// Never resolved through DNS; only sent as the `Host` header.
const ROUTING_DOMAIN: &str = "k3s-validator.test";

const DEPENDENT: [&str; 3] = ["load-balancer-ip", "entrypoint-responds", "ingress-routing"];

pub struct IngressController;

impl<C: ClusterClient> TestModule<C> for IngressController {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let pods = ctx
            .setup(
                "traefik-running",
                ctx.client().list_pods(KUBE_SYSTEM, Some(TRAEFIK_SELECTOR)),
            )
            .await?;
        let Some(pods) = pods else {
            ctx.skip_all(&DEPENDENT, "traefik state unknown");
            return Ok(());
        };
        // Clusters started with `--disable traefik` bring their own ingress.
        if pods.is_empty() {
            ctx.warn(
                "traefik-running",
                "no traefik pods, ingress disabled or replaced",
            );
            ctx.skip_all(&DEPENDENT, "traefik not installed");
            return Ok(());
        }

        let ready = pods
            .iter()
            .filter(|p| p.phase == PodPhase::Running && p.ready)
            .count();
        if ready == 0 {
            ctx.fail(
                "traefik-running",
                format!("0/{} traefik pods ready", pods.len()),
            );
        } else {
            ctx.pass(
                "traefik-running",
                format!("{ready}/{} traefik pods ready", pods.len()),
            );
        }

        let service = ctx
            .setup(
                "load-balancer-ip",
                ctx.client().get_service(KUBE_SYSTEM, TRAEFIK_SERVICE),
            )
            .await?;
        let Some(service) = service else {
            ctx.skip_all(&DEPENDENT[1..], "traefik service unavailable");
            return Ok(());
        };
        ctx.check("load-balancer-ip", async { Ok(lb_verdict(&service)) })
            .await?;
        ctx.check("entrypoint-responds", entrypoint(ctx, &service))
            .await?;
        ctx.check("ingress-routing", routing(ctx, &service)).await?;
        Ok(())
    }
}

fn lb_verdict(service: &ServiceState) -> Verdict {
    if service.load_balancer_ips.is_empty() {
        Verdict::Warn(format!(
            "service {} has no external IP, svclb may be disabled",
            service.name
        ))
    } else {
        Verdict::Pass(format!(
            "external IPs {}",
            service.load_balancer_ips.join(", ")
        ))
    }
}

/// Traefik answers unknown hosts with 404, which `wget` treats as failure,
/// so the probe only requires a TCP connection on the web entrypoint.
async fn entrypoint<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    service: &ServiceState,
) -> Result<Verdict, ClusterError> {
    let Some(ip) = &service.cluster_ip else {
        return Ok(Verdict::Fail("traefik service has no cluster IP".to_owned()));
    };
    let url = format!("http://{ip}:80/");
    let script = format!("{} || nc -z -w 5 {ip} 80", http_probe(&url));
    let outcome = probe_shell(ctx, "ingress-probe", &script, None).await?;
    Ok(if outcome.succeeded {
        Verdict::Pass(format!(
            "web entrypoint reachable at {ip}:80{}",
            outcome.attempts_note()
        ))
    } else {
        Verdict::Fail(format!("web entrypoint {ip}:80 unreachable: {}", outcome.detail))
    })
}

async fn routing<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    service: &ServiceState,
) -> Result<Verdict, ClusterError> {
    let Some(ip) = &service.cluster_ip else {
        return Ok(Verdict::Fail("traefik service has no cluster IP".to_owned()));
    };
    let backend = WebBackend::deploy(ctx, "ingress-web", 1, ServiceKind::ClusterIp).await?;
    let host = format!("{}.{ROUTING_DOMAIN}", backend.name);

    let outcome = async {
        let request = IngressRequest::new(&backend.name, &host, &backend.name, WebBackend::PORT);
        let ingress = ctx.create_ingress(&request).await?;
        let script = http_probe_host(&format!("http://{ip}:80/"), &host);
        let shell = probe_shell(ctx, "ingress-client", &script, None).await;
        ctx.cleanup(&ingress).await;
        let shell = shell?;
        Ok::<_, ClusterError>(if shell.succeeded {
            Verdict::Pass(format!(
                "{host} routed to service {}{}",
                backend.name,
                shell.attempts_note()
            ))
        } else {
            Verdict::Fail(format!(
                "{host} not routed to service {}{}: {}",
                backend.name,
                shell.attempts_note(),
                shell.detail
            ))
        })
    }
    .await;
    backend.teardown(ctx).await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    #[tokio::test]
    async fn default_traefik_passes() {
        let harness = Harness::new(SimulatedCluster::healthy_cluster(1, 2)).await;
        let ctx = harness.context(INFO);
        IngressController.run(&ctx).await.unwrap();
        assert!(
            harness
                .cluster
                .list_pods(ctx.namespace(), None)
                .await
                .unwrap()
                .is_empty()
        );
        drop(ctx);
        let suite = harness.finish().await;
        assert_eq!(
            statuses(&suite),
            vec![
                ("traefik-running".to_owned(), TestStatus::Pass),
                ("load-balancer-ip".to_owned(), TestStatus::Pass),
                ("entrypoint-responds".to_owned(), TestStatus::Pass),
                ("ingress-routing".to_owned(), TestStatus::Pass),
            ]
        );
        assert!(suite.results()[1].message.contains("192.168.1.101"));
        assert!(
            suite.results()[3]
                .message
                .contains(".k3s-validator.test routed to service ingress-web-")
        );
    }

    #[tokio::test]
    async fn routing_check_removes_its_ingress() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        let ctx = harness.context(INFO);
        IngressController.run(&ctx).await.unwrap();
        assert_eq!(harness.cluster.count_calls("create_ingress").await, 1);
        assert_eq!(harness.cluster.count_calls("delete_ingress").await, 1);
        drop(ctx);
        harness.finish().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unrouted_host_fails_only_routing() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_command("Host: ");
        let harness = Harness::new(cluster).await;
        IngressController.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 1);
        let routing = &suite.results()[3];
        assert_eq!(routing.name, "ingress-routing");
        assert!(routing.message.contains("not routed to service"), "{}", routing.message);
        assert!(routing.message.contains("after 3 attempts"));
    }

    #[tokio::test]
    async fn disabled_traefik_warns_and_skips() {
        let cluster = SimulatedCluster::healthy_single_node().without_system_pods("traefik");
        let harness = Harness::new(cluster).await;
        IngressController.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 0);
        assert_eq!(suite.warned(), 1);
        assert_eq!(suite.skipped(), 3);
    }

    #[test]
    fn missing_external_ip_warns() {
        let service = ServiceState {
            name: "traefik".to_owned(),
            ..ServiceState::default()
        };
        assert!(matches!(lb_verdict(&service), Verdict::Warn(_)));
    }
}
