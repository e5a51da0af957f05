//! ServiceLB (klipper-lb): `LoadBalancer` services backed by per-node
//! `svclb-*` pods that forward host ports.

use std::collections::BTreeSet;

use k3s_validator_cluster::{
    ClusterClient, ClusterError, Condition, KUBE_SYSTEM, NodeInfo, SVCLB_SERVICE_LABEL,
    ServiceKind, ServiceState,
};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::WebBackend;

static INFO: ModuleInfo = ModuleInfo::new(
    Category::K3sSpecific,
    "service-lb",
    "LoadBalancer services get node IPs through svclb pods",
);

const DEPENDENT: [&str; 2] = ["svclb-per-node", "lb-ip-matches-nodes"];

pub struct ServiceLb;

impl<C: ClusterClient> TestModule<C> for ServiceLb {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let backend = ctx
            .setup(
                "lb-service",
                WebBackend::deploy(ctx, "svclb", 1, ServiceKind::LoadBalancer),
            )
            .await?;
        let Some(backend) = backend else {
            ctx.skip_all(&DEPENDENT, "load balancer backend could not be deployed");
            return Ok(());
        };

        let outcome = async {
            let Some(service) = ctx.setup("lb-service", assigned(ctx, &backend)).await? else {
                ctx.skip_all(&DEPENDENT, "no external IP assigned");
                return Ok(());
            };
            ctx.pass(
                "lb-service",
                format!("{} assigned {}", service.name, service.load_balancer_ips.join(", ")),
            );

            let nodes = ctx.client().list_nodes().await?;
            ctx.check("svclb-per-node", per_node(ctx, &backend.name, &nodes))
                .await?;
            ctx.check("lb-ip-matches-nodes", async {
                Ok(ip_verdict(&service, &nodes))
            })
            .await?;
            Ok::<(), ModuleError>(())
        }
        .await;
        backend.teardown(ctx).await;
        outcome
    }
}

async fn assigned<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<ServiceState, ClusterError> {
    ctx.wait(
        &backend.service,
        Condition::LoadBalancerAssigned,
        ctx.timeouts().load_balancer(),
    )
    .await?;
    ctx.client()
        .get_service(ctx.namespace(), &backend.name)
        .await
}

async fn per_node<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    service: &str,
    nodes: &[NodeInfo],
) -> Result<Verdict, ClusterError> {
    let selector = format!("{SVCLB_SERVICE_LABEL}={service}");
    let pods = ctx.client().list_pods(KUBE_SYSTEM, Some(&selector)).await?;
    let covered: BTreeSet<&str> = pods.iter().filter_map(|p| p.node.as_deref()).collect();
    Ok(coverage_verdict(&covered, nodes))
}

fn coverage_verdict(covered: &BTreeSet<&str>, nodes: &[NodeInfo]) -> Verdict {
    let uncovered: Vec<&str> = nodes
        .iter()
        .filter(|n| n.is_schedulable() && !covered.contains(n.name.as_str()))
        .map(|n| n.name.as_str())
        .collect();
    if covered.is_empty() {
        Verdict::Fail("no svclb pods scheduled".to_owned())
    } else if uncovered.is_empty() {
        Verdict::Pass(format!("svclb pods on {} node(s)", covered.len()))
    } else {
        Verdict::Fail(format!("no svclb pod on {}", uncovered.join(", ")))
    }
}

fn ip_verdict(service: &ServiceState, nodes: &[NodeInfo]) -> Verdict {
    let node_ips: BTreeSet<&str> = nodes.iter().filter_map(|n| n.internal_ip.as_deref()).collect();
    let foreign: Vec<&str> = service
        .load_balancer_ips
        .iter()
        .map(String::as_str)
        .filter(|ip| !node_ips.contains(ip))
        .collect();
    if foreign.is_empty() {
        Verdict::Pass("external IPs are node addresses".to_owned())
    } else {
        Verdict::Warn(format!(
            "external IPs {} are not node addresses, another load balancer may be installed",
            foreign.join(", ")
        ))
    }
}
