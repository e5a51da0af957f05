//! `failure` category: the cluster recovers from losing workload pods.

use std::collections::BTreeSet;

use tokio::time::Instant;

use k3s_validator_cluster::{
    ClusterClient, ClusterError, Condition, PodPhase, Probe, ServiceKind, wait_for,
};
use k3s_validator_core::Category;

use super::ModuleRegistry;
use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::WebBackend;

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(PodRecovery);
}

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Failure,
    "pod-recovery",
    "deleted deployment pods are replaced and replicas spread across nodes",
);

const REPLICAS: i32 = 2;

pub struct PodRecovery;

impl<C: ClusterClient> TestModule<C> for PodRecovery {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let backend = ctx
            .setup(
                "deployment-self-heals",
                WebBackend::deploy(ctx, "recovery", REPLICAS, ServiceKind::ClusterIp),
            )
            .await?;
        let Some(backend) = backend else {
            ctx.skip("replicas-spread", "deployment never became available");
            return Ok(());
        };

        let outcome = async {
            ctx.check("replicas-spread", spread(ctx, &backend)).await?;
            ctx.check("deployment-self-heals", self_heal(ctx, &backend))
                .await?;
            Ok::<(), ModuleError>(())
        }
        .await;
        backend.teardown(ctx).await;
        outcome
    }
}

async fn spread<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<Verdict, ClusterError> {
    let schedulable = ctx
        .client()
        .list_nodes()
        .await?
        .iter()
        .filter(|n| n.is_schedulable())
        .count();
    if schedulable < 2 {
        return Ok(Verdict::Skip("single schedulable node".to_owned()));
    }
    let pods = ctx
        .client()
        .list_pods(ctx.namespace(), Some(&backend.selector))
        .await?;
    let nodes: BTreeSet<&str> = pods.iter().filter_map(|p| p.node.as_deref()).collect();
    Ok(if nodes.len() > 1 {
        Verdict::Pass(format!(
            "{} replicas on {}",
            pods.len(),
            nodes.into_iter().collect::<Vec<_>>().join(", ")
        ))
    } else {
        Verdict::Warn(format!(
            "all {} replicas on one node, losing it stops the workload",
            pods.len()
        ))
    })
}

/// Delete one replica and wait for the deployment to replace it.
async fn self_heal<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    backend: &WebBackend,
) -> Result<Verdict, ClusterError> {
    let pods = ctx
        .client()
        .list_pods(ctx.namespace(), Some(&backend.selector))
        .await?;
    let original: BTreeSet<String> = pods.iter().map(|p| p.name.clone()).collect();
    let Some(victim) = original.first().cloned() else {
        return Ok(Verdict::Fail(format!("{} has no pods", backend.name)));
    };

    let started = Instant::now();
    ctx.client().delete_pod(ctx.namespace(), &victim).await?;

    let label = format!("replacement for pod/{victim}");
    let original = &original;
    let replacement = wait_for(
        &label,
        "Ready",
        ctx.timeouts().deployment_ready(),
        ctx.timeouts().poll_interval(),
        || async move {
            let pods = ctx
                .client()
                .list_pods(ctx.namespace(), Some(&backend.selector))
                .await?;
            let fresh = pods
                .iter()
                .filter(|p| !original.contains(&p.name))
                .find(|p| p.phase == PodPhase::Running && p.ready);
            Ok(match fresh {
                Some(pod) => Probe::Ready(pod.name.clone()),
                None => Probe::Pending(format!("{} pod(s), none new and ready", pods.len())),
            })
        },
    )
    .await?;
    ctx.wait(
        &backend.deployment,
        Condition::DeploymentAvailable,
        ctx.timeouts().deployment_ready(),
    )
    .await?;
    Ok(Verdict::Pass(format!(
        "{victim} replaced by {replacement} in {:.1}s",
        started.elapsed().as_secs_f64()
    )))
}
