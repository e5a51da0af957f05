//! Health of the pods k3s runs in `kube-system`.

use k3s_validator_cluster::{ClusterClient, ClusterError, KUBE_SYSTEM, PodPhase, PodState};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "system-pods",
    "kube-system pods running, CoreDNS and metrics-server present",
);

/// Restart count above which a running pod is reported as unstable.
const RESTART_WARN_THRESHOLD: u32 = 3;

pub struct SystemPods;

impl<C: ClusterClient> TestModule<C> for SystemPods {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("all-running", all_running(ctx)).await?;
        ctx.check("restarts", restarts(ctx)).await?;
        ctx.check("coredns", component(ctx, "k8s-app=kube-dns", true))
            .await?;
        ctx.check(
            "metrics-server",
            component(ctx, "k8s-app=metrics-server", false),
        )
        .await?;
        Ok(())
    }
}

/// Pods that finished successfully (helm install jobs) are not counted.
fn long_running(pods: Vec<PodState>) -> Vec<PodState> {
    pods.into_iter()
        .filter(|p| p.phase != PodPhase::Succeeded)
        .collect()
}

async fn all_running<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let pods = long_running(ctx.client().list_pods(KUBE_SYSTEM, None).await?);
    if pods.is_empty() {
        return Ok(Verdict::Fail(format!("no pods in {KUBE_SYSTEM}")));
    }
    let unhealthy: Vec<String> = pods
        .iter()
        .filter(|p| !(p.phase == PodPhase::Running && p.ready))
        .map(|p| format!("{} ({})", p.name, p.summary()))
        .collect();
    Ok(if unhealthy.is_empty() {
        Verdict::Pass(format!("{} pods running and ready", pods.len()))
    } else {
        Verdict::Fail(format!("not ready: {}", unhealthy.join(", ")))
    })
}

async fn restarts<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let pods = long_running(ctx.client().list_pods(KUBE_SYSTEM, None).await?);
    let unstable: Vec<String> = pods
        .iter()
        .filter(|p| p.restarts > RESTART_WARN_THRESHOLD)
        .map(|p| format!("{} ({} restarts)", p.name, p.restarts))
        .collect();
    Ok(if unstable.is_empty() {
        Verdict::Pass(format!("no pod restarted more than {RESTART_WARN_THRESHOLD} times"))
    } else {
        Verdict::Warn(format!("unstable: {}", unstable.join(", ")))
    })
}

/// A required component missing is a failure; an optional one a warning.
async fn component<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    selector: &str,
    required: bool,
) -> Result<Verdict, ClusterError> {
    let pods = ctx.client().list_pods(KUBE_SYSTEM, Some(selector)).await?;
    let ready = pods
        .iter()
        .filter(|p| p.phase == PodPhase::Running && p.ready)
        .count();
    Ok(match (pods.len(), ready) {
        (0, _) if required => Verdict::Fail(format!("no pods match {selector}")),
        (0, _) => Verdict::Warn(format!("no pods match {selector}, component not installed")),
        (total, 0) => Verdict::Fail(format!("0/{total} pods ready for {selector}")),
        (total, ready) => Verdict::Pass(format!("{ready}/{total} pods ready")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    #[tokio::test]
    async fn default_addons_are_healthy() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        SystemPods.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert!(
            statuses(&suite)
                .iter()
                .all(|(_, status)| *status == TestStatus::Pass),
            "{:?}",
            suite.results()
        );
    }

    #[tokio::test]
    async fn missing_metrics_server_only_warns() {
        let cluster = SimulatedCluster::healthy_single_node().without_system_pods("metrics-server");
        let harness = Harness::new(cluster).await;
        SystemPods.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.failed(), 0);
        assert_eq!(suite.warned(), 1);
    }

    #[tokio::test]
    async fn crashing_pod_fails_and_warns() {
        let crashing = PodState {
            name: "coredns-576bfc4dc7-zzzzz".to_owned(),
            phase: PodPhase::Running,
            ready: false,
            node: Some("k3s-server-1".to_owned()),
            pod_ip: None,
            restarts: 12,
            labels: [("k8s-app".to_owned(), "kube-dns".to_owned())].into(),
        };
        let cluster = SimulatedCluster::healthy_single_node()
            .without_system_pods("coredns")
            .with_system_pod(crashing);
        let harness = Harness::new(cluster).await;
        SystemPods.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(
            statuses(&suite),
            vec![
                ("all-running".to_owned(), TestStatus::Fail),
                ("restarts".to_owned(), TestStatus::Warn),
                ("coredns".to_owned(), TestStatus::Fail),
                ("metrics-server".to_owned(), TestStatus::Pass),
            ]
        );
    }
}
