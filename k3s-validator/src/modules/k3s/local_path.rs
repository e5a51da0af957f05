//! The local-path provisioner k3s ships as its default storage.

use std::time::Duration;

use k3s_validator_cluster::{
    AccessMode, ClusterClient, ClusterError, Condition, KUBE_SYSTEM, LOCAL_PATH_PROVISIONER,
    PodPhase, PodRequest, PvcPhase, PvcRequest, ResourceRef, StorageClassInfo,
};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::K3sSpecific,
    "local-path",
    "local-path provisioner creates node-local volumes",
);

const TESTS: [&str; 4] = [
    "provisioner-running",
    "volume-provisioning",
    "read-write-once",
    "volume-expansion",
];

const CLAIM_SIZE: &str = "128Mi";
const EXPANDED_SIZE: &str = "256Mi";

/// Upper bound on waiting for a claim that is expected never to bind.
const UNBINDABLE_WAIT: Duration = Duration::from_secs(15);

pub struct LocalPath;

impl<C: ClusterClient> TestModule<C> for LocalPath {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let Some(classes) = ctx
            .setup("provisioner-running", ctx.client().list_storage_classes())
            .await?
        else {
            ctx.skip_all(&TESTS[1..], "storage classes could not be listed");
            return Ok(());
        };
        let Some(class) = classes
            .into_iter()
            .find(|c| c.provisioner == LOCAL_PATH_PROVISIONER)
        else {
            ctx.skip_all(&TESTS, "no storage class uses the local-path provisioner");
            return Ok(());
        };

        ctx.check("provisioner-running", provisioner_running(ctx))
            .await?;

        let claim = ctx.unique_name("local-path");
        ctx.check("volume-provisioning", provisioning(ctx, &class, &claim))
            .await?;
        ctx.check("read-write-once", read_write_once(ctx, &class))
            .await?;
        if class.allow_expansion {
            ctx.check("volume-expansion", expansion(ctx, &claim)).await?;
        } else {
            ctx.skip(
                "volume-expansion",
                format!("storage class {} does not allow expansion", class.name),
            );
        }
        ctx.cleanup(&ResourceRef::pvc(ctx.namespace(), &claim)).await;
        Ok(())
    }
}

async fn provisioner_running<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let pods = ctx
        .client()
        .list_pods(KUBE_SYSTEM, Some("app=local-path-provisioner"))
        .await?;
    Ok(match pods.iter().find(|p| p.phase == PodPhase::Running && p.ready) {
        Some(pod) => Verdict::Pass(format!("{} running", pod.name)),
        None if pods.is_empty() => Verdict::Fail("no local-path-provisioner pod".to_owned()),
        None => Verdict::Fail(format!(
            "local-path-provisioner not ready: {}",
            pods.iter().map(|p| p.summary()).collect::<Vec<_>>().join(", ")
        )),
    })
}

/// Bind a claim by writing to it from a pod, then read the data back.
async fn provisioning<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    class: &StorageClassInfo,
    claim: &str,
) -> Result<Verdict, ClusterError> {
    ctx.create_pvc(&PvcRequest::new(claim, CLAIM_SIZE).storage_class(&class.name))
        .await?;
    let writer = PodRequest::new(ctx.unique_name("local-path-writer"), ctx.test_image())
        .shell("echo k3s-validator > /data/probe && cat /data/probe")
        .with_volume(claim, "/data");
    let (pod, logs) = ctx.run_to_completion(&writer).await?;
    if pod.phase != PodPhase::Succeeded {
        return Ok(Verdict::Fail(format!(
            "writer pod ended {}: {}",
            pod.phase,
            logs.trim()
        )));
    }

    let pvc = ctx.client().get_pvc(ctx.namespace(), claim).await?;
    Ok(if pvc.phase == PvcPhase::Bound {
        Verdict::Pass(format!(
            "{claim} bound ({}) and writable",
            pvc.capacity.as_deref().unwrap_or(CLAIM_SIZE)
        ))
    } else {
        Verdict::Fail(format!("{claim} is {} after a pod used it", pvc.phase))
    })
}

/// local-path volumes live on one node, so a ReadWriteMany claim must never bind.
async fn read_write_once<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    class: &StorageClassInfo,
) -> Result<Verdict, ClusterError> {
    let claim = ctx.unique_name("local-path-rwx");
    let pvc = ctx
        .create_pvc(
            &PvcRequest::new(&claim, CLAIM_SIZE)
                .storage_class(&class.name)
                .access_mode(AccessMode::ReadWriteMany),
        )
        .await?;

    let mut consumer = None;
    let waited = async {
        let pod = PodRequest::new(ctx.unique_name("local-path-rwx"), ctx.test_image())
            .command(["sleep", "3600"])
            .with_volume(&claim, "/data");
        consumer = Some(ctx.create_pod(&pod).await?);
        let limit = ctx.timeouts().pvc_bound().min(UNBINDABLE_WAIT);
        ctx.wait(&pvc, Condition::PvcBound, limit).await
    }
    .await;

    if let Some(pod) = &consumer {
        ctx.cleanup(pod).await;
    }
    ctx.cleanup(&pvc).await;

    match waited {
        Ok(()) => Ok(Verdict::Fail(format!(
            "ReadWriteMany claim {claim} bound on local-path"
        ))),
        Err(e) if e.is_timeout() => Ok(Verdict::Pass(
            "ReadWriteMany claim stays Pending, only ReadWriteOnce is provisioned".to_owned(),
        )),
        Err(e) => Err(e),
    }
}

async fn expansion<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    claim: &str,
) -> Result<Verdict, ClusterError> {
    let pvc = ctx.client().get_pvc(ctx.namespace(), claim).await?;
    if pvc.phase != PvcPhase::Bound {
        return Ok(Verdict::Skip(format!("{claim} is not bound, nothing to expand")));
    }
    match ctx
        .client()
        .expand_pvc(ctx.namespace(), claim, EXPANDED_SIZE)
        .await
    {
        Ok(()) => Ok(Verdict::Pass(format!(
            "{claim} expanded to {EXPANDED_SIZE}"
        ))),
        Err(e) if e.is_rejection() => Ok(Verdict::Fail(format!(
            "expansion rejected: {e}"
        ))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    fn local_path(allow_expansion: bool) -> StorageClassInfo {
        StorageClassInfo {
            name: "local-path".to_owned(),
            provisioner: LOCAL_PATH_PROVISIONER.to_owned(),
            is_default: true,
            allow_expansion,
            binding_mode: "WaitForFirstConsumer".to_owned(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn default_local_path_behaves() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        let ctx = harness.context(INFO);
        LocalPath.run(&ctx).await.unwrap();
        assert_eq!(harness.cluster.count_calls("delete_pvc").await, 2);
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
                ("provisioner-running".to_owned(), TestStatus::Pass),
                ("volume-provisioning".to_owned(), TestStatus::Pass),
                ("read-write-once".to_owned(), TestStatus::Pass),
                ("volume-expansion".to_owned(), TestStatus::Skip),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expandable_class_is_expanded() {
        let cluster =
            SimulatedCluster::healthy_single_node().with_storage_classes(vec![local_path(true)]);
        let harness = Harness::new(cluster).await;
        LocalPath.run(&harness.context(INFO)).await.unwrap();
        assert_eq!(harness.cluster.count_calls("expand_pvc").await, 1);
        let suite = harness.finish().await;
        assert_eq!(suite.results()[3].status, TestStatus::Pass);
        assert!(suite.results()[3].message.ends_with("expanded to 256Mi"));
    }

    #[tokio::test]
    async fn other_provisioners_skip_everything() {
        let nfs = StorageClassInfo {
            name: "nfs".to_owned(),
            provisioner: "example.com/nfs".to_owned(),
            is_default: true,
            allow_expansion: false,
            binding_mode: "Immediate".to_owned(),
        };
        let cluster = SimulatedCluster::healthy_single_node().with_storage_classes(vec![nfs]);
        let harness = Harness::new(cluster).await;
        LocalPath.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.skipped(), 4);
        assert_eq!(suite.total(), 4);
    }

    #[tokio::test]
    async fn failing_writer_fails_provisioning() {
        let cluster = SimulatedCluster::healthy_single_node().with_failing_command("/data/probe");
        let harness = Harness::new(cluster).await;
        let ctx = harness.context(INFO);
        ctx.check(
            "volume-provisioning",
            provisioning(&ctx, &local_path(false), "local-path-00000001"),
        )
        .await
        .unwrap();
        drop(ctx);
        let suite = harness.finish().await;
        assert_eq!(suite.results()[0].status, TestStatus::Fail);
        assert!(suite.results()[0].message.starts_with("writer pod ended Failed"));
    }
}
