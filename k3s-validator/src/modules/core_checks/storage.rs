//! Storage classes and dynamic provisioning.

use k3s_validator_cluster::{
    ClusterClient, ClusterError, Condition, PodRequest, PvcRequest, StorageClassInfo,
};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "storage",
    "storage classes present and a PVC binds",
);

const CLAIM_SIZE: &str = "1Gi";

pub struct Storage;

impl<C: ClusterClient> TestModule<C> for Storage {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let classes = ctx
            .setup("storage-class", ctx.client().list_storage_classes())
            .await?;
        let Some(classes) = classes else {
            ctx.skip("pvc-binding", "storage classes could not be listed");
            return Ok(());
        };

        ctx.check("storage-class", async { Ok(class_verdict(&classes)) })
            .await?;
        match target_class(&classes) {
            Some(class) => ctx.check("pvc-binding", pvc_binding(ctx, class)).await?,
            None => ctx.skip("pvc-binding", "no storage class to provision from"),
        }
        Ok(())
    }
}

fn class_verdict(classes: &[StorageClassInfo]) -> Verdict {
    let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
    if classes.is_empty() {
        Verdict::Fail("no storage classes defined".to_owned())
    } else if classes.iter().any(|c| c.is_default) {
        Verdict::Pass(format!("storage classes: {}", names.join(", ")))
    } else {
        Verdict::Warn(format!(
            "no default storage class among {}, PVCs must name one",
            names.join(", ")
        ))
    }
}

/// The default class, or the first one when none is marked default.
fn target_class(classes: &[StorageClassInfo]) -> Option<&StorageClassInfo> {
    classes.iter().find(|c| c.is_default).or_else(|| classes.first())
}

async fn pvc_binding<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    class: &StorageClassInfo,
) -> Result<Verdict, ClusterError> {
    let claim = ctx.unique_name("pvc");
    let mut request = PvcRequest::new(&claim, CLAIM_SIZE);
    if !class.is_default {
        request = request.storage_class(&class.name);
    }
    let pvc = ctx.create_pvc(&request).await?;

    // WaitForFirstConsumer classes only provision once a pod mounts the claim.
    let mut consumer = None;
    let bound = async {
        if class.waits_for_consumer() {
            let pod = PodRequest::new(ctx.unique_name("pvc-consumer"), ctx.test_image())
                .command(["sleep", "3600"])
                .with_volume(&claim, "/data");
            consumer = Some(ctx.create_pod(&pod).await?);
        }
        ctx.wait(&pvc, Condition::PvcBound, ctx.timeouts().pvc_bound())
            .await?;
        ctx.client().get_pvc(ctx.namespace(), &claim).await
    }
    .await;

    if let Some(pod) = &consumer {
        ctx.cleanup(pod).await;
    }
    ctx.cleanup(&pvc).await;

    let state = bound?;
    Ok(Verdict::Pass(format!(
        "{claim} bound via {} ({})",
        class.name,
        state.capacity.as_deref().unwrap_or(CLAIM_SIZE)
    )))
}
