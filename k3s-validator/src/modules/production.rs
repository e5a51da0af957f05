//! `production` category: readiness for real workloads beyond a dev cluster.

use k3s_validator_cluster::{ClusterClient, NodeInfo, StorageClassInfo};
use k3s_validator_core::Category;

use super::ModuleRegistry;
use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(HaControlPlane);
    registry.register(DefaultStorageClass);
}

static HA_CONTROL_PLANE: ModuleInfo = ModuleInfo::new(
    Category::Production,
    "ha-control-plane",
    "enough server nodes and etcd members to survive a node loss",
);

pub struct HaControlPlane;

impl<C: ClusterClient> TestModule<C> for HaControlPlane {
    fn info(&self) -> &ModuleInfo {
        &HA_CONTROL_PLANE
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let nodes = ctx.client().list_nodes().await?;
        let minimum = ctx.checks().min_ha_control_planes;
        ctx.check("control-plane-count", async {
            Ok(control_planes(&nodes, minimum))
        })
        .await?;
        ctx.check("etcd-quorum", async { Ok(quorum(&nodes)) }).await?;
        Ok(())
    }
}

fn control_planes(nodes: &[NodeInfo], minimum: usize) -> Verdict {
    let ready = nodes
        .iter()
        .filter(|n| n.is_control_plane() && n.ready)
        .count();
    match ready {
        0 => Verdict::Fail("no ready control-plane nodes".to_owned()),
        n if n >= minimum => Verdict::Pass(format!("{n} ready control-plane nodes")),
        n => Verdict::Warn(format!(
            "{n} ready control-plane node(s), {minimum} needed to tolerate a failure"
        )),
    }
}

fn quorum(nodes: &[NodeInfo]) -> Verdict {
    let members = nodes.iter().filter(|n| n.runs_etcd()).count();
    let ready = nodes.iter().filter(|n| n.runs_etcd() && n.ready).count();
    if members == 0 {
        return Verdict::Warn("no embedded etcd, the datastore is a single point of failure".to_owned());
    }
    let needed = members / 2 + 1;
    if ready < needed {
        Verdict::Fail(format!("{ready}/{members} etcd members ready, quorum needs {needed}"))
    } else if members < 3 {
        Verdict::Warn(format!("{members} etcd member(s) cannot lose one and keep quorum"))
    } else {
        Verdict::Pass(format!(
            "{ready}/{members} etcd members ready, quorum {needed}"
        ))
    }
}

static DEFAULT_STORAGE_CLASS: ModuleInfo = ModuleInfo::new(
    Category::Production,
    "default-storage-class",
    "exactly one default storage class",
);

pub struct DefaultStorageClass;

impl<C: ClusterClient> TestModule<C> for DefaultStorageClass {
    fn info(&self) -> &ModuleInfo {
        &DEFAULT_STORAGE_CLASS
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("single-default", async {
            let classes = ctx.client().list_storage_classes().await?;
            Ok(defaults(&classes))
        })
        .await
    }
}

fn defaults(classes: &[StorageClassInfo]) -> Verdict {
    let defaults: Vec<&str> = classes
        .iter()
        .filter(|c| c.is_default)
        .map(|c| c.name.as_str())
        .collect();
    match defaults.as_slice() {
        [] => Verdict::Warn("no default storage class, PVCs without a class stay Pending".to_owned()),
        [name] => Verdict::Pass(format!("default storage class {name}")),
        names => Verdict::Fail(format!(
            "{} default storage classes ({}), provisioning is ambiguous",
            names.len(),
            names.join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    fn class(name: &str, is_default: bool) -> StorageClassInfo {
        StorageClassInfo {
            name: name.to_owned(),
            is_default,
            ..StorageClassInfo::default()
        }
    }

    #[test]
    fn control_plane_thresholds() {
        let server = |i: usize| NodeInfo::ready(format!("k3s-server-{i}"), &["control-plane"], "10.0.0.1");
        assert!(matches!(control_planes(&[], 3), Verdict::Fail(_)));
        assert!(matches!(control_planes(&[server(1)], 3), Verdict::Warn(_)));
        let three: Vec<NodeInfo> = (1..=3).map(server).collect();
        assert!(matches!(control_planes(&three, 3), Verdict::Pass(_)));
    }

    #[test]
    fn lost_quorum_fails() {
        let mut nodes: Vec<NodeInfo> = (1..=3)
            .map(|i| NodeInfo::ready(format!("k3s-server-{i}"), &["etcd"], "10.0.0.1"))
            .collect();
        nodes[0].ready = false;
        assert!(matches!(quorum(&nodes), Verdict::Pass(_)));
        nodes[1].ready = false;
        assert_eq!(
            quorum(&nodes),
            Verdict::Fail("1/3 etcd members ready, quorum needs 2".to_owned())
        );
    }

    #[test]
    fn multiple_defaults_are_named() {
        assert!(matches!(defaults(&[]), Verdict::Warn(_)));
        assert!(matches!(defaults(&[class("local-path", true)]), Verdict::Pass(_)));
        assert_eq!(
            defaults(&[class("local-path", true), class("longhorn", true)]),
            Verdict::Fail(
                "2 default storage classes (local-path, longhorn), provisioning is ambiguous"
                    .to_owned()
            )
        );
    }

    #[tokio::test]
    async fn three_server_cluster_is_production_ready() {
        let harness = Harness::new(SimulatedCluster::healthy_cluster(3, 2)).await;
        HaControlPlane.run(&harness.context(HA_CONTROL_PLANE)).await.unwrap();
        DefaultStorageClass
            .run(&harness.context(DEFAULT_STORAGE_CLASS))
            .await
            .unwrap();
        let suite = harness.finish().await;
        assert_eq!(
            statuses(&suite),
            vec![
                ("control-plane-count".to_owned(), TestStatus::Pass),
                ("etcd-quorum".to_owned(), TestStatus::Pass),
                ("single-default".to_owned(), TestStatus::Pass),
            ]
        );
    }

    #[tokio::test]
    async fn single_server_warns() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        HaControlPlane.run(&harness.context(HA_CONTROL_PLANE)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.warned(), 2);
        assert_eq!(suite.failed(), 0);
    }
}
