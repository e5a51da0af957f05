//! The k3s datastore: embedded etcd, or SQLite behind kine on a single server.

use k3s_validator_cluster::{ClusterClient, ClusterError, ConfigMapRequest, NodeInfo};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::K3sSpecific,
    "embedded-datastore",
    "datastore round trip, read consistency and etcd membership",
);

const PROBE_KEY: &str = "probe";
const CONSISTENCY_READS: usize = 5;

pub struct EmbeddedDatastore;

impl<C: ClusterClient> TestModule<C> for EmbeddedDatastore {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let name = ctx.unique_name("datastore");
        let value = ctx.fixture().run_id().to_string();
        let written = ctx
            .setup(
                "write-read",
                ctx.create_config_map(&ConfigMapRequest::new(&name).entry(PROBE_KEY, &value)),
            )
            .await?;

        match &written {
            Some(config_map) => {
                let outcome = async {
                    ctx.check("write-read", read_back(ctx, &name, &value)).await?;
                    ctx.check("consistent-reads", consistent_reads(ctx, &name, &value))
                        .await?;
                    Ok::<(), ModuleError>(())
                }
                .await;
                ctx.cleanup(config_map).await;
                outcome?;
            }
            None => ctx.skip("consistent-reads", "probe object could not be written"),
        }

        let nodes = ctx.client().list_nodes().await?;
        ctx.check("etcd-members", async { Ok(membership(&nodes)) })
            .await?;
        Ok(())
    }
}

async fn read_back<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    name: &str,
    expected: &str,
) -> Result<Verdict, ClusterError> {
    let data = ctx.client().get_config_map(ctx.namespace(), name).await?;
    Ok(match data.get(PROBE_KEY) {
        Some(value) if value == expected => Verdict::Pass(format!("configmap/{name} round-tripped")),
        Some(value) => Verdict::Fail(format!("wrote {expected}, read back {value}")),
        None => Verdict::Fail(format!("key {PROBE_KEY} missing from configmap/{name}")),
    })
}

async fn consistent_reads<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    name: &str,
    expected: &str,
) -> Result<Verdict, ClusterError> {
    for attempt in 1..=CONSISTENCY_READS {
        let data = ctx.client().get_config_map(ctx.namespace(), name).await?;
        if data.get(PROBE_KEY).map(String::as_str) != Some(expected) {
            return Ok(Verdict::Fail(format!(
                "read {attempt}/{CONSISTENCY_READS} returned stale data"
            )));
        }
    }
    Ok(Verdict::Pass(format!("{CONSISTENCY_READS} reads agree")))
}

fn membership(nodes: &[NodeInfo]) -> Verdict {
    let members: Vec<&str> = nodes
        .iter()
        .filter(|n| n.runs_etcd())
        .map(|n| n.name.as_str())
        .collect();
    match members.len() {
        0 => Verdict::Skip("no etcd members, single server on SQLite (kine)".to_owned()),
        n if n % 2 == 0 => Verdict::Warn(format!(
            "{n} etcd members ({}), an even count tolerates no more failures than {}",
            members.join(", "),
            n - 1
        )),
        n => Verdict::Pass(format!(
            "{n} etcd members, quorum survives {} failure(s)",
            (n - 1) / 2
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{Harness, statuses};
    use k3s_validator_cluster::SimulatedCluster;
    use k3s_validator_core::TestStatus;

    #[tokio::test]
    async fn single_server_skips_membership() {
        let harness = Harness::new(SimulatedCluster::healthy_single_node()).await;
        EmbeddedDatastore.run(&harness.context(INFO)).await.unwrap();
        assert_eq!(harness.cluster.count_calls("delete_config_map").await, 1);
        let suite = harness.finish().await;
        assert_eq!(
            statuses(&suite),
            vec![
                ("write-read".to_owned(), TestStatus::Pass),
                ("consistent-reads".to_owned(), TestStatus::Pass),
                ("etcd-members".to_owned(), TestStatus::Skip),
            ]
        );
    }

    #[tokio::test]
    async fn three_servers_form_quorum() {
        let harness = Harness::new(SimulatedCluster::healthy_cluster(3, 1)).await;
        EmbeddedDatastore.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.passed(), 3);
        assert!(suite.results()[2].message.contains("survives 1 failure"));
    }

    #[test]
    fn even_member_count_warns() {
        let nodes: Vec<NodeInfo> = (1..=2)
            .map(|i| NodeInfo::ready(format!("k3s-server-{i}"), &["etcd"], "192.168.1.11"))
            .collect();
        assert!(matches!(membership(&nodes), Verdict::Warn(_)));
    }

    #[tokio::test]
    async fn write_failure_skips_reads() {
        let cluster =
            SimulatedCluster::healthy_single_node().with_failing_operation("create_config_map");
        let harness = Harness::new(cluster).await;
        EmbeddedDatastore.run(&harness.context(INFO)).await.unwrap();
        let suite = harness.finish().await;
        assert_eq!(suite.results()[0].status, TestStatus::Fail);
        assert_eq!(suite.results()[1].status, TestStatus::Skip);
    }
}
