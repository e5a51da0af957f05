//! Node readiness, resource pressure and schedulability.

use k3s_validator_cluster::{ClusterClient, NodeInfo};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "nodes",
    "node readiness, resource pressure and schedulability",
);

pub struct Nodes;

impl<C: ClusterClient> TestModule<C> for Nodes {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let nodes = ctx.client().list_nodes().await?;
        ctx.tracer().dump("nodes", &nodes);

        ctx.check("nodes-ready", async { Ok(readiness(&nodes)) })
            .await?;
        ctx.check("resource-pressure", async { Ok(pressure(&nodes)) })
            .await?;
        ctx.check("schedulable", async { Ok(schedulable(&nodes)) })
            .await?;
        Ok(())
    }
}

fn readiness(nodes: &[NodeInfo]) -> Verdict {
    if nodes.is_empty() {
        return Verdict::Fail("no nodes registered".to_owned());
    }
    let not_ready: Vec<&str> = nodes
        .iter()
        .filter(|n| !n.ready)
        .map(|n| n.name.as_str())
        .collect();
    if not_ready.is_empty() {
        Verdict::Pass(format!("{}/{} nodes Ready", nodes.len(), nodes.len()))
    } else {
        Verdict::Fail(format!(
            "{}/{} nodes Ready, not ready: {}",
            nodes.len() - not_ready.len(),
            nodes.len(),
            not_ready.join(", ")
        ))
    }
}

fn pressure(nodes: &[NodeInfo]) -> Verdict {
    let under_pressure: Vec<String> = nodes
        .iter()
        .filter(|n| !n.pressure.is_empty())
        .map(|n| format!("{} ({})", n.name, n.pressure.join(", ")))
        .collect();
    if under_pressure.is_empty() {
        Verdict::Pass("no memory, disk or PID pressure".to_owned())
    } else {
        Verdict::Warn(format!("pressure reported on {}", under_pressure.join("; ")))
    }
}

fn schedulable(nodes: &[NodeInfo]) -> Verdict {
    let cordoned: Vec<&str> = nodes
        .iter()
        .filter(|n| n.unschedulable)
        .map(|n| n.name.as_str())
        .collect();
    let available = nodes.iter().filter(|n| n.is_schedulable()).count();
    if available == 0 {
        Verdict::Fail("no node accepts new pods".to_owned())
    } else if cordoned.is_empty() {
        Verdict::Pass(format!("{available} node(s) accept pods"))
    } else {
        Verdict::Warn(format!("cordoned: {}", cordoned.join(", ")))
    }
}
