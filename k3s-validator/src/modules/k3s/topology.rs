//! Server/agent topology and traffic between nodes.

use std::collections::BTreeSet;

use k3s_validator_cluster::{ClusterClient, ClusterError, Condition, NodeInfo, PodRequest};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};
use crate::modules::support::{WebBackend, http_probe, probe_shell};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::K3sSpecific,
    "agent-server",
    "server and agent nodes, cross-node pod traffic and version skew",
);

pub struct AgentServer;

impl<C: ClusterClient> TestModule<C> for AgentServer {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        let nodes = ctx.client().list_nodes().await?;
        ctx.check("topology", async { Ok(topology(&nodes)) }).await?;
        ctx.check("agent-ready", async { Ok(agents_ready(&nodes)) })
            .await?;

        let schedulable: Vec<&NodeInfo> = nodes.iter().filter(|n| n.is_schedulable()).collect();
        match schedulable.as_slice() {
            [server, client, ..] => {
                ctx.check("cross-node", cross_node(ctx, &server.name, &client.name))
                    .await?;
            }
            _ => ctx.skip("cross-node", "fewer than two schedulable nodes"),
        }

        ctx.check("version-skew", async { Ok(version_skew(&nodes)) })
            .await?;
        Ok(())
    }
}

fn topology(nodes: &[NodeInfo]) -> Verdict {
    let servers = nodes.iter().filter(|n| n.is_control_plane()).count();
    let agents = nodes.len() - servers;
    if servers == 0 {
        Verdict::Fail(format!("no server nodes among {} node(s)", nodes.len()))
    } else {
        Verdict::Pass(format!("{servers} server(s), {agents} agent(s)"))
    }
}

fn agents_ready(nodes: &[NodeInfo]) -> Verdict {
    let agents: Vec<&NodeInfo> = nodes.iter().filter(|n| !n.is_control_plane()).collect();
    if agents.is_empty() {
        return Verdict::Skip("no agent nodes, servers run workloads".to_owned());
    }
    let down: Vec<&str> = agents
        .iter()
        .filter(|n| !n.ready)
        .map(|n| n.name.as_str())
        .collect();
    if down.is_empty() {
        Verdict::Pass(format!("{} agent(s) ready", agents.len()))
    } else {
        Verdict::Fail(format!("agents not ready: {}", down.join(", ")))
    }
}

fn version_skew(nodes: &[NodeInfo]) -> Verdict {
    let versions: BTreeSet<&str> = nodes.iter().map(|n| n.kubelet_version.as_str()).collect();
    match versions.len() {
        0 => Verdict::Skip("no nodes".to_owned()),
        1 => Verdict::Pass(format!(
            "all nodes run {}",
            versions.first().copied().unwrap_or_default()
        )),
        _ => Verdict::Warn(format!(
            "mixed kubelet versions: {}",
            versions.into_iter().collect::<Vec<_>>().join(", ")
        )),
    }
}

/// Serve from a pod pinned to `server_node` and fetch from one on `client_node`.
async fn cross_node<C: ClusterClient>(
    ctx: &ModuleContext<C>,
    server_node: &str,
    client_node: &str,
) -> Result<Verdict, ClusterError> {
    let name = ctx.unique_name("cross-node");
    let server = ctx
        .create_pod(
            &PodRequest::new(&name, ctx.web_image())
                .label("app", &name)
                .port(WebBackend::PORT)
                .on_node(server_node),
        )
        .await?;

    let outcome = async {
        ctx.wait(&server, Condition::PodReady, ctx.timeouts().pod_ready())
            .await?;
        let pod = ctx.client().get_pod(ctx.namespace(), &name).await?;
        let Some(ip) = pod.pod_ip else {
            return Ok(Verdict::Fail(format!("{name} has no pod IP")));
        };
        let target = format!("http://{ip}:{}", WebBackend::PORT);
        let shell =
            probe_shell(ctx, "cross-node-client", &http_probe(&target), Some(client_node)).await?;
        Ok::<_, ClusterError>(if shell.succeeded {
            Verdict::Pass(format!(
                "{client_node} reached {target} on {server_node}{}",
                shell.attempts_note()
            ))
        } else {
            Verdict::Fail(format!(
                "{client_node} could not reach {target} on {server_node}: {}",
                shell.detail
            ))
        })
    }
    .await;
    ctx.cleanup(&server).await;
    outcome
}
