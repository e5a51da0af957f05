//! API server reachability and latency.

use tokio::time::Instant;

use k3s_validator_cluster::{ClusterClient, ClusterError};
use k3s_validator_core::Category;

use crate::context::{ModuleContext, Verdict};
use crate::error::ModuleError;
use crate::module::{ModuleInfo, TestModule};

static INFO: ModuleInfo = ModuleInfo::new(
    Category::Core,
    "api-server",
    "API server reachability, version and request latency",
);

pub struct ApiServer;

impl<C: ClusterClient> TestModule<C> for ApiServer {
    fn info(&self) -> &ModuleInfo {
        &INFO
    }

    async fn run(&self, ctx: &ModuleContext<C>) -> Result<(), ModuleError> {
        ctx.check("reachable", reachable(ctx)).await?;
        ctx.check("latency", latency(ctx)).await?;
        ctx.check("fixture-namespace", fixture_namespace(ctx)).await?;
        Ok(())
    }
}

async fn reachable<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let version = ctx.client().server_version().await?;
    let verdict = if version.contains("k3s") {
        Verdict::Pass(format!("server version {version}"))
    } else {
        Verdict::Warn(format!("server version {version} does not look like k3s"))
    };
    Ok(verdict)
}

async fn latency<C: ClusterClient>(ctx: &ModuleContext<C>) -> Result<Verdict, ClusterError> {
    let started = Instant::now();
    ctx.client().list_nodes().await?;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let limit = ctx.checks().api_latency_warn_ms;
    Ok(if elapsed_ms > limit {
        Verdict::Warn(format!("list nodes took {elapsed_ms}ms (warn above {limit}ms)"))
    } else {
        Verdict::Pass(format!("list nodes took {elapsed_ms}ms"))
    })
}

async fn fixture_namespace<C: ClusterClient>(
    ctx: &ModuleContext<C>,
) -> Result<Verdict, ClusterError> {
    let namespace = ctx.namespace();
    Ok(if ctx.client().namespace_exists(namespace).await? {
        Verdict::Pass(format!("namespace {namespace} is visible"))
    } else {
        Verdict::Fail(format!("namespace {namespace} was created but cannot be read back"))
    })
}
