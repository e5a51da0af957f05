//! Test modules that misbehave on purpose.

use tokio_util::sync::CancellationToken;

use k3s_validator::context::ModuleContext;
use k3s_validator::error::ModuleError;
use k3s_validator::module::{ModuleInfo, TestModule};
use k3s_validator_cluster::SimulatedCluster;
use k3s_validator_core::Category;

static PANICKING_DNS: ModuleInfo =
    ModuleInfo::new(Category::Core, "dns", "records one result, then panics");

/// Stands in for `core/dns`: records a pass, then panics.
pub struct PanickingDns;

impl TestModule<SimulatedCluster> for PanickingDns {
    fn info(&self) -> &ModuleInfo {
        &PANICKING_DNS
    }

    async fn run(&self, ctx: &ModuleContext<SimulatedCluster>) -> Result<(), ModuleError> {
        ctx.pass("before-panic", "recorded before the panic");
        panic!("resolver state corrupted");
    }
}

static INTERRUPTING_NODES: ModuleInfo =
    ModuleInfo::new(Category::Core, "nodes", "fires the shutdown token and hangs");

/// Stands in for `core/nodes`: simulates Ctrl-C while the module is running.
pub struct InterruptingNodes {
    pub shutdown: CancellationToken,
}

impl TestModule<SimulatedCluster> for InterruptingNodes {
    fn info(&self) -> &ModuleInfo {
        &INTERRUPTING_NODES
    }

    async fn run(&self, _ctx: &ModuleContext<SimulatedCluster>) -> Result<(), ModuleError> {
        self.shutdown.cancel();
        std::future::pending::<()>().await;
        Ok(())
    }
}
