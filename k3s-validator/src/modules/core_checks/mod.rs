//! `core` category: checks every conformant cluster must pass.

mod api_server;
mod dns;
mod networking;
mod nodes;
mod storage;
mod system_pods;

pub use api_server::ApiServer;
pub use dns::Dns;
pub use networking::Networking;
pub use nodes::Nodes;
pub use storage::Storage;
pub use system_pods::SystemPods;

use k3s_validator_cluster::ClusterClient;

use super::ModuleRegistry;

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(ApiServer);
    registry.register(Nodes);
    registry.register(SystemPods);
    registry.register(Networking);
    registry.register(Dns);
    registry.register(Storage);
}
