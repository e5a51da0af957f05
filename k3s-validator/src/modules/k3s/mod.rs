//! `k3s-specific` category: components k3s bundles on top of Kubernetes.
//!
//! Traefik ingress, the `svclb` service load balancer (klipper-lb), the
//! local-path provisioner and the datastore are all optional in k3s, so an
//! absent component is reported as a warning or skip rather than a failure.

mod datastore;
mod ingress;
mod local_path;
mod service_lb;
mod topology;

pub use datastore::EmbeddedDatastore;
pub use ingress::IngressController;
pub use local_path::LocalPath;
pub use service_lb::ServiceLb;
pub use topology::AgentServer;

use k3s_validator_cluster::ClusterClient;

use super::ModuleRegistry;

pub fn register<C: ClusterClient>(registry: &mut ModuleRegistry<C>) {
    registry.register(IngressController);
    registry.register(ServiceLb);
    registry.register(LocalPath);
    registry.register(EmbeddedDatastore);
    registry.register(AgentServer);
}
