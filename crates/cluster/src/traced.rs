//! Command echo for the `--debug` tiers.
//!
//! [`TracedClient`] wraps any [`ClusterClient`] and reports each call through
//! a [`Tracer`] before delegating, so modules get command echo without
//! calling the tracer themselves.

use std::collections::BTreeMap;
use std::sync::Arc;

use k3s_validator_core::trace::Tracer;

use crate::client::ClusterClient;
use crate::error::ClusterError;
use crate::resources::{
    ConfigMapRequest, DaemonSetRequest, DaemonSetState, DeploymentRequest, DeploymentState,
    IngressRequest, IngressState, NodeInfo, PodRequest, PodState, PvcRequest, PvcState,
    ServiceRequest, ServiceState, StorageClassInfo,
};

/// A client that echoes every command to its tracer.
#[derive(Debug)]
pub struct TracedClient<C> {
    inner: Arc<C>,
    tracer: Tracer,
}

impl<C> Clone for TracedClient<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            tracer: self.tracer.clone(),
        }
    }
}

impl<C: ClusterClient> TracedClient<C> {
    pub fn new(inner: Arc<C>, tracer: Tracer) -> Self {
        Self { inner, tracer }
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn inner(&self) -> &Arc<C> {
        &self.inner
    }
}

impl<C: ClusterClient> ClusterClient for TracedClient<C> {
    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        self.tracer.command("server_version", format_args!("GET /version"));
        self.inner.server_version().await
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("create_namespace", format_args!("{name}"));
        self.inner.create_namespace(name).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_namespace", format_args!("{name}"));
        self.inner.delete_namespace(name).await
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        self.tracer.command("get_namespace", format_args!("{name}"));
        self.inner.namespace_exists(name).await
    }

    async fn create_pod(&self, namespace: &str, pod: &PodRequest) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_pod",
            format_args!(
                "-n {namespace} {} image={} command=[{}]",
                pod.name,
                pod.image,
                pod.command_line()
            ),
        );
        self.inner.create_pod(namespace, pod).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodState, ClusterError> {
        self.tracer.command("get_pod", format_args!("-n {namespace} {name}"));
        self.inner.get_pod(namespace, name).await
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_pod", format_args!("-n {namespace} {name}"));
        self.inner.delete_pod(namespace, name).await
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodState>, ClusterError> {
        self.tracer.command(
            "list_pods",
            format_args!("-n {namespace} -l {}", selector.unwrap_or("<all>")),
        );
        self.inner.list_pods(namespace, selector).await
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        self.tracer.command("pod_logs", format_args!("-n {namespace} {name}"));
        self.inner.pod_logs(namespace, name).await
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &DeploymentRequest,
    ) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_deployment",
            format_args!(
                "-n {namespace} {} image={} replicas={}",
                deployment.name, deployment.image, deployment.replicas
            ),
        );
        self.inner.create_deployment(namespace, deployment).await
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentState, ClusterError> {
        self.tracer.command("get_deployment", format_args!("-n {namespace} {name}"));
        self.inner.get_deployment(namespace, name).await
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_deployment", format_args!("-n {namespace} {name}"));
        self.inner.delete_deployment(namespace, name).await
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceRequest,
    ) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_service",
            format_args!(
                "-n {namespace} {} type={} port={}",
                service.name,
                service.kind.as_str(),
                service.port
            ),
        );
        self.inner.create_service(namespace, service).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceState, ClusterError> {
        self.tracer.command("get_service", format_args!("-n {namespace} {name}"));
        self.inner.get_service(namespace, name).await
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_service", format_args!("-n {namespace} {name}"));
        self.inner.delete_service(namespace, name).await
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &IngressRequest,
    ) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_ingress",
            format_args!(
                "-n {namespace} {} host={} backend={}:{}",
                ingress.name, ingress.host, ingress.service, ingress.port
            ),
        );
        self.inner.create_ingress(namespace, ingress).await
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressState, ClusterError> {
        self.tracer.command("get_ingress", format_args!("-n {namespace} {name}"));
        self.inner.get_ingress(namespace, name).await
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_ingress", format_args!("-n {namespace} {name}"));
        self.inner.delete_ingress(namespace, name).await
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PvcRequest) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_pvc",
            format_args!(
                "-n {namespace} {} class={} mode={} size={}",
                pvc.name,
                pvc.storage_class.as_deref().unwrap_or("<default>"),
                pvc.access_mode.as_str(),
                pvc.size
            ),
        );
        self.inner.create_pvc(namespace, pvc).await
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PvcState, ClusterError> {
        self.tracer.command("get_pvc", format_args!("-n {namespace} {name}"));
        self.inner.get_pvc(namespace, name).await
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_pvc", format_args!("-n {namespace} {name}"));
        self.inner.delete_pvc(namespace, name).await
    }

    async fn expand_pvc(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError> {
        self.tracer
            .command("expand_pvc", format_args!("-n {namespace} {name} size={size}"));
        self.inner.expand_pvc(namespace, name, size).await
    }

    async fn create_daemonset(
        &self,
        namespace: &str,
        daemonset: &DaemonSetRequest,
    ) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_daemonset",
            format_args!("-n {namespace} {} image={}", daemonset.name, daemonset.image),
        );
        self.inner.create_daemonset(namespace, daemonset).await
    }

    async fn get_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSetState, ClusterError> {
        self.tracer.command("get_daemonset", format_args!("-n {namespace} {name}"));
        self.inner.get_daemonset(namespace, name).await
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_daemonset", format_args!("-n {namespace} {name}"));
        self.inner.delete_daemonset(namespace, name).await
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapRequest,
    ) -> Result<(), ClusterError> {
        self.tracer.command(
            "create_config_map",
            format_args!(
                "-n {namespace} {} keys={}",
                config_map.name,
                config_map.data.len()
            ),
        );
        self.inner.create_config_map(namespace, config_map).await
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        self.tracer.command("get_config_map", format_args!("-n {namespace} {name}"));
        self.inner.get_config_map(namespace, name).await
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.tracer.command("delete_config_map", format_args!("-n {namespace} {name}"));
        self.inner.delete_config_map(namespace, name).await
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        self.tracer.command("list_nodes", format_args!(""));
        self.inner.list_nodes().await
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError> {
        self.tracer.command("list_storage_classes", format_args!(""));
        self.inner.list_storage_classes().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedCluster;
    use k3s_validator_core::trace::TraceLevel;

    #[tokio::test]
    async fn delegates_to_inner_client() {
        let cluster = Arc::new(SimulatedCluster::healthy_single_node());
        let traced = TracedClient::new(cluster.clone(), Tracer::new(TraceLevel::Debug));

        traced.create_namespace("ns").await.unwrap();
        traced
            .create_pod("ns", &PodRequest::new("web", "nginx:1.25-alpine"))
            .await
            .unwrap();

        assert_eq!(traced.endpoint(), cluster.endpoint());
        assert!(cluster.get_pod("ns", "web").await.is_ok());
        assert_eq!(cluster.count_calls("create_pod").await, 1);
    }

    #[tokio::test]
    async fn errors_pass_through_unchanged() {
        let cluster = Arc::new(SimulatedCluster::healthy_single_node().unreachable());
        let traced = TracedClient::new(cluster, Tracer::disabled());
        assert!(traced.list_nodes().await.unwrap_err().is_fatal());
    }
}
