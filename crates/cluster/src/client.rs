//! Kubernetes API abstraction for testability.
//!
//! The [`ClusterClient`] trait covers every cluster call the validator
//! makes. Production code uses [`KubeClusterClient`](crate::KubeClusterClient);
//! tests use `SimulatedCluster` from the `simulated` feature.
//!
//! # Error Handling
//!
//! - **404**: `ClusterError::NotFound`; namespaced deletes map it to `Ok(())`
//! - **409**: `ClusterError::AlreadyExists`
//! - **transport failures**: `ClusterError::Connection`, which aborts the run
//! - anything else: `ClusterError::Api` with the status code

use std::collections::BTreeMap;
use std::future::Future;

use crate::error::ClusterError;
use crate::resources::{
    ConfigMapRequest, DaemonSetRequest, DaemonSetState, DeploymentRequest, DeploymentState,
    IngressRequest, IngressState, NodeInfo, PodRequest, PodState, PvcRequest, PvcState,
    ResourceKind, ResourceRef, ServiceRequest, ServiceState, StorageClassInfo,
};

/// Trait abstracting Kubernetes API operations.
///
/// The trait is `Send + Sync + 'static`, so one client can be shared as an
/// `Arc` between concurrently running categories.
pub trait ClusterClient: Send + Sync + 'static {
    /// API server URL.
    fn endpoint(&self) -> String;

    /// Server version string; doubles as the reachability probe.
    fn server_version(&self) -> impl Future<Output = Result<String, ClusterError>> + Send;

    // --- namespaces ---

    fn create_namespace(&self, name: &str) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Deleting a namespace that does not exist succeeds.
    fn delete_namespace(&self, name: &str) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn namespace_exists(&self, name: &str) -> impl Future<Output = Result<bool, ClusterError>> + Send;

    // --- pods ---

    fn create_pod(
        &self,
        namespace: &str,
        pod: &PodRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<PodState, ClusterError>> + Send;

    fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Pods in `namespace`, optionally filtered by an equality label selector.
    fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> impl Future<Output = Result<Vec<PodState>, ClusterError>> + Send;

    fn pod_logs(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<String, ClusterError>> + Send;

    // --- deployments ---

    fn create_deployment(
        &self,
        namespace: &str,
        deployment: &DeploymentRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<DeploymentState, ClusterError>> + Send;

    fn delete_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- services ---

    fn create_service(
        &self,
        namespace: &str,
        service: &ServiceRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<ServiceState, ClusterError>> + Send;

    fn delete_service(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- ingresses ---

    fn create_ingress(
        &self,
        namespace: &str,
        ingress: &IngressRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<IngressState, ClusterError>> + Send;

    fn delete_ingress(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- persistent volume claims ---

    fn create_pvc(
        &self,
        namespace: &str,
        pvc: &PvcRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<PvcState, ClusterError>> + Send;

    fn delete_pvc(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    /// Request a larger size for a bound claim.
    fn expand_pvc(
        &self,
        namespace: &str,
        name: &str,
        size: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- daemonsets ---

    fn create_daemonset(
        &self,
        namespace: &str,
        daemonset: &DaemonSetRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<DaemonSetState, ClusterError>> + Send;

    fn delete_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- config maps ---

    fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapRequest,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<BTreeMap<String, String>, ClusterError>> + Send;

    fn delete_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<(), ClusterError>> + Send;

    // --- cluster scoped ---

    fn list_nodes(&self) -> impl Future<Output = Result<Vec<NodeInfo>, ClusterError>> + Send;

    fn list_storage_classes(
        &self,
    ) -> impl Future<Output = Result<Vec<StorageClassInfo>, ClusterError>> + Send;
}

/// Delete any namespaced object by reference.
pub async fn delete_resource<C: ClusterClient>(
    client: &C,
    resource: &ResourceRef,
) -> Result<(), ClusterError> {
    let ns = resource.namespace.as_str();
    let name = resource.name.as_str();
    match resource.kind {
        ResourceKind::Pod => client.delete_pod(ns, name).await,
        ResourceKind::Deployment => client.delete_deployment(ns, name).await,
        ResourceKind::Service => client.delete_service(ns, name).await,
        ResourceKind::PersistentVolumeClaim => client.delete_pvc(ns, name).await,
        ResourceKind::DaemonSet => client.delete_daemonset(ns, name).await,
        ResourceKind::ConfigMap => client.delete_config_map(ns, name).await,
        ResourceKind::Ingress => client.delete_ingress(ns, name).await,
        ResourceKind::Namespace => client.delete_namespace(name).await,
        kind @ (ResourceKind::Node | ResourceKind::StorageClass) => Err(ClusterError::Api {
            operation: format!("delete_{kind}"),
            code: None,
            message: format!("{kind} objects are never deleted by the validator"),
        }),
    }
}

/// Treat not-found as success; used by idempotent deletes.
pub(crate) fn ignore_not_found(result: Result<(), ClusterError>) -> Result<(), ClusterError> {
    match result {
        Err(ClusterError::NotFound { .. }) => Ok(()),
        other => other,
    }
}
