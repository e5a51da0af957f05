//! [`ClusterClient`] backed by the Kubernetes API through `kube`.
//!
//! # Examples
//!
//! ```ignore
//! use k3s_validator_cluster::{ClusterClient, KubeClusterClient};
//!
//! // Uses $KUBECONFIG, ~/.kube/config or the in-cluster service account
//! let client = KubeClusterClient::connect().await?;
//! println!("{}", client.server_version().await?);
//! # Ok::<(), k3s_validator_cluster::ClusterError>(())
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolumeClaim, Pod, Service,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::client::{ClusterClient, ignore_not_found};
use crate::error::ClusterError;
use crate::resources::{
    ConfigMapRequest, DEFAULT_CLASS_ANNOTATION, DaemonSetRequest, DaemonSetState,
    DeploymentRequest, DeploymentState, IngressRequest, IngressState, NodeInfo, PodPhase,
    PodRequest, PodState, PvcPhase, PvcRequest, PvcState, ResourceKind, SecuritySettings,
    ServiceKind, ServiceRequest, ServiceState, StorageClassInfo,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const NODE_ROLE_PREFIX: &str = "node-role.kubernetes.io/";

/// Production cluster client.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    endpoint: String,
}

impl KubeClusterClient {
    /// Connect using the inferred configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::Connection` when no kubeconfig or in-cluster
    /// configuration can be loaded. Reachability is checked separately with
    /// [`ClusterClient::server_version`].
    pub async fn connect() -> Result<Self, ClusterError> {
        let mut config = kube::Config::infer()
            .await
            .map_err(|e| ClusterError::Connection(format!("failed to load kubeconfig: {e}")))?;
        config.connect_timeout = Some(CONNECT_TIMEOUT);
        config.read_timeout = Some(READ_TIMEOUT);

        let endpoint = config.cluster_url.to_string();
        let client = Client::try_from(config)
            .map_err(|e| ClusterError::Connection(format!("failed to create client: {e}")))?;
        Ok(Self::from_client(client, endpoint))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Translate a `kube` error into the validator's error vocabulary.
fn map_kube_error(operation: &str, kind: ResourceKind, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) => match response.code {
            404 => ClusterError::NotFound {
                kind,
                name: name.to_owned(),
            },
            409 => ClusterError::AlreadyExists {
                kind,
                name: name.to_owned(),
            },
            code => ClusterError::Api {
                operation: operation.to_owned(),
                code: Some(code),
                message: response.message,
            },
        },
        kube::Error::HyperError(e) => ClusterError::Connection(e.to_string()),
        kube::Error::Service(e) => ClusterError::Connection(e.to_string()),
        other => ClusterError::Api {
            operation: operation.to_owned(),
            code: None,
            message: other.to_string(),
        },
    }
}

fn from_json<K: serde::de::DeserializeOwned>(
    operation: &str,
    value: serde_json::Value,
) -> Result<K, ClusterError> {
    serde_json::from_value(value).map_err(|e| ClusterError::Api {
        operation: operation.to_owned(),
        code: None,
        message: format!("failed to build manifest: {e}"),
    })
}

// ─── Manifests ───────────────────────────────────────────────────────

fn security_context(settings: &SecuritySettings) -> serde_json::Value {
    let mut ctx = serde_json::Map::new();
    if let Some(v) = settings.run_as_non_root {
        ctx.insert("runAsNonRoot".into(), json!(v));
    }
    if let Some(v) = settings.run_as_user {
        ctx.insert("runAsUser".into(), json!(v));
    }
    if let Some(v) = settings.privileged {
        ctx.insert("privileged".into(), json!(v));
    }
    if let Some(v) = settings.allow_privilege_escalation {
        ctx.insert("allowPrivilegeEscalation".into(), json!(v));
    }
    if let Some(v) = settings.read_only_root_filesystem {
        ctx.insert("readOnlyRootFilesystem".into(), json!(v));
    }
    if settings.drop_all_capabilities {
        ctx.insert("capabilities".into(), json!({ "drop": ["ALL"] }));
        ctx.insert("seccompProfile".into(), json!({ "type": "RuntimeDefault" }));
    }
    serde_json::Value::Object(ctx)
}

fn container(
    name: &str,
    image: &str,
    command: &[String],
    port: Option<i32>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut c = serde_json::Map::new();
    c.insert("name".into(), json!(name));
    c.insert("image".into(), json!(image));
    if !command.is_empty() {
        c.insert("command".into(), json!(command));
    }
    if let Some(port) = port {
        c.insert("ports".into(), json!([{ "containerPort": port }]));
    }
    c
}

fn pod_manifest(request: &PodRequest) -> serde_json::Value {
    let mut c = container("main", &request.image, &request.command, request.port);
    if let Some(security) = &request.security {
        c.insert("securityContext".into(), security_context(security));
    }

    let mut spec = serde_json::Map::new();
    spec.insert("restartPolicy".into(), json!(request.restart_policy.as_str()));
    spec.insert("terminationGracePeriodSeconds".into(), json!(5));
    if let Some(node) = &request.node_name {
        spec.insert("nodeName".into(), json!(node));
    }
    if let Some(volume) = &request.volume {
        c.insert(
            "volumeMounts".into(),
            json!([{ "name": "data", "mountPath": volume.mount_path }]),
        );
        spec.insert(
            "volumes".into(),
            json!([{ "name": "data", "persistentVolumeClaim": { "claimName": volume.claim_name } }]),
        );
    }
    spec.insert("containers".into(), json!([c]));

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": { "name": request.name, "labels": request.labels },
        "spec": spec,
    })
}

fn deployment_manifest(request: &DeploymentRequest) -> serde_json::Value {
    let c = container("main", &request.image, &request.command, request.port);
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": request.name, "labels": request.labels },
        "spec": {
            "replicas": request.replicas,
            "selector": { "matchLabels": request.labels },
            "template": {
                "metadata": { "labels": request.labels },
                "spec": { "terminationGracePeriodSeconds": 5, "containers": [c] },
            },
        },
    })
}

fn service_manifest(request: &ServiceRequest) -> serde_json::Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": request.name },
        "spec": {
            "type": request.kind.as_str(),
            "selector": request.selector,
            "ports": [{ "port": request.port, "targetPort": request.target_port, "protocol": "TCP" }],
        },
    })
}

fn ingress_manifest(request: &IngressRequest) -> serde_json::Value {
    let mut spec = serde_json::Map::new();
    if let Some(class) = &request.class {
        spec.insert("ingressClassName".into(), json!(class));
    }
    spec.insert(
        "rules".into(),
        json!([{
            "host": request.host,
            "http": {
                "paths": [{
                    "path": "/",
                    "pathType": "Prefix",
                    "backend": {
                        "service": { "name": request.service, "port": { "number": request.port } },
                    },
                }],
            },
        }]),
    );
    json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "Ingress",
        "metadata": { "name": request.name },
        "spec": spec,
    })
}

fn pvc_manifest(request: &PvcRequest) -> serde_json::Value {
    let mut spec = serde_json::Map::new();
    spec.insert("accessModes".into(), json!([request.access_mode.as_str()]));
    spec.insert(
        "resources".into(),
        json!({ "requests": { "storage": request.size } }),
    );
    if let Some(class) = &request.storage_class {
        spec.insert("storageClassName".into(), json!(class));
    }
    json!({
        "apiVersion": "v1",
        "kind": "PersistentVolumeClaim",
        "metadata": { "name": request.name },
        "spec": spec,
    })
}

fn daemonset_manifest(request: &DaemonSetRequest) -> serde_json::Value {
    let c = container("main", &request.image, &request.command, None);
    json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": { "name": request.name, "labels": request.labels },
        "spec": {
            "selector": { "matchLabels": request.labels },
            "template": {
                "metadata": { "labels": request.labels },
                "spec": { "terminationGracePeriodSeconds": 5, "containers": [c] },
            },
        },
    })
}

// ─── Observed state ──────────────────────────────────────────────────

fn pod_state(pod: Pod) -> PodState {
    let name = pod.metadata.name.unwrap_or_default();
    let labels = pod.metadata.labels.unwrap_or_default();
    let node = pod.spec.and_then(|s| s.node_name);
    let status = pod.status.unwrap_or_default();
    let phase = PodPhase::parse(status.phase.as_deref().unwrap_or("Unknown"));
    let containers = status.container_statuses.unwrap_or_default();
    let ready = !containers.is_empty() && containers.iter().all(|c| c.ready);
    let restarts = containers
        .iter()
        .map(|c| u32::try_from(c.restart_count).unwrap_or(0))
        .sum();

    PodState {
        name,
        phase,
        ready,
        node,
        pod_ip: status.pod_ip,
        restarts,
        labels,
    }
}

fn node_info(node: Node) -> NodeInfo {
    let name = node.metadata.name.unwrap_or_default();
    let roles = node
        .metadata
        .labels
        .unwrap_or_default()
        .keys()
        .filter_map(|k| k.strip_prefix(NODE_ROLE_PREFIX))
        .map(str::to_owned)
        .collect();
    let unschedulable = node.spec.and_then(|s| s.unschedulable).unwrap_or(false);
    let status = node.status.unwrap_or_default();

    let conditions = status.conditions.unwrap_or_default();
    let ready = conditions
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");
    let pressure = conditions
        .iter()
        .filter(|c| c.type_.ends_with("Pressure") && c.status == "True")
        .map(|c| c.type_.clone())
        .collect();
    let internal_ip = status
        .addresses
        .unwrap_or_default()
        .into_iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address);
    let kubelet_version = status
        .node_info
        .map(|i| i.kubelet_version)
        .unwrap_or_default();

    NodeInfo {
        name,
        ready,
        roles,
        pressure,
        internal_ip,
        kubelet_version,
        unschedulable,
    }
}

fn storage_class_info(class: StorageClass) -> StorageClassInfo {
    let is_default = class
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(DEFAULT_CLASS_ANNOTATION))
        .is_some_and(|v| v == "true");
    StorageClassInfo {
        name: class.metadata.name.unwrap_or_default(),
        provisioner: class.provisioner,
        is_default,
        allow_expansion: class.allow_volume_expansion.unwrap_or(false),
        binding_mode: class
            .volume_binding_mode
            .unwrap_or_else(|| "Immediate".to_owned()),
    }
}

impl ClusterClient for KubeClusterClient {
    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self
            .client
            .apiserver_version()
            .await
            .map_err(|e| match map_kube_error("server_version", ResourceKind::Node, "", e) {
                ClusterError::Api { message, .. } => ClusterError::Connection(message),
                other => other,
            })?;
        Ok(info.git_version)
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns: Namespace = from_json(
            "create_namespace",
            json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": name, "labels": { "app.kubernetes.io/managed-by": "k3s-validator" } },
            }),
        )?;
        api.create(&PostParams::default(), &ns)
            .await
            .map_err(|e| map_kube_error("create_namespace", ResourceKind::Namespace, name, e))?;
        debug!(namespace = name, "namespace created");
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_namespace", ResourceKind::Namespace, name, e)),
        )
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error("get_namespace", ResourceKind::Namespace, name, e))?;
        Ok(found.is_some())
    }

    async fn create_pod(&self, namespace: &str, pod: &PodRequest) -> Result<(), ClusterError> {
        let api: Api<Pod> = self.namespaced(namespace);
        let manifest: Pod = from_json("create_pod", pod_manifest(pod))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| map_kube_error("create_pod", ResourceKind::Pod, &pod.name, e))?;
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodState, ClusterError> {
        let api: Api<Pod> = self.namespaced(namespace);
        let pod = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_pod", ResourceKind::Pod, name, e))?;
        Ok(pod_state(pod))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Pod> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_pod", ResourceKind::Pod, name, e)),
        )
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodState>, ClusterError> {
        let api: Api<Pod> = self.namespaced(namespace);
        let mut params = ListParams::default();
        if let Some(selector) = selector {
            params = params.labels(selector);
        }
        let pods = api
            .list(&params)
            .await
            .map_err(|e| map_kube_error("list_pods", ResourceKind::Namespace, namespace, e))?;
        Ok(pods.items.into_iter().map(pod_state).collect())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let api: Api<Pod> = self.namespaced(namespace);
        api.logs(name, &LogParams::default())
            .await
            .map_err(|e| map_kube_error("pod_logs", ResourceKind::Pod, name, e))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &DeploymentRequest,
    ) -> Result<(), ClusterError> {
        let api: Api<Deployment> = self.namespaced(namespace);
        let manifest: Deployment = from_json("create_deployment", deployment_manifest(deployment))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| {
                map_kube_error("create_deployment", ResourceKind::Deployment, &deployment.name, e)
            })?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentState, ClusterError> {
        let api: Api<Deployment> = self.namespaced(namespace);
        let deployment = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_deployment", ResourceKind::Deployment, name, e))?;
        let desired = deployment.spec.and_then(|s| s.replicas).unwrap_or(1);
        let status = deployment.status.unwrap_or_default();
        Ok(DeploymentState {
            name: name.to_owned(),
            desired,
            ready: status.ready_replicas.unwrap_or(0),
            available: status.available_replicas.unwrap_or(0),
        })
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Deployment> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::foreground())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_deployment", ResourceKind::Deployment, name, e)),
        )
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceRequest,
    ) -> Result<(), ClusterError> {
        let api: Api<Service> = self.namespaced(namespace);
        let manifest: Service = from_json("create_service", service_manifest(service))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| map_kube_error("create_service", ResourceKind::Service, &service.name, e))?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceState, ClusterError> {
        let api: Api<Service> = self.namespaced(namespace);
        let service = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_service", ResourceKind::Service, name, e))?;
        let spec = service.spec.unwrap_or_default();
        let kind = match spec.type_.as_deref() {
            Some("LoadBalancer") => ServiceKind::LoadBalancer,
            _ => ServiceKind::ClusterIp,
        };
        let load_balancer_ips = service
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|i| i.ip.or(i.hostname))
            .collect();
        Ok(ServiceState {
            name: name.to_owned(),
            kind,
            cluster_ip: spec.cluster_ip,
            load_balancer_ips,
        })
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Service> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_service", ResourceKind::Service, name, e)),
        )
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &IngressRequest,
    ) -> Result<(), ClusterError> {
        let api: Api<Ingress> = self.namespaced(namespace);
        let manifest: Ingress = from_json("create_ingress", ingress_manifest(ingress))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| map_kube_error("create_ingress", ResourceKind::Ingress, &ingress.name, e))?;
        Ok(())
    }

    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressState, ClusterError> {
        let api: Api<Ingress> = self.namespaced(namespace);
        let ingress = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_ingress", ResourceKind::Ingress, name, e))?;
        let hosts = ingress
            .spec
            .and_then(|s| s.rules)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|r| r.host)
            .collect();
        let load_balancer_ips = ingress
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|i| i.ip.or(i.hostname))
            .collect();
        Ok(IngressState {
            name: name.to_owned(),
            hosts,
            load_balancer_ips,
        })
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<Ingress> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_ingress", ResourceKind::Ingress, name, e)),
        )
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PvcRequest) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        let manifest: PersistentVolumeClaim = from_json("create_pvc", pvc_manifest(pvc))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| {
                map_kube_error("create_pvc", ResourceKind::PersistentVolumeClaim, &pvc.name, e)
            })?;
        Ok(())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PvcState, ClusterError> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        let pvc = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_pvc", ResourceKind::PersistentVolumeClaim, name, e))?;
        let storage_class = pvc.spec.and_then(|s| s.storage_class_name);
        let status = pvc.status.unwrap_or_default();
        let capacity = status
            .capacity
            .and_then(|c| c.get("storage").map(|q| q.0.clone()));
        Ok(PvcState {
            name: name.to_owned(),
            phase: PvcPhase::parse(status.phase.as_deref().unwrap_or("Pending")),
            storage_class,
            capacity,
        })
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| {
                    map_kube_error("delete_pvc", ResourceKind::PersistentVolumeClaim, name, e)
                }),
        )
    }

    async fn expand_pvc(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError> {
        let api: Api<PersistentVolumeClaim> = self.namespaced(namespace);
        let patch = json!({ "spec": { "resources": { "requests": { "storage": size } } } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error("expand_pvc", ResourceKind::PersistentVolumeClaim, name, e))?;
        Ok(())
    }

    async fn create_daemonset(
        &self,
        namespace: &str,
        daemonset: &DaemonSetRequest,
    ) -> Result<(), ClusterError> {
        let api: Api<DaemonSet> = self.namespaced(namespace);
        let manifest: DaemonSet = from_json("create_daemonset", daemonset_manifest(daemonset))?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| {
                map_kube_error("create_daemonset", ResourceKind::DaemonSet, &daemonset.name, e)
            })?;
        Ok(())
    }

    async fn get_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSetState, ClusterError> {
        let api: Api<DaemonSet> = self.namespaced(namespace);
        let daemonset = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_daemonset", ResourceKind::DaemonSet, name, e))?;
        let status = daemonset.status.unwrap_or_default();
        Ok(DaemonSetState {
            name: name.to_owned(),
            desired: status.desired_number_scheduled,
            ready: status.number_ready,
        })
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<DaemonSet> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_daemonset", ResourceKind::DaemonSet, name, e)),
        )
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapRequest,
    ) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        let manifest: ConfigMap = from_json(
            "create_config_map",
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": config_map.name },
                "data": config_map.data,
            }),
        )?;
        api.create(&PostParams::default(), &manifest)
            .await
            .map_err(|e| {
                map_kube_error("create_config_map", ResourceKind::ConfigMap, &config_map.name, e)
            })?;
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        let config_map = api
            .get(name)
            .await
            .map_err(|e| map_kube_error("get_config_map", ResourceKind::ConfigMap, name, e))?;
        Ok(config_map.data.unwrap_or_default())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        ignore_not_found(
            api.delete(name, &DeleteParams::default())
                .await
                .map(|_| ())
                .map_err(|e| map_kube_error("delete_config_map", ResourceKind::ConfigMap, name, e)),
        )
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error("list_nodes", ResourceKind::Node, "", e))?;
        Ok(nodes.items.into_iter().map(node_info).collect())
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        let classes = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_error("list_storage_classes", ResourceKind::StorageClass, "", e))?;
        Ok(classes.items.into_iter().map(storage_class_info).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{AccessMode, RestartPolicy};

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("status {code}"),
            reason: "Test".to_owned(),
            code,
        })
    }

    #[test]
    fn api_status_codes_map_to_domain_errors() {
        assert!(matches!(
            map_kube_error("get_pod", ResourceKind::Pod, "web", api_error(404)),
            ClusterError::NotFound { kind: ResourceKind::Pod, .. }
        ));
        assert!(matches!(
            map_kube_error("create_pod", ResourceKind::Pod, "web", api_error(409)),
            ClusterError::AlreadyExists { .. }
        ));
        let forbidden = map_kube_error("create_pod", ResourceKind::Pod, "web", api_error(403));
        assert!(forbidden.is_rejection());
        assert!(!forbidden.is_fatal());
    }

    #[test]
    fn ingress_manifest_routes_host_to_service() {
        let request =
            IngressRequest::new("route-1a2b", "route-1a2b.k3s-validator.test", "web-1a2b", 80)
                .class("traefik");
        let ingress: Ingress = from_json("create_ingress", ingress_manifest(&request)).unwrap();

        let spec = ingress.spec.unwrap();
        assert_eq!(spec.ingress_class_name.as_deref(), Some("traefik"));
        let rule = &spec.rules.unwrap()[0];
        assert_eq!(rule.host.as_deref(), Some("route-1a2b.k3s-validator.test"));
        let path = &rule.http.as_ref().unwrap().paths[0];
        assert_eq!(path.path_type, "Prefix");
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "web-1a2b");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(80));
    }

    #[test]
    fn pod_manifest_is_a_valid_pod() {
        let request = PodRequest::new("writer", "busybox:1.36")
            .shell("echo ok > /data/probe")
            .label("app", "writer")
            .with_volume("data-1a2b3c4d", "/data")
            .with_security(SecuritySettings::restricted(1000));
        let pod: Pod = from_json("create_pod", pod_manifest(&request)).unwrap();

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some(RestartPolicy::Never.as_str()));
        let container = &spec.containers[0];
        assert_eq!(container.image.as_deref(), Some("busybox:1.36"));
        let security = container.security_context.clone().unwrap();
        assert_eq!(security.run_as_non_root, Some(true));
        assert_eq!(security.allow_privilege_escalation, Some(false));
        let volumes = spec.volumes.unwrap();
        assert_eq!(
            volumes[0].persistent_volume_claim.as_ref().map(|c| c.claim_name.as_str()),
            Some("data-1a2b3c4d")
        );
    }

    #[test]
    fn pvc_manifest_carries_class_and_access_mode() {
        let request = PvcRequest::new("shared", "1Gi")
            .storage_class("local-path")
            .access_mode(AccessMode::ReadWriteMany);
        let pvc: PersistentVolumeClaim = from_json("create_pvc", pvc_manifest(&request)).unwrap();
        let spec = pvc.spec.unwrap();
        assert_eq!(spec.storage_class_name.as_deref(), Some("local-path"));
        assert_eq!(spec.access_modes, Some(vec!["ReadWriteMany".to_owned()]));
    }

    #[test]
    fn deployment_selector_matches_template_labels() {
        let request = DeploymentRequest::new("web", "nginx:1.25-alpine", 2).port(80);
        let deployment: Deployment =
            from_json("create_deployment", deployment_manifest(&request)).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        assert_eq!(
            spec.selector.match_labels,
            spec.template.metadata.and_then(|m| m.labels)
        );
    }

    #[test]
    fn node_roles_come_from_labels() {
        let node: Node = serde_json::from_value(json!({
            "metadata": {
                "name": "k3s-server-1",
                "labels": {
                    "node-role.kubernetes.io/control-plane": "true",
                    "node-role.kubernetes.io/etcd": "true",
                    "kubernetes.io/hostname": "k3s-server-1",
                },
            },
            "status": {
                "conditions": [
                    { "type": "Ready", "status": "True" },
                    { "type": "MemoryPressure", "status": "True" },
                    { "type": "DiskPressure", "status": "False" },
                ],
                "addresses": [{ "type": "InternalIP", "address": "192.168.1.11" }],
            },
        }))
        .unwrap();

        let info = node_info(node);
        assert!(info.ready);
        assert!(info.is_control_plane());
        assert!(info.runs_etcd());
        assert_eq!(info.pressure, vec!["MemoryPressure".to_owned()]);
        assert_eq!(info.internal_ip.as_deref(), Some("192.168.1.11"));
    }

    #[test]
    fn default_storage_class_is_read_from_annotation() {
        let class: StorageClass = serde_json::from_value(json!({
            "metadata": {
                "name": "local-path",
                "annotations": { "storageclass.kubernetes.io/is-default-class": "true" },
            },
            "provisioner": "rancher.io/local-path",
            "volumeBindingMode": "WaitForFirstConsumer",
        }))
        .unwrap();
        let info = storage_class_info(class);
        assert!(info.is_default);
        assert!(info.waits_for_consumer());
        assert!(!info.allow_expansion);
    }
}
