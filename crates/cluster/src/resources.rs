//! Requests for resources the validator creates, and the observed state it reads back.
//!
//! These are deliberately smaller than the Kubernetes API objects: they carry
//! exactly what the test modules set or assert on, so the simulated cluster
//! and the `kube` implementation share one vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace of the k3s system add-ons.
pub const KUBE_SYSTEM: &str = "kube-system";

/// Provisioner of the storage class k3s ships by default.
pub const LOCAL_PATH_PROVISIONER: &str = "rancher.io/local-path";

/// Label k3s' service load balancer puts on its `svclb-*` pods.
pub const SVCLB_SERVICE_LABEL: &str = "svccontroller.k3s.cattle.io/svcname";

/// Annotation marking the default storage class.
pub const DEFAULT_CLASS_ANNOTATION: &str = "storageclass.kubernetes.io/is-default-class";

/// Kinds of object the validator creates or inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Namespace,
    Pod,
    Deployment,
    Service,
    PersistentVolumeClaim,
    DaemonSet,
    ConfigMap,
    Ingress,
    Node,
    StorageClass,
}

impl ResourceKind {
    /// Short name as used by `kubectl`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace",
            Self::Pod => "pod",
            Self::Deployment => "deployment",
            Self::Service => "service",
            Self::PersistentVolumeClaim => "pvc",
            Self::DaemonSet => "daemonset",
            Self::ConfigMap => "configmap",
            Self::Ingress => "ingress",
            Self::Node => "node",
            Self::StorageClass => "storageclass",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced object reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Pod, namespace, name)
    }

    pub fn pvc(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::PersistentVolumeClaim, namespace, name)
    }

    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Deployment, namespace, name)
    }

    pub fn service(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Service, namespace, name)
    }

    pub fn daemonset(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::DaemonSet, namespace, name)
    }

    pub fn ingress(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ResourceKind::Ingress, namespace, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

// ─── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    #[default]
    Always,
    OnFailure,
    Never,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::OnFailure => "OnFailure",
            Self::Never => "Never",
        }
    }
}

/// PVC mounted into a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub claim_name: String,
    pub mount_path: String,
}

/// Container security context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecuritySettings {
    pub run_as_non_root: Option<bool>,
    pub run_as_user: Option<i64>,
    pub privileged: Option<bool>,
    pub allow_privilege_escalation: Option<bool>,
    pub read_only_root_filesystem: Option<bool>,
    pub drop_all_capabilities: bool,
}

impl SecuritySettings {
    /// Settings that satisfy the `restricted` Pod Security Standard.
    pub fn restricted(uid: i64) -> Self {
        Self {
            run_as_non_root: Some(true),
            run_as_user: Some(uid),
            privileged: Some(false),
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            drop_all_capabilities: true,
        }
    }

    pub fn privileged() -> Self {
        Self {
            privileged: Some(true),
            ..Self::default()
        }
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged == Some(true)
    }
}

/// Single-container pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRequest {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub restart_policy: RestartPolicy,
    pub node_name: Option<String>,
    pub volume: Option<VolumeMount>,
    pub security: Option<SecuritySettings>,
    pub port: Option<i32>,
}

impl PodRequest {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            labels: BTreeMap::new(),
            restart_policy: RestartPolicy::Always,
            node_name: None,
            volume: None,
            security: None,
            port: None,
        }
    }

    /// Run `sh -c <script>` once and stop.
    pub fn shell(mut self, script: impl Into<String>) -> Self {
        self.command = vec!["sh".to_owned(), "-c".to_owned(), script.into()];
        self.restart_policy = RestartPolicy::Never;
        self
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn restart_policy(mut self, policy: RestartPolicy) -> Self {
        self.restart_policy = policy;
        self
    }

    pub fn on_node(mut self, node: impl Into<String>) -> Self {
        self.node_name = Some(node.into());
        self
    }

    pub fn with_volume(mut self, claim_name: impl Into<String>, mount_path: impl Into<String>) -> Self {
        self.volume = Some(VolumeMount {
            claim_name: claim_name.into(),
            mount_path: mount_path.into(),
        });
        self
    }

    pub fn with_security(mut self, security: SecuritySettings) -> Self {
        self.security = Some(security);
        self
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    /// The full command line, for logs and command echo.
    pub fn command_line(&self) -> String {
        self.command.join(" ")
    }
}

/// Deployment whose selector equals its pod labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRequest {
    pub name: String,
    pub image: String,
    pub replicas: i32,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
    pub port: Option<i32>,
}

impl DeploymentRequest {
    /// A deployment labelled `app=<name>`.
    pub fn new(name: impl Into<String>, image: impl Into<String>, replicas: i32) -> Self {
        let name = name.into();
        let labels = BTreeMap::from([("app".to_owned(), name.clone())]);
        Self {
            name,
            image: image.into(),
            replicas,
            labels,
            command: Vec::new(),
            port: None,
        }
    }

    pub fn port(mut self, port: i32) -> Self {
        self.port = Some(port);
        self
    }

    /// `key=value,...` selector matching the pods of this deployment.
    pub fn selector(&self) -> String {
        format_selector(&self.labels)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceKind {
    #[default]
    ClusterIp,
    LoadBalancer,
}

impl ServiceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterIp => "ClusterIP",
            Self::LoadBalancer => "LoadBalancer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    pub name: String,
    pub kind: ServiceKind,
    pub selector: BTreeMap<String, String>,
    pub port: i32,
    pub target_port: i32,
}

impl ServiceRequest {
    pub fn new(name: impl Into<String>, selector: BTreeMap<String, String>, port: i32) -> Self {
        Self {
            name: name.into(),
            kind: ServiceKind::ClusterIp,
            selector,
            port,
            target_port: port,
        }
    }

    pub fn load_balancer(mut self) -> Self {
        self.kind = ServiceKind::LoadBalancer;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    ReadWriteOnce,
    ReadOnlyMany,
    ReadWriteMany,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadWriteOnce => "ReadWriteOnce",
            Self::ReadOnlyMany => "ReadOnlyMany",
            Self::ReadWriteMany => "ReadWriteMany",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvcRequest {
    pub name: String,
    /// `None` uses the cluster default storage class.
    pub storage_class: Option<String>,
    pub access_mode: AccessMode,
    /// Quantity such as `1Gi`.
    pub size: String,
}

impl PvcRequest {
    pub fn new(name: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_class: None,
            access_mode: AccessMode::ReadWriteOnce,
            size: size.into(),
        }
    }

    pub fn storage_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonSetRequest {
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
    pub command: Vec<String>,
}

impl DaemonSetRequest {
    /// A daemonset labelled `app=<name>`.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        let name = name.into();
        let labels = BTreeMap::from([("app".to_owned(), name.clone())]);
        Self {
            name,
            image: image.into(),
            labels,
            command: Vec::new(),
        }
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = args.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMapRequest {
    pub name: String,
    pub data: BTreeMap<String, String>,
}

impl ConfigMapRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    pub fn entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// Ingress with a single host rule routing `/` to one service port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRequest {
    pub name: String,
    pub host: String,
    pub service: String,
    pub port: i32,
    /// `None` leaves the choice to the cluster's default ingress class.
    pub class: Option<String>,
}

impl IngressRequest {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        service: impl Into<String>,
        port: i32,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            service: service.into(),
            port,
            class: None,
        }
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }
}

// ─── Observed state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodState {
    pub name: String,
    pub phase: PodPhase,
    pub ready: bool,
    pub node: Option<String>,
    pub pod_ip: Option<String>,
    pub restarts: u32,
    pub labels: BTreeMap<String, String>,
}

impl PodState {
    /// `Running/ready` style summary used as the last observed state.
    pub fn summary(&self) -> String {
        if self.phase == PodPhase::Running {
            let ready = if self.ready { "ready" } else { "not ready" };
            format!("Running/{ready}")
        } else {
            self.phase.to_string()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub name: String,
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
}

impl DeploymentState {
    pub fn is_available(&self) -> bool {
        self.desired > 0 && self.available >= self.desired
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: String,
    pub kind: ServiceKind,
    pub cluster_ip: Option<String>,
    pub load_balancer_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressState {
    pub name: String,
    pub hosts: Vec<String>,
    /// Addresses the ingress controller published in the status.
    pub load_balancer_ips: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PvcPhase {
    #[default]
    Pending,
    Bound,
    Lost,
}

impl PvcPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Bound" => Self::Bound,
            "Lost" => Self::Lost,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for PvcPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PvcState {
    pub name: String,
    pub phase: PvcPhase,
    pub storage_class: Option<String>,
    /// Provisioned capacity, once bound.
    pub capacity: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonSetState {
    pub name: String,
    pub desired: i32,
    pub ready: i32,
}

impl DaemonSetState {
    pub fn is_ready(&self) -> bool {
        self.desired > 0 && self.ready >= self.desired
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub ready: bool,
    /// Roles from `node-role.kubernetes.io/<role>` labels.
    pub roles: Vec<String>,
    /// Names of pressure conditions currently `True`.
    pub pressure: Vec<String>,
    pub internal_ip: Option<String>,
    pub kubelet_version: String,
    pub unschedulable: bool,
}

impl NodeInfo {
    /// A ready node with the given roles and no pressure.
    pub fn ready(name: impl Into<String>, roles: &[&str], internal_ip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ready: true,
            roles: roles.iter().map(|r| (*r).to_owned()).collect(),
            pressure: Vec::new(),
            internal_ip: Some(internal_ip.into()),
            kubelet_version: "v1.30.4+k3s1".to_owned(),
            unschedulable: false,
        }
    }

    pub fn is_control_plane(&self) -> bool {
        self.roles
            .iter()
            .any(|r| r == "control-plane" || r == "master")
    }

    pub fn runs_etcd(&self) -> bool {
        self.roles.iter().any(|r| r == "etcd")
    }

    pub fn is_schedulable(&self) -> bool {
        self.ready && !self.unschedulable
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageClassInfo {
    pub name: String,
    pub provisioner: String,
    pub is_default: bool,
    pub allow_expansion: bool,
    /// `Immediate` or `WaitForFirstConsumer`.
    pub binding_mode: String,
}

impl StorageClassInfo {
    pub fn waits_for_consumer(&self) -> bool {
        self.binding_mode == "WaitForFirstConsumer"
    }
}

/// Render labels as a `key=value,...` selector.
pub fn format_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Whether `labels` satisfy an equality-based `key=value,...` selector.
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => labels.get(key.trim()).map(String::as_str) == Some(value.trim()),
            None => labels.contains_key(term),
        })
}
