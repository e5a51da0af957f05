//! In-memory cluster for tests and offline runs.
//!
//! [`SimulatedCluster`] models just enough of Kubernetes for every validator
//! module to run against it: scheduling onto ready nodes, PVC binding by
//! storage class, deployments that replace deleted pods, k3s' `svclb` load
//! balancer pods, and Pod Security admission of privileged pods.
//!
//! Behaviour is configured with builder methods; every call is appended to a
//! call log (`"<operation> <namespace>/<name>"`) that tests assert on.
//!
//! ```
//! use k3s_validator_cluster::{ClusterClient, PvcBinding, SimulatedCluster};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let cluster = SimulatedCluster::healthy_single_node().with_pvc_binding(PvcBinding::Never);
//! cluster.create_namespace("k3s-test-20260118-093000").await.unwrap();
//! assert_eq!(cluster.count_calls("create_namespace").await, 1);
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};

use k3s_validator_core::naming::validate_dns_label;
use tokio::sync::Mutex;

use crate::client::ClusterClient;
use crate::error::ClusterError;
use crate::resources::{
    AccessMode, ConfigMapRequest, DaemonSetRequest, DaemonSetState, DeploymentRequest,
    DeploymentState, IngressRequest, IngressState, KUBE_SYSTEM, LOCAL_PATH_PROVISIONER, NodeInfo,
    PodPhase, PodRequest, PodState, PvcPhase, PvcRequest, PvcState, ResourceKind, RestartPolicy,
    SVCLB_SERVICE_LABEL, SecuritySettings, ServiceKind, ServiceRequest, ServiceState,
    StorageClassInfo, selector_matches,
};

/// How PVCs are bound.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PvcBinding {
    /// Follow the storage class: bind on creation for `Immediate`, on first
    /// consuming pod for `WaitForFirstConsumer`.
    #[default]
    Provision,
    /// Claims stay `Pending` forever.
    Never,
}

#[derive(Debug, Clone)]
struct Settings {
    version: String,
    endpoint: String,
    nodes: Vec<NodeInfo>,
    storage_classes: Vec<StorageClassInfo>,
    pvc_binding: PvcBinding,
    failing_commands: Vec<String>,
    failing_operations: BTreeSet<String>,
    unreachable_operations: BTreeSet<String>,
    unreachable: bool,
    load_balancer: bool,
    pod_security_enforced: bool,
}

#[derive(Debug)]
struct SimPod {
    state: PodState,
    owner: Option<String>,
    logs: String,
}

#[derive(Debug)]
struct SimPvc {
    request: PvcRequest,
    state: PvcState,
}

#[derive(Debug, Default)]
struct SimNamespace {
    pods: BTreeMap<String, SimPod>,
    deployments: BTreeMap<String, DeploymentRequest>,
    services: BTreeMap<String, ServiceState>,
    ingresses: BTreeMap<String, IngressRequest>,
    pvcs: BTreeMap<String, SimPvc>,
    daemonsets: BTreeMap<String, DaemonSetRequest>,
    config_maps: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeMap<String, SimNamespace>,
    calls: Vec<String>,
    /// Command fragments with the number of pods still to fail.
    flaky_commands: Vec<(String, u32)>,
    next_pod_ip: u32,
    next_service_ip: u32,
    next_suffix: u32,
    next_node: usize,
}

impl State {
    fn namespace(&self, name: &str) -> Result<&SimNamespace, ClusterError> {
        self.namespaces.get(name).ok_or_else(|| ClusterError::NotFound {
            kind: ResourceKind::Namespace,
            name: name.to_owned(),
        })
    }

    fn namespace_mut(&mut self, name: &str) -> Result<&mut SimNamespace, ClusterError> {
        self.namespaces
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound {
                kind: ResourceKind::Namespace,
                name: name.to_owned(),
            })
    }

    fn pod_ip(&mut self) -> String {
        self.next_pod_ip += 1;
        format!("10.42.{}.{}", self.next_pod_ip / 250, self.next_pod_ip % 250 + 2)
    }

    fn service_ip(&mut self) -> String {
        self.next_service_ip += 1;
        format!("10.43.{}.{}", self.next_service_ip / 250, self.next_service_ip % 250 + 20)
    }

    fn consume_flaky(&mut self, command: &str) -> bool {
        match self
            .flaky_commands
            .iter_mut()
            .find(|(fragment, remaining)| *remaining > 0 && command.contains(fragment.as_str()))
        {
            Some((_, remaining)) => {
                *remaining -= 1;
                true
            }
            None => false,
        }
    }

    fn suffix(&mut self) -> String {
        self.next_suffix += 1;
        format!("{:05x}", self.next_suffix)
    }
}

/// In-memory [`ClusterClient`].
#[derive(Debug)]
pub struct SimulatedCluster {
    settings: Settings,
    state: Mutex<State>,
}

impl Default for SimulatedCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCluster {
    /// A reachable cluster with no nodes, storage classes or system pods.
    pub fn new() -> Self {
        let mut state = State::default();
        state
            .namespaces
            .insert(KUBE_SYSTEM.to_owned(), SimNamespace::default());
        Self {
            settings: Settings {
                version: "v1.30.4+k3s1".to_owned(),
                endpoint: "https://127.0.0.1:6443".to_owned(),
                nodes: Vec::new(),
                storage_classes: Vec::new(),
                pvc_binding: PvcBinding::Provision,
                failing_commands: Vec::new(),
                failing_operations: BTreeSet::new(),
                unreachable_operations: BTreeSet::new(),
                unreachable: false,
                load_balancer: true,
                pod_security_enforced: false,
            },
            state: Mutex::new(state),
        }
    }

    /// One k3s server with the default add-ons running.
    pub fn healthy_single_node() -> Self {
        Self::healthy_cluster(1, 0)
    }

    /// `servers` control-plane nodes (embedded etcd when more than one) and
    /// `agents` workers, all ready, with the default k3s add-ons.
    pub fn healthy_cluster(servers: usize, agents: usize) -> Self {
        let mut nodes = Vec::new();
        for i in 1..=servers {
            let mut roles = vec!["control-plane", "master"];
            if servers > 1 {
                roles.push("etcd");
            }
            nodes.push(NodeInfo::ready(
                format!("k3s-server-{i}"),
                &roles,
                format!("192.168.1.{}", 10 + i),
            ));
        }
        for i in 1..=agents {
            nodes.push(NodeInfo::ready(
                format!("k3s-agent-{i}"),
                &[],
                format!("192.168.1.{}", 100 + i),
            ));
        }

        let cluster = Self::new().with_nodes(nodes).with_storage_class(StorageClassInfo {
            name: "local-path".to_owned(),
            provisioner: LOCAL_PATH_PROVISIONER.to_owned(),
            is_default: true,
            allow_expansion: false,
            binding_mode: "WaitForFirstConsumer".to_owned(),
        });
        cluster.with_default_addons()
    }

    fn with_default_addons(mut self) -> Self {
        let first_node = self.settings.nodes.first().map(|n| n.name.clone());
        let node_ips: Vec<(String, Option<String>)> = self
            .settings
            .nodes
            .iter()
            .filter(|n| n.is_schedulable())
            .map(|n| (n.name.clone(), n.internal_ip.clone()))
            .collect();

        let running = |name: &str, labels: &[(&str, &str)], node: Option<String>| PodState {
            name: name.to_owned(),
            phase: PodPhase::Running,
            ready: true,
            node,
            pod_ip: None,
            restarts: 0,
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        };

        let mut pods = vec![
            running("coredns-576bfc4dc7-x2kfp", &[("k8s-app", "kube-dns")], first_node.clone()),
            running(
                "local-path-provisioner-6795b5f9d8-7rbxn",
                &[("app", "local-path-provisioner")],
                first_node.clone(),
            ),
            running(
                "metrics-server-557ff575fb-q5nkz",
                &[("k8s-app", "metrics-server")],
                first_node.clone(),
            ),
            running(
                "traefik-5fb479b77-9lwqn",
                &[("app.kubernetes.io/name", "traefik")],
                first_node.clone(),
            ),
            PodState {
                phase: PodPhase::Succeeded,
                ready: false,
                ..running("helm-install-traefik-crd-ncvqw", &[], first_node.clone())
            },
        ];
        for (i, (node, _)) in node_ips.iter().enumerate() {
            pods.push(running(
                &format!("svclb-traefik-{:05x}", i + 1),
                &[(SVCLB_SERVICE_LABEL, "traefik"), ("app", "svclb-traefik")],
                Some(node.clone()),
            ));
        }
        for pod in pods {
            self = self.with_system_pod(pod);
        }

        let lb_ips: Vec<String> = node_ips.into_iter().filter_map(|(_, ip)| ip).collect();
        let kube_system = self
            .state
            .get_mut()
            .namespaces
            .entry(KUBE_SYSTEM.to_owned())
            .or_default();
        kube_system.services.insert(
            "kube-dns".to_owned(),
            ServiceState {
                name: "kube-dns".to_owned(),
                kind: ServiceKind::ClusterIp,
                cluster_ip: Some("10.43.0.10".to_owned()),
                load_balancer_ips: Vec::new(),
            },
        );
        kube_system.services.insert(
            "traefik".to_owned(),
            ServiceState {
                name: "traefik".to_owned(),
                kind: ServiceKind::LoadBalancer,
                cluster_ip: Some("10.43.12.7".to_owned()),
                load_balancer_ips: lb_ips,
            },
        );
        self
    }

    // --- builder ---

    pub fn with_nodes(mut self, nodes: Vec<NodeInfo>) -> Self {
        self.settings.nodes = nodes;
        self
    }

    pub fn with_node(mut self, node: NodeInfo) -> Self {
        self.settings.nodes.push(node);
        self
    }

    pub fn with_storage_classes(mut self, classes: Vec<StorageClassInfo>) -> Self {
        self.settings.storage_classes = classes;
        self
    }

    pub fn with_storage_class(mut self, class: StorageClassInfo) -> Self {
        self.settings.storage_classes.push(class);
        self
    }

    /// Add or replace a pod in `kube-system`.
    pub fn with_system_pod(mut self, pod: PodState) -> Self {
        let kube_system = self
            .state
            .get_mut()
            .namespaces
            .entry(KUBE_SYSTEM.to_owned())
            .or_default();
        kube_system.pods.insert(
            pod.name.clone(),
            SimPod {
                state: pod,
                owner: None,
                logs: String::new(),
            },
        );
        self
    }

    /// Remove `kube-system` pods whose name starts with `prefix`.
    pub fn without_system_pods(mut self, prefix: &str) -> Self {
        if let Some(kube_system) = self.state.get_mut().namespaces.get_mut(KUBE_SYSTEM) {
            kube_system.pods.retain(|name, _| !name.starts_with(prefix));
        }
        self
    }

    pub fn with_pvc_binding(mut self, binding: PvcBinding) -> Self {
        self.settings.pvc_binding = binding;
        self
    }

    /// Pods whose command line contains `fragment` fail.
    pub fn with_failing_command(mut self, fragment: impl Into<String>) -> Self {
        self.settings.failing_commands.push(fragment.into());
        self
    }

    /// The first `failures` pods whose command line contains `fragment`
    /// fail; later ones succeed.
    pub fn with_flaky_command(mut self, fragment: impl Into<String>, failures: u32) -> Self {
        self.state
            .get_mut()
            .flaky_commands
            .push((fragment.into(), failures));
        self
    }

    /// `operation` (e.g. `"create_pvc"`) returns a server error.
    pub fn with_failing_operation(mut self, operation: impl Into<String>) -> Self {
        self.settings.failing_operations.insert(operation.into());
        self
    }

    /// `operation` behaves as if the API server went away.
    pub fn with_unreachable_operation(mut self, operation: impl Into<String>) -> Self {
        self.settings.unreachable_operations.insert(operation.into());
        self
    }

    /// Every call fails with a connection error.
    pub fn unreachable(mut self) -> Self {
        self.settings.unreachable = true;
        self
    }

    /// `LoadBalancer` services never get an ingress IP.
    pub fn without_load_balancer(mut self) -> Self {
        self.settings.load_balancer = false;
        self
    }

    /// Privileged pods are rejected at admission.
    pub fn with_pod_security_enforced(mut self) -> Self {
        self.settings.pod_security_enforced = true;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.settings.version = version.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.settings.endpoint = endpoint.into();
        self
    }

    // --- inspection ---

    /// Every call so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.lock().await.calls.clone()
    }

    /// Number of calls to `operation`.
    pub async fn count_calls(&self, operation: &str) -> usize {
        let prefix = format!("{operation} ");
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Number of delete calls issued for namespace `name`.
    pub async fn namespace_deletions(&self, name: &str) -> usize {
        let call = format!("delete_namespace {name}");
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| **c == call)
            .count()
    }

    /// Namespaces that currently exist.
    pub async fn namespaces(&self) -> Vec<String> {
        self.state.lock().await.namespaces.keys().cloned().collect()
    }

    // --- internals ---

    fn begin(&self, state: &mut State, operation: &str, target: &str) -> Result<(), ClusterError> {
        state.calls.push(format!("{operation} {target}"));
        if self.settings.unreachable || self.settings.unreachable_operations.contains(operation) {
            return Err(ClusterError::Connection(format!(
                "{}: connection refused",
                self.settings.endpoint
            )));
        }
        if self.settings.failing_operations.contains(operation) {
            return Err(ClusterError::Api {
                operation: operation.to_owned(),
                code: Some(500),
                message: "simulated server error".to_owned(),
            });
        }
        Ok(())
    }

    fn storage_class_for(&self, request: &PvcRequest) -> Option<&StorageClassInfo> {
        match &request.storage_class {
            Some(name) => self.settings.storage_classes.iter().find(|c| c.name == *name),
            None => self.settings.storage_classes.iter().find(|c| c.is_default),
        }
    }

    fn can_bind(&self, request: &PvcRequest) -> bool {
        if self.settings.pvc_binding == PvcBinding::Never {
            return false;
        }
        match self.storage_class_for(request) {
            // local-path only provisions node-local ReadWriteOnce volumes
            Some(class) if class.provisioner == LOCAL_PATH_PROVISIONER => {
                request.access_mode == AccessMode::ReadWriteOnce
            }
            Some(_) => true,
            None => false,
        }
    }

    fn bind(pvc: &mut SimPvc) {
        pvc.state.phase = PvcPhase::Bound;
        pvc.state.capacity = Some(pvc.request.size.clone());
    }

    /// Bind a waiting claim for a consuming pod; `true` when the claim is bound.
    fn bind_for_consumer(&self, state: &mut State, namespace: &str, claim: &str) -> bool {
        let Some(ns) = state.namespaces.get_mut(namespace) else {
            return false;
        };
        let Some(pvc) = ns.pvcs.get_mut(claim) else {
            return false;
        };
        if pvc.state.phase == PvcPhase::Bound {
            return true;
        }
        if self.can_bind(&pvc.request) {
            Self::bind(pvc);
            return true;
        }
        false
    }

    fn pick_node(&self, state: &mut State, requested: Option<&str>) -> Option<String> {
        if let Some(name) = requested {
            return self
                .settings
                .nodes
                .iter()
                .find(|n| n.name == name && n.is_schedulable())
                .map(|n| n.name.clone());
        }
        let schedulable: Vec<&NodeInfo> = self
            .settings
            .nodes
            .iter()
            .filter(|n| n.is_schedulable())
            .collect();
        if schedulable.is_empty() {
            return None;
        }
        let node = schedulable[state.next_node % schedulable.len()].name.clone();
        state.next_node += 1;
        Some(node)
    }

    fn schedule_pod(
        &self,
        state: &mut State,
        namespace: &str,
        request: &PodRequest,
        owner: Option<String>,
    ) -> SimPod {
        let node = self.pick_node(state, request.node_name.as_deref());
        let mut pod = PodState {
            name: request.name.clone(),
            phase: PodPhase::Pending,
            ready: false,
            node: node.clone(),
            pod_ip: None,
            restarts: 0,
            labels: request.labels.clone(),
        };
        let mut logs = String::new();

        let storage_ready = match &request.volume {
            Some(volume) => self.bind_for_consumer(state, namespace, &volume.claim_name),
            None => true,
        };

        if node.is_some() && storage_ready {
            pod.pod_ip = Some(state.pod_ip());
            let command = request.command_line();
            let failing = self
                .settings
                .failing_commands
                .iter()
                .any(|fragment| command.contains(fragment.as_str()))
                || state.consume_flaky(&command);
            match (failing, request.restart_policy) {
                (true, RestartPolicy::Never) => {
                    pod.phase = PodPhase::Failed;
                    logs = format!("{command}: exit status 1\n");
                }
                (true, _) => {
                    pod.phase = PodPhase::Running;
                    pod.restarts = 5;
                    logs = format!("{command}: exit status 1\n");
                }
                (false, RestartPolicy::Never) if !request.command.is_empty() => {
                    pod.phase = PodPhase::Succeeded;
                    logs = "ok\n".to_owned();
                }
                (false, _) => {
                    pod.phase = PodPhase::Running;
                    pod.ready = true;
                }
            }
        }

        SimPod {
            state: pod,
            owner,
            logs,
        }
    }

    fn spawn_replica(&self, state: &mut State, namespace: &str, deployment: &DeploymentRequest) {
        let mut request = PodRequest::new(
            format!("{}-{}", deployment.name, state.suffix()),
            deployment.image.clone(),
        )
        .command(deployment.command.clone());
        request.labels = deployment.labels.clone();
        request.port = deployment.port;

        let pod = self.schedule_pod(state, namespace, &request, Some(deployment.name.clone()));
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.pods.insert(request.name, pod);
        }
    }

    fn svclb_pods(&self, state: &mut State, service: &str) {
        let nodes: Vec<String> = self
            .settings
            .nodes
            .iter()
            .filter(|n| n.is_schedulable())
            .map(|n| n.name.clone())
            .collect();
        for node in nodes {
            let name = format!("svclb-{service}-{}", state.suffix());
            let ip = state.pod_ip();
            let pod = PodState {
                name: name.clone(),
                phase: PodPhase::Running,
                ready: true,
                node: Some(node),
                pod_ip: Some(ip),
                restarts: 0,
                labels: BTreeMap::from([
                    (SVCLB_SERVICE_LABEL.to_owned(), service.to_owned()),
                    ("app".to_owned(), format!("svclb-{service}")),
                ]),
            };
            state
                .namespaces
                .entry(KUBE_SYSTEM.to_owned())
                .or_default()
                .pods
                .insert(
                    name,
                    SimPod {
                        state: pod,
                        owner: None,
                        logs: String::new(),
                    },
                );
        }
    }
}

fn check_name(kind: ResourceKind, name: &str) -> Result<(), ClusterError> {
    validate_dns_label(name).map_err(|reason| ClusterError::InvalidName {
        kind,
        name: name.to_owned(),
        reason,
    })
}

fn not_found(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_owned(),
    }
}

fn already_exists(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::AlreadyExists {
        kind,
        name: name.to_owned(),
    }
}

impl ClusterClient for SimulatedCluster {
    fn endpoint(&self) -> String {
        self.settings.endpoint.clone()
    }

    async fn server_version(&self) -> Result<String, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "server_version", "")?;
        Ok(self.settings.version.clone())
    }

    async fn create_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "create_namespace", name)?;
        check_name(ResourceKind::Namespace, name)?;
        if state.namespaces.contains_key(name) {
            return Err(already_exists(ResourceKind::Namespace, name));
        }
        state.namespaces.insert(name.to_owned(), SimNamespace::default());
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_namespace", name)?;
        state.namespaces.remove(name);
        Ok(())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "namespace_exists", name)?;
        Ok(state.namespaces.contains_key(name))
    }

    async fn create_pod(&self, namespace: &str, pod: &PodRequest) -> Result<(), ClusterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.begin(state, "create_pod", &format!("{namespace}/{}", pod.name))?;
        check_name(ResourceKind::Pod, &pod.name)?;
        if self.settings.pod_security_enforced
            && pod.security.as_ref().is_some_and(SecuritySettings::is_privileged)
        {
            return Err(ClusterError::Api {
                operation: "create_pod".to_owned(),
                code: Some(403),
                message: format!(
                    "pods \"{}\" is forbidden: violates PodSecurity \"restricted:latest\": privileged",
                    pod.name
                ),
            });
        }
        if state.namespace(namespace)?.pods.contains_key(&pod.name) {
            return Err(already_exists(ResourceKind::Pod, &pod.name));
        }
        let sim = self.schedule_pod(state, namespace, pod, None);
        state.namespace_mut(namespace)?.pods.insert(pod.name.clone(), sim);
        Ok(())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_pod", &format!("{namespace}/{name}"))?;
        state
            .namespace(namespace)?
            .pods
            .get(name)
            .map(|p| p.state.clone())
            .ok_or_else(|| not_found(ResourceKind::Pod, name))
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.begin(state, "delete_pod", &format!("{namespace}/{name}"))?;
        let Some(ns) = state.namespaces.get_mut(namespace) else {
            return Ok(());
        };
        let Some(removed) = ns.pods.remove(name) else {
            return Ok(());
        };
        let owner = removed
            .owner
            .and_then(|owner| ns.deployments.get(&owner).cloned());
        if let Some(deployment) = owner {
            self.spawn_replica(state, namespace, &deployment);
        }
        Ok(())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: Option<&str>,
    ) -> Result<Vec<PodState>, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(
            &mut state,
            "list_pods",
            &format!("{namespace}?{}", selector.unwrap_or_default()),
        )?;
        let Some(ns) = state.namespaces.get(namespace) else {
            return Ok(Vec::new());
        };
        Ok(ns
            .pods
            .values()
            .filter(|p| selector.is_none_or(|s| selector_matches(s, &p.state.labels)))
            .map(|p| p.state.clone())
            .collect())
    }

    async fn pod_logs(&self, namespace: &str, name: &str) -> Result<String, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "pod_logs", &format!("{namespace}/{name}"))?;
        state
            .namespace(namespace)?
            .pods
            .get(name)
            .map(|p| p.logs.clone())
            .ok_or_else(|| not_found(ResourceKind::Pod, name))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &DeploymentRequest,
    ) -> Result<(), ClusterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.begin(state, "create_deployment", &format!("{namespace}/{}", deployment.name))?;
        check_name(ResourceKind::Deployment, &deployment.name)?;
        let ns = state.namespace_mut(namespace)?;
        if ns.deployments.contains_key(&deployment.name) {
            return Err(already_exists(ResourceKind::Deployment, &deployment.name));
        }
        ns.deployments
            .insert(deployment.name.clone(), deployment.clone());
        for _ in 0..deployment.replicas.max(0) {
            self.spawn_replica(state, namespace, deployment);
        }
        Ok(())
    }

    async fn get_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DeploymentState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_deployment", &format!("{namespace}/{name}"))?;
        let ns = state.namespace(namespace)?;
        let deployment = ns
            .deployments
            .get(name)
            .ok_or_else(|| not_found(ResourceKind::Deployment, name))?;
        let ready = ns
            .pods
            .values()
            .filter(|p| p.owner.as_deref() == Some(name) && p.state.ready)
            .count() as i32;
        Ok(DeploymentState {
            name: name.to_owned(),
            desired: deployment.replicas,
            ready,
            available: ready,
        })
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_deployment", &format!("{namespace}/{name}"))?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            if ns.deployments.remove(name).is_some() {
                ns.pods.retain(|_, p| p.owner.as_deref() != Some(name));
            }
        }
        Ok(())
    }

    async fn create_service(
        &self,
        namespace: &str,
        service: &ServiceRequest,
    ) -> Result<(), ClusterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        self.begin(state, "create_service", &format!("{namespace}/{}", service.name))?;
        check_name(ResourceKind::Service, &service.name)?;
        if state.namespace(namespace)?.services.contains_key(&service.name) {
            return Err(already_exists(ResourceKind::Service, &service.name));
        }

        let cluster_ip = state.service_ip();
        let mut load_balancer_ips = Vec::new();
        if service.kind == ServiceKind::LoadBalancer && self.settings.load_balancer {
            load_balancer_ips = self
                .settings
                .nodes
                .iter()
                .filter(|n| n.is_schedulable())
                .filter_map(|n| n.internal_ip.clone())
                .collect();
            self.svclb_pods(state, &service.name);
        }

        state.namespace_mut(namespace)?.services.insert(
            service.name.clone(),
            ServiceState {
                name: service.name.clone(),
                kind: service.kind,
                cluster_ip: Some(cluster_ip),
                load_balancer_ips,
            },
        );
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<ServiceState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_service", &format!("{namespace}/{name}"))?;
        state
            .namespace(namespace)?
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Service, name))
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_service", &format!("{namespace}/{name}"))?;
        let removed = state
            .namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.services.remove(name));
        if !removed.is_some_and(|s| s.kind == ServiceKind::LoadBalancer) {
            return Ok(());
        }
        if let Some(kube_system) = state.namespaces.get_mut(KUBE_SYSTEM) {
            kube_system.pods.retain(|_, p| {
                p.state.labels.get(SVCLB_SERVICE_LABEL).map(String::as_str) != Some(name)
            });
        }
        Ok(())
    }

    async fn create_ingress(
        &self,
        namespace: &str,
        ingress: &IngressRequest,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "create_ingress", &format!("{namespace}/{}", ingress.name))?;
        check_name(ResourceKind::Ingress, &ingress.name)?;
        let ns = state.namespace_mut(namespace)?;
        if ns.ingresses.contains_key(&ingress.name) {
            return Err(already_exists(ResourceKind::Ingress, &ingress.name));
        }
        ns.ingresses.insert(ingress.name.clone(), ingress.clone());
        Ok(())
    }

    /// The published address is the one of the `traefik` service, as with
    /// the bundled controller.
    async fn get_ingress(&self, namespace: &str, name: &str) -> Result<IngressState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_ingress", &format!("{namespace}/{name}"))?;
        let ingress = state
            .namespace(namespace)?
            .ingresses
            .get(name)
            .ok_or_else(|| not_found(ResourceKind::Ingress, name))?;
        let load_balancer_ips = state
            .namespaces
            .get(KUBE_SYSTEM)
            .and_then(|ns| ns.services.get("traefik"))
            .map(|s| s.load_balancer_ips.clone())
            .unwrap_or_default();
        Ok(IngressState {
            name: name.to_owned(),
            hosts: vec![ingress.host.clone()],
            load_balancer_ips,
        })
    }

    async fn delete_ingress(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_ingress", &format!("{namespace}/{name}"))?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.ingresses.remove(name);
        }
        Ok(())
    }

    async fn create_pvc(&self, namespace: &str, pvc: &PvcRequest) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "create_pvc", &format!("{namespace}/{}", pvc.name))?;
        check_name(ResourceKind::PersistentVolumeClaim, &pvc.name)?;

        let class = self.storage_class_for(pvc);
        let binds_now = self.can_bind(pvc) && class.is_some_and(|c| !c.waits_for_consumer());
        let class_name = pvc
            .storage_class
            .clone()
            .or_else(|| class.map(|c| c.name.clone()));

        let ns = state.namespace_mut(namespace)?;
        if ns.pvcs.contains_key(&pvc.name) {
            return Err(already_exists(ResourceKind::PersistentVolumeClaim, &pvc.name));
        }
        let mut sim = SimPvc {
            request: pvc.clone(),
            state: PvcState {
                name: pvc.name.clone(),
                phase: PvcPhase::Pending,
                storage_class: class_name,
                capacity: None,
            },
        };
        if binds_now {
            Self::bind(&mut sim);
        }
        ns.pvcs.insert(pvc.name.clone(), sim);
        Ok(())
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<PvcState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_pvc", &format!("{namespace}/{name}"))?;
        state
            .namespace(namespace)?
            .pvcs
            .get(name)
            .map(|p| p.state.clone())
            .ok_or_else(|| not_found(ResourceKind::PersistentVolumeClaim, name))
    }

    async fn delete_pvc(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_pvc", &format!("{namespace}/{name}"))?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.pvcs.remove(name);
        }
        Ok(())
    }

    async fn expand_pvc(&self, namespace: &str, name: &str, size: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "expand_pvc", &format!("{namespace}/{name}"))?;
        let expandable = {
            let pvc = state
                .namespace(namespace)?
                .pvcs
                .get(name)
                .ok_or_else(|| not_found(ResourceKind::PersistentVolumeClaim, name))?;
            self.storage_class_for(&pvc.request)
                .is_some_and(|c| c.allow_expansion)
        };
        let pvc = state
            .namespace_mut(namespace)?
            .pvcs
            .get_mut(name)
            .ok_or_else(|| not_found(ResourceKind::PersistentVolumeClaim, name))?;
        if !expandable {
            return Err(ClusterError::Api {
                operation: "expand_pvc".to_owned(),
                code: Some(403),
                message: "only dynamically provisioned pvc can be resized and the storageclass \
                          that provisions the pvc must support resize"
                    .to_owned(),
            });
        }
        if pvc.state.phase != PvcPhase::Bound {
            return Err(ClusterError::Api {
                operation: "expand_pvc".to_owned(),
                code: Some(422),
                message: format!("persistentvolumeclaim \"{name}\" is not bound"),
            });
        }
        pvc.request.size = size.to_owned();
        pvc.state.capacity = Some(size.to_owned());
        Ok(())
    }

    async fn create_daemonset(
        &self,
        namespace: &str,
        daemonset: &DaemonSetRequest,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "create_daemonset", &format!("{namespace}/{}", daemonset.name))?;
        check_name(ResourceKind::DaemonSet, &daemonset.name)?;
        let ns = state.namespace_mut(namespace)?;
        if ns.daemonsets.contains_key(&daemonset.name) {
            return Err(already_exists(ResourceKind::DaemonSet, &daemonset.name));
        }
        ns.daemonsets
            .insert(daemonset.name.clone(), daemonset.clone());
        Ok(())
    }

    async fn get_daemonset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<DaemonSetState, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_daemonset", &format!("{namespace}/{name}"))?;
        let daemonset = state
            .namespace(namespace)?
            .daemonsets
            .get(name)
            .ok_or_else(|| not_found(ResourceKind::DaemonSet, name))?;
        let desired = self
            .settings
            .nodes
            .iter()
            .filter(|n| n.is_schedulable())
            .count() as i32;
        let command = daemonset.command.join(" ");
        let failing = self
            .settings
            .failing_commands
            .iter()
            .any(|fragment| command.contains(fragment.as_str()));
        Ok(DaemonSetState {
            name: name.to_owned(),
            desired,
            ready: if failing { 0 } else { desired },
        })
    }

    async fn delete_daemonset(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_daemonset", &format!("{namespace}/{name}"))?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.daemonsets.remove(name);
        }
        Ok(())
    }

    async fn create_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMapRequest,
    ) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "create_config_map", &format!("{namespace}/{}", config_map.name))?;
        check_name(ResourceKind::ConfigMap, &config_map.name)?;
        let ns = state.namespace_mut(namespace)?;
        if ns.config_maps.contains_key(&config_map.name) {
            return Err(already_exists(ResourceKind::ConfigMap, &config_map.name));
        }
        ns.config_maps
            .insert(config_map.name.clone(), config_map.data.clone());
        Ok(())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "get_config_map", &format!("{namespace}/{name}"))?;
        state
            .namespace(namespace)?
            .config_maps
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::ConfigMap, name))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "delete_config_map", &format!("{namespace}/{name}"))?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.config_maps.remove(name);
        }
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "list_nodes", "")?;
        Ok(self.settings.nodes.clone())
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClassInfo>, ClusterError> {
        let mut state = self.state.lock().await;
        self.begin(&mut state, "list_storage_classes", "")?;
        Ok(self.settings.storage_classes.clone())
    }
}
