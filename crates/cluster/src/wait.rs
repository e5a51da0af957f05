//! Fixed-interval polling with an explicit timeout.
//!
//! Every wait in the validator goes through [`wait_for`]. A probe reports
//! whether the condition holds, is still pending (with the observed state),
//! or can never hold. Not-found while polling counts as "not yet registered".

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::client::ClusterClient;
use crate::error::{ClusterError, TimeoutError};
use crate::resources::{PodPhase, PvcPhase, ResourceKind, ResourceRef};

/// One observation of a polled condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The condition holds.
    Ready(T),
    /// Not yet; the string describes what was observed.
    Pending(String),
    /// The condition can no longer be reached.
    Failed(String),
}

/// Poll `probe` every `interval` until it is ready or `timeout` elapses.
pub async fn wait_for<T, F, Fut>(
    resource: &str,
    condition: &str,
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<T, ClusterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Probe<T>, ClusterError>>,
{
    let started = Instant::now();
    let mut last_observed: String;

    loop {
        match probe().await {
            Ok(Probe::Ready(value)) => {
                debug!(
                    resource,
                    condition,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "condition satisfied"
                );
                return Ok(value);
            }
            Ok(Probe::Pending(observed)) => last_observed = observed,
            Ok(Probe::Failed(observed)) => {
                return Err(ClusterError::Unsatisfiable {
                    resource: resource.to_owned(),
                    condition: condition.to_owned(),
                    observed,
                });
            }
            Err(ClusterError::NotFound { .. }) => last_observed = "not registered".to_owned(),
            Err(e) => return Err(e),
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            return Err(TimeoutError {
                resource: resource.to_owned(),
                condition: condition.to_owned(),
                elapsed,
                last_observed,
            }
            .into());
        }
        tokio::time::sleep(interval.min(timeout - elapsed)).await;
    }
}

/// Conditions the validator waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Pod is `Running` and all containers are ready.
    PodReady,
    /// Pod reached `Succeeded` or `Failed`.
    PodCompleted,
    /// PVC is `Bound`.
    PvcBound,
    /// Every desired deployment replica is available.
    DeploymentAvailable,
    /// Every desired daemonset pod is ready.
    DaemonSetReady,
    /// Service has at least one load-balancer ingress IP.
    LoadBalancerAssigned,
    /// Object no longer exists.
    Gone,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PodReady => "Ready",
            Self::PodCompleted => "Completed",
            Self::PvcBound => "Bound",
            Self::DeploymentAvailable => "Available",
            Self::DaemonSetReady => "Ready",
            Self::LoadBalancerAssigned => "LoadBalancerAssigned",
            Self::Gone => "Deleted",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wait until `resource` satisfies `condition`.
pub async fn wait_for_condition<C: ClusterClient>(
    client: &C,
    resource: &ResourceRef,
    condition: Condition,
    timeout: Duration,
    interval: Duration,
) -> Result<(), ClusterError> {
    let label = resource.to_string();
    wait_for(&label, condition.as_str(), timeout, interval, || {
        observe(client, resource, condition)
    })
    .await
}

async fn observe<C: ClusterClient>(
    client: &C,
    resource: &ResourceRef,
    condition: Condition,
) -> Result<Probe<()>, ClusterError> {
    let ns = resource.namespace.as_str();
    let name = resource.name.as_str();

    if condition == Condition::Gone {
        let lookup = match resource.kind {
            ResourceKind::Pod => client.get_pod(ns, name).await.map(|p| p.summary()),
            ResourceKind::PersistentVolumeClaim => {
                client.get_pvc(ns, name).await.map(|p| p.phase.to_string())
            }
            ResourceKind::Deployment => client.get_deployment(ns, name).await.map(|_| "present".to_owned()),
            ResourceKind::Service => client.get_service(ns, name).await.map(|_| "present".to_owned()),
            ResourceKind::DaemonSet => client.get_daemonset(ns, name).await.map(|_| "present".to_owned()),
            ResourceKind::ConfigMap => client.get_config_map(ns, name).await.map(|_| "present".to_owned()),
            ResourceKind::Ingress => client.get_ingress(ns, name).await.map(|_| "present".to_owned()),
            ResourceKind::Namespace => {
                return Ok(if client.namespace_exists(name).await? {
                    Probe::Pending("Terminating".to_owned())
                } else {
                    Probe::Ready(())
                });
            }
            ResourceKind::Node | ResourceKind::StorageClass => {
                return Ok(Probe::Failed(format!("{} objects are not polled", resource.kind)));
            }
        };
        return match lookup {
            Ok(state) => Ok(Probe::Pending(state)),
            Err(ClusterError::NotFound { .. }) => Ok(Probe::Ready(())),
            Err(e) => Err(e),
        };
    }

    let probe = match condition {
        Condition::PodReady => {
            let pod = client.get_pod(ns, name).await?;
            match pod.phase {
                PodPhase::Running if pod.ready => Probe::Ready(()),
                PodPhase::Succeeded | PodPhase::Failed => Probe::Failed(pod.summary()),
                _ => Probe::Pending(pod.summary()),
            }
        }
        Condition::PodCompleted => {
            let pod = client.get_pod(ns, name).await?;
            if pod.phase.is_terminal() {
                Probe::Ready(())
            } else {
                Probe::Pending(pod.summary())
            }
        }
        Condition::PvcBound => {
            let pvc = client.get_pvc(ns, name).await?;
            match pvc.phase {
                PvcPhase::Bound => Probe::Ready(()),
                PvcPhase::Lost => Probe::Failed(pvc.phase.to_string()),
                PvcPhase::Pending => Probe::Pending(pvc.phase.to_string()),
            }
        }
        Condition::DeploymentAvailable => {
            let deployment = client.get_deployment(ns, name).await?;
            if deployment.is_available() {
                Probe::Ready(())
            } else {
                Probe::Pending(format!(
                    "{}/{} available",
                    deployment.available, deployment.desired
                ))
            }
        }
        Condition::DaemonSetReady => {
            let daemonset = client.get_daemonset(ns, name).await?;
            if daemonset.is_ready() {
                Probe::Ready(())
            } else {
                Probe::Pending(format!("{}/{} ready", daemonset.ready, daemonset.desired))
            }
        }
        Condition::LoadBalancerAssigned => {
            let service = client.get_service(ns, name).await?;
            if service.load_balancer_ips.is_empty() {
                Probe::Pending("no ingress IP".to_owned())
            } else {
                Probe::Ready(())
            }
        }
        Condition::Gone => Probe::Ready(()),
    };
    Ok(probe)
}
