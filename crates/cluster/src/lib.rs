#![doc = include_str!("../README.md")]
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`ClusterError`, `TimeoutError`)
//! - [`resources`]: Requests and observed state (`PodRequest`, `PodState`, ...)
//! - [`client`]: Cluster API abstraction (`ClusterClient` trait)
//! - [`kube_client`]: Production implementation (`KubeClusterClient`)
//! - `simulated`: In-memory implementation (`SimulatedCluster`), behind the
//!   `simulated` feature
//! - [`traced`]: Command echo wrapper (`TracedClient`)
//! - [`wait`]: Polling with timeouts (`wait_for`, `wait_for_condition`)
//! - [`fixture`]: Per-run namespace lifecycle (`Fixture`)

pub mod client;
pub mod error;
pub mod fixture;
pub mod kube_client;
pub mod resources;
#[cfg(any(test, feature = "simulated"))]
pub mod simulated;
pub mod traced;
pub mod wait;

// --- Public API Re-exports ---

// Client
pub use client::{ClusterClient, delete_resource};
pub use kube_client::KubeClusterClient;
#[cfg(any(test, feature = "simulated"))]
pub use simulated::{PvcBinding, SimulatedCluster};
pub use traced::TracedClient;

// Error
pub use error::{ClusterError, TimeoutError};

// Fixture
pub use fixture::{Fixture, ReleaseSummary, namespace_name, unique_name};

// Polling
pub use wait::{Condition, Probe, wait_for, wait_for_condition};

// Resources
pub use resources::{
    AccessMode, ConfigMapRequest, DaemonSetRequest, DaemonSetState, DeploymentRequest,
    DeploymentState, IngressRequest, IngressState, NodeInfo, PodPhase, PodRequest, PodState,
    PvcPhase, PvcRequest, PvcState, ResourceKind, ResourceRef, RestartPolicy, SecuritySettings,
    ServiceKind, ServiceRequest, ServiceState, StorageClassInfo,
};
pub use resources::{
    DEFAULT_CLASS_ANNOTATION, KUBE_SYSTEM, LOCAL_PATH_PROVISIONER, SVCLB_SERVICE_LABEL,
    format_selector,
};
