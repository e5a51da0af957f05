//! Per-run test namespace and the resources created inside it.
//!
//! A [`Fixture`] is acquired once at run start and released on every exit
//! path: normal completion, a failed run, a fatal cluster error and an
//! interrupt. [`Fixture::release`] is idempotent; the namespace delete is
//! issued exactly once no matter how often it is called.
//!
//! Release deletes the tracked resources newest first, then the namespace.
//! Every step is attempted even when an earlier one fails; failures are
//! logged at ERROR and never returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use k3s_validator_core::config::FixtureConfig;
use k3s_validator_core::naming::validate_dns_label;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::client::{ClusterClient, delete_resource};
use crate::error::ClusterError;
use crate::resources::{ResourceKind, ResourceRef};

/// Timestamp suffix appended to the namespace prefix.
const NAMESPACE_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Build `<prefix>-YYYYMMDD-HHMMSS` and check it is a DNS label.
pub fn namespace_name(prefix: &str, at: DateTime<Utc>) -> Result<String, ClusterError> {
    let name = format!("{prefix}-{}", at.format(NAMESPACE_TIME_FORMAT));
    validate_dns_label(&name).map_err(|reason| ClusterError::InvalidName {
        kind: ResourceKind::Namespace,
        name: name.clone(),
        reason,
    })?;
    Ok(name)
}

/// `<prefix>-<8 hex chars>` from a random UUID.
pub fn unique_name(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &id[..8])
}

/// Outcome of a release call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    /// `false` when an earlier call already released the fixture.
    pub performed: bool,
    pub resources_deleted: usize,
    pub failures: usize,
}

/// The run's namespace, owned exclusively by the orchestrator.
pub struct Fixture<C: ClusterClient> {
    client: Arc<C>,
    namespace: String,
    run_id: Uuid,
    created_at: DateTime<Utc>,
    tracked: Mutex<Vec<ResourceRef>>,
    released: AtomicBool,
}

impl<C: ClusterClient> Fixture<C> {
    /// Create the run namespace.
    pub async fn acquire(client: Arc<C>, config: &FixtureConfig) -> Result<Arc<Self>, ClusterError> {
        let created_at = Utc::now();
        let namespace = namespace_name(&config.namespace_prefix, created_at)?;
        client.create_namespace(&namespace).await?;

        let run_id = Uuid::new_v4();
        info!(namespace = %namespace, run_id = %run_id, "fixture namespace created");

        Ok(Arc::new(Self {
            client,
            namespace,
            run_id,
            created_at,
            tracked: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Register a resource created inside the fixture for deletion at release.
    pub fn track(&self, resource: ResourceRef) {
        debug!(namespace = %self.namespace, resource = %resource, "tracking resource");
        let mut tracked = self.lock_tracked();
        if !tracked.contains(&resource) {
            tracked.push(resource);
        }
    }

    /// Resources currently tracked, oldest first.
    pub fn tracked(&self) -> Vec<ResourceRef> {
        self.lock_tracked().clone()
    }

    /// Delete every tracked resource, then the namespace. Runs at most once.
    pub async fn release(&self) -> ReleaseSummary {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(namespace = %self.namespace, "fixture already released");
            return ReleaseSummary::default();
        }

        let resources: Vec<ResourceRef> = {
            let mut tracked = self.lock_tracked();
            tracked.drain(..).rev().collect()
        };

        let mut summary = ReleaseSummary {
            performed: true,
            ..ReleaseSummary::default()
        };

        for resource in &resources {
            match delete_resource(self.client.as_ref(), resource).await {
                Ok(()) => summary.resources_deleted += 1,
                Err(e) => {
                    summary.failures += 1;
                    error!(
                        namespace = %self.namespace,
                        resource = %resource,
                        error = %e,
                        "cleanup: failed to delete resource"
                    );
                }
            }
        }

        match self.client.delete_namespace(&self.namespace).await {
            Ok(()) => info!(
                namespace = %self.namespace,
                resources = summary.resources_deleted,
                "fixture namespace deleted"
            ),
            Err(e) => {
                summary.failures += 1;
                error!(namespace = %self.namespace, error = %e, "cleanup: failed to delete namespace");
            }
        }

        summary
    }

    fn lock_tracked(&self) -> MutexGuard<'_, Vec<ResourceRef>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: ClusterClient> Drop for Fixture<C> {
    fn drop(&mut self) {
        if !self.released.load(Ordering::SeqCst) {
            error!(namespace = %self.namespace, "fixture dropped without release, namespace leaked");
        }
    }
}

impl<C: ClusterClient> std::fmt::Debug for Fixture<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("namespace", &self.namespace)
            .field("run_id", &self.run_id)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}
