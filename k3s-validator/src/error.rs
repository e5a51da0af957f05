//! Error returned by a test module's entry point.
//!
//! A module that returns `Err` gets one `fail` result recorded for it and its
//! category moves on to the next module. Only [`ModuleError::is_fatal`]
//! errors abort the whole run.

use k3s_validator_cluster::ClusterError;

#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    /// A cluster call failed and the module could not continue.
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// An external module could not be started or read.
    #[error("external module {path}: {reason}")]
    External { path: String, reason: String },

    /// A precondition the module needs to keep going did not hold.
    #[error("{0}")]
    Aborted(String),
}

impl ModuleError {
    /// Whether the run must stop (the cluster API became unreachable).
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Cluster(e) => e.is_fatal(),
            _ => false,
        }
    }

    pub fn as_cluster_error(&self) -> Option<&ClusterError> {
        match self {
            Self::Cluster(e) => Some(e),
            _ => None,
        }
    }
}
