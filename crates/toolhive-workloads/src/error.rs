//! Workload lifecycle errors

use thiserror::Error;
use toolhive_core::SpecError;
use toolhive_runtime::RuntimeError;
use toolhive_transport::TransportError;

/// Errors from workload supervision and registry operations
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// A workload with this name is already registered
    #[error("workload '{0}' already exists")]
    AlreadyExists(String),

    /// No workload matched the name or id prefix
    #[error("workload '{0}' not found")]
    NotFound(String),

    /// An id prefix matched more than one workload
    #[error("'{query}' is ambiguous, matches: {matches:?}")]
    Ambiguous { query: String, matches: Vec<String> },

    /// Spec validation failure
    #[error(transparent)]
    Spec(#[from] SpecError),

    /// Container engine failure
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Bridge failure
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T, E = WorkloadError> = std::result::Result<T, E>;
