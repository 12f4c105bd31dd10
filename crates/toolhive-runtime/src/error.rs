//! Runtime adapter errors

use std::time::Duration;

use thiserror::Error;
use toolhive_core::SpecError;

/// Errors from the container engine adapter and sandbox builder
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No container engine reachable on any known socket
    #[error("container engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// Failed to pull an image
    #[error("failed to pull image '{image}': {reason}")]
    PullFailed { image: String, reason: String },

    /// Failed to create a container
    #[error("failed to create container '{id}': {reason}")]
    CreateFailed { id: String, reason: String },

    /// Failed to start a container
    #[error("failed to start container '{id}': {reason}")]
    StartFailed { id: String, reason: String },

    /// Container not found
    #[error("container '{container}' not found: {reason}")]
    NotFound { container: String, reason: String },

    /// Container exists but is not running
    #[error("container '{container}' is not running")]
    NotRunning { container: String },

    /// Failed to attach to a container's stdio
    #[error("failed to attach to container '{container}': {reason}")]
    AttachFailed { container: String, reason: String },

    /// Container exited or disappeared while being monitored
    #[error("container '{container}' exited unexpectedly: {reason}")]
    Exited { container: String, reason: String },

    /// Workload specification rejected before reaching the engine
    #[error("invalid spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// Network setup or teardown failed
    #[error("network error: {0}")]
    Network(String),

    /// Operation exceeded its deadline
    #[error("timeout after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Internal adapter error
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether the error means the referenced container does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::NotFound { .. })
    }
}

pub type Result<T, E = RuntimeError> = std::result::Result<T, E>;
