//! Validation errors for workload specifications

use thiserror::Error;

/// Errors raised while validating a workload specification or permission
/// profile before it reaches the container engine.
#[derive(Debug, Error)]
pub enum SpecError {
    /// Workload name is empty or contains characters the engine rejects
    #[error("invalid workload name '{0}'")]
    InvalidName(String),

    /// Image reference is empty
    #[error("invalid image reference '{0}'")]
    InvalidImage(String),

    /// Unsupported transport type
    #[error("unsupported transport type: {0}")]
    UnsupportedTransport(String),

    /// Mount declaration could not be parsed
    #[error("invalid mount declaration '{decl}': {reason}")]
    InvalidMount { decl: String, reason: String },
}

pub type Result<T, E = SpecError> = std::result::Result<T, E>;
