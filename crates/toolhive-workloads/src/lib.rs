//! ToolHive Workloads - Lifecycle Supervision
//!
//! The supervisor that owns one workload's sandbox, bridge, and monitor;
//! the process-wide registry of active workloads; and the manager that
//! external commands go through.

pub mod error;
pub mod manager;
pub mod registry;
pub mod supervisor;

pub use error::{Result, WorkloadError};
pub use manager::WorkloadManager;
pub use registry::WorkloadRegistry;
pub use supervisor::{SupervisorConfig, WorkloadState, WorkloadSupervisor, DEFAULT_STOP_GRACE};
