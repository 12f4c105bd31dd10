//! ToolHive Core - Shared Domain Types
//!
//! Workload specifications, permission profiles, transport types, and the
//! label conventions applied to every engine object ToolHive owns.

pub mod error;
pub mod labels;
pub mod permissions;
pub mod transport;
pub mod workload;

pub use error::SpecError;
pub use permissions::{
    MountDeclaration, NetworkPermissions, OutboundNetworkPermissions, Profile,
};
pub use transport::TransportType;
pub use workload::WorkloadSpec;
