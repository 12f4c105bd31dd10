//! ToolHive Runtime - Container Engine Adapter
//!
//! A thin capability surface over a Docker-API-compatible engine plus the
//! pieces that turn a workload spec into a running sandbox: the permission
//! compiler, the egress ACL writer, the three-container sandbox builder,
//! and the container liveness monitor.

pub mod docker;
pub mod egress;
pub mod error;
pub mod monitor;
pub mod permissions;
pub mod runtime;
pub mod sandbox;

pub use docker::{is_engine_available, socket_candidates, DockerRuntime, EngineKind};
pub use egress::{render_squid_conf, DNS_IMAGE, EGRESS_IMAGE, EGRESS_PROXY_PORT};
pub use error::{Result, RuntimeError};
pub use monitor::ContainerMonitor;
pub use permissions::{compile_profile, PermissionConfig};
pub use runtime::{
    ContainerInfo, ContainerSpec, ContainerStdin, ContainerStdout, MockRuntime, Mount,
    PortBinding, PortMapping, Runtime,
};
pub use sandbox::{Sandbox, SandboxBuilder};
