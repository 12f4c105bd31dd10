//! Workload specification
//!
//! A workload is one logical MCP server instance: an image plus the
//! transport, environment, ports, and permission profile it runs with.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::SpecError;
use crate::permissions::Profile;
use crate::transport::TransportType;

/// Shared external network every egress/DNS container joins
pub const EXTERNAL_NETWORK: &str = "toolhive-external";

/// Specification of a single workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Unique name, also the main container's name
    pub name: String,
    /// MCP server image reference
    pub image: String,
    /// Command arguments passed to the container
    #[serde(default)]
    pub command: Vec<String>,
    /// How the server speaks MCP
    pub transport: TransportType,
    /// Environment variables for the server
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Host port the HTTP proxy listens on. Zero picks an ephemeral port.
    #[serde(default)]
    pub proxy_port: u16,
    /// Container port an SSE server exposes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<u16>,
    /// Filesystem and network access granted to the server
    #[serde(default)]
    pub permission_profile: Profile,
}

impl WorkloadSpec {
    /// Validate the spec before any engine object is created.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.name.is_empty() || !valid_name(&self.name) {
            return Err(SpecError::InvalidName(self.name.clone()));
        }
        if self.image.is_empty() {
            return Err(SpecError::InvalidImage(self.image.clone()));
        }
        Ok(())
    }

    /// Name of the egress proxy container.
    pub fn egress_container_name(&self) -> String {
        format!("{}-egress", self.name)
    }

    /// Name of the DNS resolver container.
    pub fn dns_container_name(&self) -> String {
        format!("{}-dns", self.name)
    }

    /// Name of the per-workload internal network.
    pub fn internal_network_name(&self) -> String {
        format!("toolhive-{}-internal", self.name)
    }

    /// Container ports the workload exposes to clients. Only SSE servers
    /// expose ingress ports; stdio servers are reached via the bridge.
    pub fn ingress_ports(&self) -> std::collections::BTreeSet<u16> {
        match self.transport {
            TransportType::Sse => {
                let port = self.target_port.unwrap_or(self.proxy_port);
                if port == 0 {
                    Default::default()
                } else {
                    std::iter::once(port).collect()
                }
            }
            TransportType::Stdio => Default::default(),
        }
    }
}

// Engine object names: leading alphanumeric, then alphanumerics plus `_.-`.
fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
