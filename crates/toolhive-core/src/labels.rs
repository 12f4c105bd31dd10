//! Label conventions for engine objects owned by ToolHive
//!
//! Every container and network ToolHive creates carries these labels so the
//! process can find its own objects again after a restart.

use std::collections::BTreeMap;

use crate::transport::TransportType;

/// Marker label present on every ToolHive-owned object
pub const LABEL_TOOLHIVE: &str = "toolhive";
/// Workload name an object belongs to
pub const LABEL_NAME: &str = "toolhive-name";
/// Transport type of the workload
pub const LABEL_TRANSPORT: &str = "toolhive-transport";
/// Host port the workload is reachable on
pub const LABEL_PORT: &str = "toolhive-port";
/// Present only on the main MCP container of a workload
pub const LABEL_MAIN_WORKLOAD: &str = "toolhive-main-workload";
/// Name of a ToolHive-owned network
pub const LABEL_NETWORK_NAME: &str = "toolhive-network-name";

/// Add the standard labels carried by every workload-owned container.
pub fn add_standard_labels(
    labels: &mut BTreeMap<String, String>,
    workload_name: &str,
    transport: TransportType,
    port: u16,
) {
    labels.insert(LABEL_TOOLHIVE.to_string(), "true".to_string());
    labels.insert(LABEL_NAME.to_string(), workload_name.to_string());
    labels.insert(LABEL_TRANSPORT.to_string(), transport.to_string());
    labels.insert(LABEL_PORT.to_string(), port.to_string());
}

/// Mark a container as the main MCP container of its workload.
pub fn add_main_workload_label(labels: &mut BTreeMap<String, String>) {
    labels.insert(LABEL_MAIN_WORKLOAD.to_string(), "true".to_string());
}

/// Add the labels carried by every workload-owned network.
pub fn add_network_labels(labels: &mut BTreeMap<String, String>, network_name: &str) {
    labels.insert(LABEL_TOOLHIVE.to_string(), "true".to_string());
    labels.insert(LABEL_NETWORK_NAME.to_string(), network_name.to_string());
}

/// Whether a label set belongs to a ToolHive-owned object.
pub fn is_toolhive_owned<S: std::hash::BuildHasher>(
    labels: &std::collections::HashMap<String, String, S>,
) -> bool {
    labels.get(LABEL_TOOLHIVE).map(String::as_str) == Some("true")
}

/// Workload name recorded in a label set, if any.
pub fn workload_name<S: std::hash::BuildHasher>(
    labels: &std::collections::HashMap<String, String, S>,
) -> Option<&str> {
    labels.get(LABEL_NAME).map(String::as_str)
}
