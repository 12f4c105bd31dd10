//! Egress proxy ACL generation
//!
//! The outbound side of a workload's network permissions is enforced by a
//! Squid forward proxy running in the `<workload>-egress` container. This
//! module renders the profile into a Squid configuration document and
//! materializes it as a host-side file that is bind-mounted read-only into
//! the egress container.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use toolhive_core::permissions::{NetworkPermissions, OutboundNetworkPermissions};

use crate::error::{Result, RuntimeError};

/// Image run in the egress proxy container
pub const EGRESS_IMAGE: &str = "ubuntu/squid:latest";
/// Image run in the DNS resolver container
pub const DNS_IMAGE: &str = "dockurr/dnsmasq:latest";
/// Port the forward proxy listens on
pub const EGRESS_PROXY_PORT: u16 = 3128;
/// Where the generated configuration is mounted inside the egress container
pub const EGRESS_CONF_MOUNT_PATH: &str = "/etc/squid/squid.conf";

/// Render the Squid configuration for a workload.
///
/// `server_hostname` is the main container's name, reachable over the
/// internal network. `ingress_ports` are container ports the workload
/// exposes to clients; each one gets a reverse-proxy accelerator block.
pub fn render_squid_conf(
    network: Option<&NetworkPermissions>,
    server_hostname: &str,
    ingress_ports: &BTreeSet<u16>,
) -> String {
    let mut conf = String::new();

    conf.push_str(&format!(
        "http_port {EGRESS_PROXY_PORT}\n\
         visible_hostname {server_hostname}-egress\n\
         access_log stdio:/var/log/squid/access.log squid\n\
         pid_filename /var/run/squid/squid.pid\n\
         # Disable memory and disk caching\n\
         cache deny all\n\
         cache_mem 0 MB\n\
         maximum_object_size 0 KB\n\
         maximum_object_size_in_memory 0 KB\n\
         # Don't use cache directories\n\
         cache_dir null /tmp\n\
         cache_store_log none\n\n"
    ));

    match network.and_then(|n| n.outbound.as_ref()) {
        Some(outbound) if !outbound.insecure_allow_all => {
            write_outbound_acls(&mut conf, outbound);
            write_http_access_rules(&mut conf, outbound);
        }
        // No outbound permissions spelled out, or explicitly allow-all
        _ => conf.push_str("# Allow all traffic\nhttp_access allow all\n"),
    }

    write_ingress_proxy_config(&mut conf, server_hostname, ingress_ports);

    conf.push_str("http_access deny all\n");
    conf
}

fn write_outbound_acls(conf: &mut String, outbound: &OutboundNetworkPermissions) {
    if !outbound.allow_port.is_empty() {
        conf.push_str("# Define allowed ports\nacl allowed_ports port");
        for port in &outbound.allow_port {
            conf.push_str(&format!(" {port}"));
        }
        conf.push('\n');
    }

    if !outbound.allow_host.is_empty() {
        conf.push_str("# Define allowed destinations\nacl allowed_dsts dstdomain");
        for host in &outbound.allow_host {
            conf.push_str(&format!(" {host}"));
        }
        conf.push('\n');
    }

    if !outbound.allow_transport.is_empty() {
        conf.push_str("# Define allowed methods\nacl allowed_methods method");
        for method in &outbound.allow_transport {
            let method = method.to_uppercase();
            // Bare TCP expands to the methods a TCP client actually issues
            if method == "TCP" {
                conf.push_str(" CONNECT GET POST HEAD");
            }
            conf.push_str(&format!(" {method}"));
        }
        conf.push('\n');
    }
}

fn write_http_access_rules(conf: &mut String, outbound: &OutboundNetworkPermissions) {
    let mut conditions = Vec::new();
    if !outbound.allow_port.is_empty() {
        conditions.push("allowed_ports");
    }
    if !outbound.allow_host.is_empty() {
        conditions.push("allowed_dsts");
    }
    if !outbound.allow_transport.is_empty() {
        conditions.push("allowed_methods");
    }
    if !conditions.is_empty() {
        conf.push_str("\n# Define http_access rules\n");
        conf.push_str(&format!("http_access allow {}\n", conditions.join(" ")));
    }
}

fn write_ingress_proxy_config(
    conf: &mut String,
    server_hostname: &str,
    ingress_ports: &BTreeSet<u16>,
) {
    for port in ingress_ports {
        conf.push_str(&format!(
            "\n# Reverse proxy setup for port {port}\n\
             http_port {port} accel defaultsite={server_hostname}\n\
             cache_peer {server_hostname} parent {port} 0 no-query originserver name=origin_{port}\n\
             acl site_{port} dstdomain {server_hostname} 127.0.0.1\n\
             http_access allow site_{port}\n"
        ));
    }
}

/// Write the rendered configuration to a stable host-side path and return
/// it. The path is a pure function of the workload name so redeploying an
/// unchanged workload leaves the egress container's mount spec identical;
/// the write goes through a temp file and an atomic rename.
pub fn materialize_squid_conf(
    network: Option<&NetworkPermissions>,
    server_hostname: &str,
    ingress_ports: &BTreeSet<u16>,
) -> Result<PathBuf> {
    let conf = render_squid_conf(network, server_hostname, ingress_ports);
    let path = std::env::temp_dir().join(format!("toolhive-{server_hostname}-squid.conf"));

    let mut file = tempfile::NamedTempFile::new()
        .map_err(|e| RuntimeError::Internal(format!("failed to create squid.conf: {e}")))?;
    file.write_all(conf.as_bytes())
        .map_err(|e| RuntimeError::Internal(format!("failed to write squid.conf: {e}")))?;
    file.persist(&path)
        .map_err(|e| RuntimeError::Internal(format!("failed to persist squid.conf: {e}")))?;

    tracing::debug!(path = %path.display(), "materialized egress proxy configuration");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(network: OutboundNetworkPermissions) -> Option<NetworkPermissions> {
        Some(NetworkPermissions {
            outbound: Some(network),
        })
    }

    #[test]
    fn test_allow_all_when_no_network_permissions() {
        let conf = render_squid_conf(None, "fetch", &BTreeSet::new());
        assert!(conf.contains("http_access allow all"));
        assert!(conf.trim_end().ends_with("http_access deny all"));
    }

    #[test]
    fn test_allow_all_when_insecure_allow_all() {
        let network = outbound(OutboundNetworkPermissions {
            insecure_allow_all: true,
            allow_host: vec!["ignored.example.com".to_string()],
            ..Default::default()
        });
        let conf = render_squid_conf(network.as_ref(), "fetch", &BTreeSet::new());
        assert!(conf.contains("http_access allow all"));
        assert!(!conf.contains("ignored.example.com"));
    }

    #[test]
    fn test_host_and_port_allow_lists() {
        let network = outbound(OutboundNetworkPermissions {
            allow_host: vec!["api.example.com".to_string()],
            allow_port: vec![443],
            ..Default::default()
        });
        let conf = render_squid_conf(network.as_ref(), "fetch", &BTreeSet::new());

        assert!(conf.contains("acl allowed_ports port 443"));
        assert!(conf.contains("acl allowed_dsts dstdomain api.example.com"));
        assert!(conf.contains("http_access allow allowed_ports allowed_dsts"));
        assert!(conf.trim_end().ends_with("http_access deny all"));
        assert!(!conf.contains("http_access allow all\n"));
    }

    #[test]
    fn test_single_host_acl_appears_exactly_once() {
        let network = outbound(OutboundNetworkPermissions {
            allow_host: vec!["api.example.com".to_string()],
            ..Default::default()
        });
        let conf = render_squid_conf(network.as_ref(), "fetch", &BTreeSet::new());
        assert_eq!(
            conf.matches("acl allowed_dsts dstdomain api.example.com")
                .count(),
            1
        );
    }

    #[test]
    fn test_tcp_transport_expansion() {
        let network = outbound(OutboundNetworkPermissions {
            allow_transport: vec!["tcp".to_string()],
            ..Default::default()
        });
        let conf = render_squid_conf(network.as_ref(), "fetch", &BTreeSet::new());
        assert!(conf.contains("acl allowed_methods method CONNECT GET POST HEAD TCP"));
        assert!(conf.contains("http_access allow allowed_methods"));
    }

    #[test]
    fn test_ingress_accelerator_block() {
        let ports: BTreeSet<u16> = [9090].into_iter().collect();
        let conf = render_squid_conf(None, "fetch", &ports);

        assert!(conf.contains("http_port 9090 accel defaultsite=fetch"));
        assert!(conf
            .contains("cache_peer fetch parent 9090 0 no-query originserver name=origin_9090"));
        assert!(conf.contains("acl site_9090 dstdomain fetch 127.0.0.1"));
        assert!(conf.contains("http_access allow site_9090"));
    }

    #[test]
    fn test_header_disables_caching() {
        let conf = render_squid_conf(None, "fetch", &BTreeSet::new());
        assert!(conf.starts_with("http_port 3128\nvisible_hostname fetch-egress\n"));
        assert!(conf.contains("cache deny all"));
        assert!(conf.contains("cache_dir null /tmp"));
    }

    #[test]
    fn test_materialize_writes_to_stable_path() {
        let first = materialize_squid_conf(None, "materialize-test", &BTreeSet::new()).unwrap();
        let contents = std::fs::read_to_string(&first).unwrap();
        assert!(contents.contains("http_port 3128"));

        // Rewriting yields the same path, so an unchanged workload keeps an
        // unchanged egress mount spec
        let second = materialize_squid_conf(None, "materialize-test", &BTreeSet::new()).unwrap();
        assert_eq!(first, second);
        std::fs::remove_file(first).ok();
    }
}
