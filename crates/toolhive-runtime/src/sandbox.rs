//! Per-workload sandbox composition
//!
//! A workload runs as three cooperating containers on two networks:
//!
//! - `<name>` - the MCP server, attached only to the per-workload internal
//!   network, with all outbound HTTP forced through the egress proxy
//! - `<name>-egress` - a Squid forward proxy enforcing the outbound ACL,
//!   attached to both the internal and the shared external network
//! - `<name>-dns` - a DNS resolver the main container is pointed at,
//!   attached to both networks
//!
//! Build order is fixed: networks, image pulls, DNS (capture its internal
//! IP), egress (ACL mounted, host ports bound), then the main container.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use toolhive_core::labels;
use toolhive_core::workload::{WorkloadSpec, EXTERNAL_NETWORK};

use crate::egress::{
    materialize_squid_conf, DNS_IMAGE, EGRESS_CONF_MOUNT_PATH, EGRESS_IMAGE, EGRESS_PROXY_PORT,
};
use crate::error::Result;
use crate::permissions::compile_profile;
use crate::runtime::{ContainerSpec, Mount, PortBinding, Runtime};

/// Grace period used when stopping sandbox containers during teardown
const TEARDOWN_STOP_GRACE: Duration = Duration::from_secs(10);

/// Handles to the three containers of a running workload sandbox
#[derive(Debug, Clone)]
pub struct Sandbox {
    pub workload: String,
    pub main_id: String,
    pub egress_id: String,
    pub dns_id: String,
    pub internal_network: String,
    pub dns_ip: Option<IpAddr>,
}

/// Materializes and tears down workload sandboxes against a runtime
pub struct SandboxBuilder {
    runtime: Arc<dyn Runtime>,
}

impl SandboxBuilder {
    pub fn new(runtime: Arc<dyn Runtime>) -> Self {
        Self { runtime }
    }

    /// Build the three-container sandbox for a workload.
    ///
    /// On any failure every artifact created so far is torn down
    /// best-effort before the error is returned.
    pub async fn build(&self, workload: &WorkloadSpec) -> Result<Sandbox> {
        match self.try_build(workload).await {
            Ok(sandbox) => Ok(sandbox),
            Err(err) => {
                tracing::warn!(
                    workload = %workload.name,
                    error = %err,
                    "sandbox creation failed, cleaning up partial artifacts"
                );
                self.teardown(&workload.name, TEARDOWN_STOP_GRACE).await.ok();
                Err(err)
            }
        }
    }

    async fn try_build(&self, workload: &WorkloadSpec) -> Result<Sandbox> {
        let internal_network = workload.internal_network_name();
        self.create_networks(&internal_network).await?;

        for image in [EGRESS_IMAGE, DNS_IMAGE] {
            if !self.runtime.image_exists(image).await? {
                self.runtime.pull_image(image).await?;
            }
        }

        let dns_spec = self.dns_spec(workload, &internal_network);
        let dns_id = self.runtime.deploy_container(&dns_spec).await?;
        let dns_ip = self.runtime.container_ip(&dns_id, &internal_network).await?;
        if dns_ip.is_none() {
            tracing::warn!(
                workload = %workload.name,
                network = %internal_network,
                "DNS container has no address on the internal network yet"
            );
        }

        let conf_path = materialize_squid_conf(
            workload.permission_profile.network.as_ref(),
            &workload.name,
            &workload.ingress_ports(),
        )?;
        let egress_spec = self.egress_spec(workload, &internal_network, &conf_path.to_string_lossy());
        let egress_id = self.runtime.deploy_container(&egress_spec).await?;

        let main_spec = self.main_spec(workload, &internal_network, dns_ip)?;
        let main_id = self.runtime.deploy_container(&main_spec).await?;

        tracing::info!(
            workload = %workload.name,
            main = %main_id,
            egress = %egress_id,
            dns = %dns_id,
            "sandbox is up"
        );

        Ok(Sandbox {
            workload: workload.name.clone(),
            main_id,
            egress_id,
            dns_id,
            internal_network,
            dns_ip,
        })
    }

    /// Tear down every sandbox artifact of a workload. Failures along the
    /// way are logged and skipped so teardown always runs to completion.
    pub async fn teardown(&self, workload_name: &str, grace: Duration) -> Result<()> {
        let container_names = [
            workload_name.to_string(),
            format!("{workload_name}-egress"),
            format!("{workload_name}-dns"),
        ];

        let mut found = Vec::new();
        for name in &container_names {
            match self.runtime.find_container_by_name(name).await {
                Ok(Some(id)) => found.push((name.clone(), id)),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(container = %name, error = %err, "failed to look up container");
                }
            }
        }

        for (name, id) in &found {
            if let Err(err) = self.runtime.stop_container(id, grace).await {
                tracing::warn!(container = %name, error = %err, "failed to stop container");
            }
        }
        for (name, id) in &found {
            if let Err(err) = self.runtime.remove_container(id).await {
                tracing::warn!(container = %name, error = %err, "failed to remove container");
            }
        }

        let internal_network = format!("toolhive-{workload_name}-internal");
        if let Err(err) = self.runtime.delete_network(&internal_network).await {
            tracing::warn!(network = %internal_network, error = %err, "failed to delete network");
        }

        // The external network is shared; drop it only once nothing owned by
        // the process is left using it.
        match self
            .runtime
            .list_containers(&[(labels::LABEL_TOOLHIVE, "true")])
            .await
        {
            Ok(remaining) if remaining.is_empty() => {
                if let Err(err) = self.runtime.delete_network(EXTERNAL_NETWORK).await {
                    tracing::warn!(network = EXTERNAL_NETWORK, error = %err, "failed to delete network");
                }
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(error = %err, "failed to list remaining containers");
            }
        }

        tracing::info!(workload = %workload_name, "sandbox torn down");
        Ok(())
    }

    async fn create_networks(&self, internal_network: &str) -> Result<()> {
        let mut internal_labels = BTreeMap::new();
        labels::add_network_labels(&mut internal_labels, internal_network);
        self.runtime
            .create_network(internal_network, true, &internal_labels)
            .await?;

        let mut external_labels = BTreeMap::new();
        labels::add_network_labels(&mut external_labels, EXTERNAL_NETWORK);
        if let Err(err) = self
            .runtime
            .create_network(EXTERNAL_NETWORK, false, &external_labels)
            .await
        {
            tracing::warn!(network = EXTERNAL_NETWORK, error = %err, "failed to create external network");
        }

        Ok(())
    }

    fn dns_spec(&self, workload: &WorkloadSpec, internal_network: &str) -> ContainerSpec {
        let mut dns_labels = BTreeMap::new();
        labels::add_standard_labels(
            &mut dns_labels,
            &workload.name,
            workload.transport,
            workload.proxy_port,
        );

        ContainerSpec {
            name: workload.dns_container_name(),
            image: DNS_IMAGE.to_string(),
            labels: dns_labels,
            network_mode: "bridge".to_string(),
            networks: vec![internal_network.to_string(), EXTERNAL_NETWORK.to_string()],
            restart_unless_stopped: true,
            ..Default::default()
        }
    }

    fn egress_spec(
        &self,
        workload: &WorkloadSpec,
        internal_network: &str,
        conf_path: &str,
    ) -> ContainerSpec {
        let mut egress_labels = BTreeMap::new();
        labels::add_standard_labels(
            &mut egress_labels,
            &workload.name,
            workload.transport,
            workload.proxy_port,
        );

        // The egress proxy is the public entry point: ingress ports are
        // exposed here and bound to the workload's host port.
        let ingress_ports = workload.ingress_ports();
        let mut port_bindings = BTreeMap::new();
        for port in &ingress_ports {
            port_bindings.insert(
                *port,
                vec![PortBinding {
                    host_ip: String::new(),
                    host_port: workload.proxy_port,
                }],
            );
        }

        ContainerSpec {
            name: workload.egress_container_name(),
            image: EGRESS_IMAGE.to_string(),
            labels: egress_labels,
            mounts: vec![Mount {
                source: conf_path.to_string(),
                target: EGRESS_CONF_MOUNT_PATH.to_string(),
                read_only: true,
            }],
            network_mode: "bridge".to_string(),
            cap_add: vec!["CAP_SETUID".to_string(), "CAP_SETGID".to_string()],
            networks: vec![internal_network.to_string(), EXTERNAL_NETWORK.to_string()],
            exposed_ports: ingress_ports,
            port_bindings,
            restart_unless_stopped: true,
            ..Default::default()
        }
    }

    fn main_spec(
        &self,
        workload: &WorkloadSpec,
        internal_network: &str,
        dns_ip: Option<IpAddr>,
    ) -> Result<ContainerSpec> {
        let permission_config =
            compile_profile(&workload.permission_profile, workload.transport)?;

        let mut env = workload.env.clone();
        let egress_host = format!(
            "http://{}:{}",
            workload.egress_container_name(),
            EGRESS_PROXY_PORT
        );
        env.insert("HTTP_PROXY".to_string(), egress_host.clone());
        env.insert("HTTPS_PROXY".to_string(), egress_host.clone());
        env.insert("http_proxy".to_string(), egress_host.clone());
        env.insert("https_proxy".to_string(), egress_host);
        env.insert("NO_PROXY".to_string(), "localhost,127.0.0.1,::1".to_string());
        env.insert("no_proxy".to_string(), "localhost,127.0.0.1,::1".to_string());
        env.insert("MCP_TRANSPORT".to_string(), workload.transport.to_string());
        if let Some(port) = workload.target_port {
            env.insert("MCP_PORT".to_string(), port.to_string());
        }

        let mut main_labels = BTreeMap::new();
        labels::add_standard_labels(
            &mut main_labels,
            &workload.name,
            workload.transport,
            workload.proxy_port,
        );
        labels::add_main_workload_label(&mut main_labels);

        Ok(ContainerSpec {
            name: workload.name.clone(),
            image: workload.image.clone(),
            command: workload.command.clone(),
            env,
            labels: main_labels,
            mounts: permission_config.mounts,
            network_mode: permission_config.network_mode,
            cap_add: permission_config.cap_add,
            cap_drop: permission_config.cap_drop,
            security_opt: permission_config.security_opt,
            networks: vec![internal_network.to_string()],
            dns_servers: dns_ip.map(|ip| vec![ip.to_string()]).unwrap_or_default(),
            exposed_ports: workload.ingress_ports(),
            attach_stdio: workload.transport == toolhive_core::TransportType::Stdio,
            restart_unless_stopped: true,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use toolhive_core::permissions::Profile;
    use toolhive_core::TransportType;

    fn workload(name: &str) -> WorkloadSpec {
        WorkloadSpec {
            name: name.to_string(),
            image: "ghcr.io/example/echo-mcp:latest".to_string(),
            command: vec![],
            transport: TransportType::Stdio,
            env: BTreeMap::new(),
            proxy_port: 8080,
            target_port: None,
            permission_profile: Profile::default(),
        }
    }

    async fn build_sandbox(runtime: &Arc<MockRuntime>, spec: &WorkloadSpec) -> Sandbox {
        let builder = SandboxBuilder::new(runtime.clone() as Arc<dyn Runtime>);
        builder.build(spec).await.unwrap()
    }

    #[tokio::test]
    async fn test_build_creates_three_labelled_containers() {
        let runtime = Arc::new(MockRuntime::new());
        build_sandbox(&runtime, &workload("fetch")).await;

        let owned = runtime
            .list_containers(&[("toolhive", "true"), ("toolhive-name", "fetch")])
            .await
            .unwrap();
        assert_eq!(owned.len(), 3);

        let mains = runtime
            .list_containers(&[("toolhive-main-workload", "true")])
            .await
            .unwrap();
        assert_eq!(mains.len(), 1);
        assert_eq!(mains[0].name, "fetch");
    }

    #[tokio::test]
    async fn test_main_container_is_internal_only() {
        let runtime = Arc::new(MockRuntime::new());
        build_sandbox(&runtime, &workload("fetch")).await;

        let main = runtime.container_spec("fetch").await.unwrap();
        assert_eq!(main.networks, vec!["toolhive-fetch-internal".to_string()]);

        for helper in ["fetch-egress", "fetch-dns"] {
            let spec = runtime.container_spec(helper).await.unwrap();
            assert_eq!(
                spec.networks,
                vec![
                    "toolhive-fetch-internal".to_string(),
                    "toolhive-external".to_string()
                ]
            );
        }

        let (internal, _) = runtime.network("toolhive-fetch-internal").await.unwrap();
        assert!(internal);
        let (external_internal, _) = runtime.network("toolhive-external").await.unwrap();
        assert!(!external_internal);
    }

    #[tokio::test]
    async fn test_main_container_env_and_dns_wiring() {
        let runtime = Arc::new(MockRuntime::new());
        let sandbox = build_sandbox(&runtime, &workload("fetch")).await;

        let main = runtime.container_spec("fetch").await.unwrap();
        assert_eq!(
            main.env.get("HTTP_PROXY").unwrap(),
            "http://fetch-egress:3128"
        );
        assert_eq!(
            main.env.get("https_proxy").unwrap(),
            "http://fetch-egress:3128"
        );
        assert_eq!(
            main.env.get("NO_PROXY").unwrap(),
            "localhost,127.0.0.1,::1"
        );
        assert_eq!(main.env.get("MCP_TRANSPORT").unwrap(), "stdio");

        let dns_ip = sandbox.dns_ip.unwrap();
        assert_eq!(main.dns_servers, vec![dns_ip.to_string()]);
        assert!(main.attach_stdio);
    }

    #[tokio::test]
    async fn test_egress_container_has_acl_mount_and_caps() {
        let runtime = Arc::new(MockRuntime::new());
        build_sandbox(&runtime, &workload("fetch")).await;

        let egress = runtime.container_spec("fetch-egress").await.unwrap();
        assert_eq!(egress.mounts.len(), 1);
        assert_eq!(egress.mounts[0].target, "/etc/squid/squid.conf");
        assert!(egress.mounts[0].read_only);
        assert_eq!(
            egress.cap_add,
            vec!["CAP_SETUID".to_string(), "CAP_SETGID".to_string()]
        );

        let conf = std::fs::read_to_string(&egress.mounts[0].source).unwrap();
        assert!(conf.contains("http_port 3128"));
        std::fs::remove_file(&egress.mounts[0].source).ok();
    }

    #[tokio::test]
    async fn test_sse_workload_binds_ingress_on_egress() {
        let runtime = Arc::new(MockRuntime::new());
        let mut spec = workload("web");
        spec.transport = TransportType::Sse;
        spec.target_port = Some(9090);
        build_sandbox(&runtime, &spec).await;

        let egress = runtime.container_spec("web-egress").await.unwrap();
        assert!(egress.exposed_ports.contains(&9090));
        assert_eq!(egress.port_bindings.get(&9090).unwrap()[0].host_port, 8080);

        let main = runtime.container_spec("web").await.unwrap();
        assert!(!main.attach_stdio);
        assert_eq!(main.env.get("MCP_PORT").unwrap(), "9090");
        // SSE transport needs network access
        assert_eq!(main.network_mode, "bridge");
    }

    #[tokio::test]
    async fn test_teardown_removes_everything() {
        let runtime = Arc::new(MockRuntime::new());
        let spec = workload("fetch");
        build_sandbox(&runtime, &spec).await;

        let builder = SandboxBuilder::new(runtime.clone() as Arc<dyn Runtime>);
        builder
            .teardown("fetch", Duration::from_secs(1))
            .await
            .unwrap();

        let remaining = runtime.list_containers(&[]).await.unwrap();
        assert!(remaining.is_empty());
        assert!(runtime.network("toolhive-fetch-internal").await.is_none());
        assert!(runtime.network("toolhive-external").await.is_none());
    }

    #[tokio::test]
    async fn test_external_network_survives_other_workloads() {
        let runtime = Arc::new(MockRuntime::new());
        build_sandbox(&runtime, &workload("one")).await;
        build_sandbox(&runtime, &workload("two")).await;

        let builder = SandboxBuilder::new(runtime.clone() as Arc<dyn Runtime>);
        builder.teardown("one", Duration::from_secs(1)).await.unwrap();

        assert!(runtime.network("toolhive-one-internal").await.is_none());
        assert!(runtime.network("toolhive-external").await.is_some());
        assert!(runtime.network("toolhive-two-internal").await.is_some());
    }

    #[tokio::test]
    async fn test_partial_failure_cleans_up() {
        let runtime = Arc::new(MockRuntime::new());
        runtime.fail_pulls_of(EGRESS_IMAGE).await;

        let builder = SandboxBuilder::new(runtime.clone() as Arc<dyn Runtime>);
        let result = builder.build(&workload("fetch")).await;
        assert!(result.is_err());

        let remaining = runtime.list_containers(&[]).await.unwrap();
        assert!(remaining.is_empty());
        assert!(runtime.network("toolhive-fetch-internal").await.is_none());
    }

    #[tokio::test]
    async fn test_rebuild_is_idempotent() {
        let runtime = Arc::new(MockRuntime::new());
        let spec = workload("fetch");
        let first = build_sandbox(&runtime, &spec).await;
        let events_before = runtime.events().await;

        let second = build_sandbox(&runtime, &spec).await;
        assert_eq!(first.main_id, second.main_id);
        assert_eq!(first.egress_id, second.egress_id);
        assert_eq!(first.dns_id, second.dns_id);

        // No container was created or replaced the second time around
        let new_events: Vec<String> = runtime.events().await[events_before.len()..].to_vec();
        assert!(new_events.iter().all(|e| !e.starts_with("create:")));
        assert!(new_events.iter().all(|e| !e.starts_with("remove:")));
    }
}
