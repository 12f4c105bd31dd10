//! Docker-API runtime adapter using bollard
//!
//! Works against any engine speaking the Docker API over a Unix socket,
//! which in practice means Docker and rootless or system Podman. Socket
//! discovery is data: an ordered candidate list, tried until a ping
//! succeeds, with explicit environment overrides taking precedence.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerSummary, EndpointSettings, HostConfig,
    MountTypeEnum, NetworkCreateRequest, NetworkingConfig, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::query_parameters::{
    AttachContainerOptions, CreateContainerOptions, CreateImageOptions, ListContainersOptions,
    ListImagesOptions, ListNetworksOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::io::StreamReader;
use tracing::instrument;

use crate::error::{Result, RuntimeError};
use crate::runtime::{
    ContainerInfo, ContainerSpec, ContainerStdin, ContainerStdout, Mount, PortBinding,
    PortMapping, Runtime,
};

/// Environment variable overriding the Podman socket path
pub const PODMAN_SOCKET_ENV: &str = "TOOLHIVE_PODMAN_SOCKET";
/// Environment variable overriding the Docker socket path
pub const DOCKER_SOCKET_ENV: &str = "TOOLHIVE_DOCKER_SOCKET";

const PODMAN_SYSTEM_SOCKET: &str = "/var/run/podman/podman.sock";
const PODMAN_XDG_RUNTIME_SOCKET: &str = "podman/podman.sock";
const PODMAN_MACHINE_SOCKET: &str = ".local/share/containers/podman/machine/podman.sock";
const DOCKER_SYSTEM_SOCKET: &str = "/var/run/docker.sock";
const DOCKER_DESKTOP_SOCKET: &str = ".docker/run/docker.sock";

const CONNECT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Which engine flavor a socket belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Podman,
    Docker,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Podman => write!(f, "podman"),
            EngineKind::Docker => write!(f, "docker"),
        }
    }
}

/// Ordered socket candidates: env overrides, then rootless Podman, system
/// Podman, Podman machine, system Docker, Docker Desktop.
pub fn socket_candidates() -> Vec<(PathBuf, EngineKind)> {
    let mut candidates = Vec::new();

    if let Ok(path) = std::env::var(PODMAN_SOCKET_ENV) {
        candidates.push((PathBuf::from(path), EngineKind::Podman));
    }
    if let Ok(path) = std::env::var(DOCKER_SOCKET_ENV) {
        candidates.push((PathBuf::from(path), EngineKind::Docker));
    }

    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        candidates.push((
            Path::new(&xdg).join(PODMAN_XDG_RUNTIME_SOCKET),
            EngineKind::Podman,
        ));
    }
    candidates.push((PathBuf::from(PODMAN_SYSTEM_SOCKET), EngineKind::Podman));
    if let Ok(home) = std::env::var("HOME") {
        candidates.push((Path::new(&home).join(PODMAN_MACHINE_SOCKET), EngineKind::Podman));
    }
    candidates.push((PathBuf::from(DOCKER_SYSTEM_SOCKET), EngineKind::Docker));
    if let Ok(home) = std::env::var("HOME") {
        candidates.push((Path::new(&home).join(DOCKER_DESKTOP_SOCKET), EngineKind::Docker));
    }

    candidates
}

/// Runtime adapter backed by a Docker-API-compatible engine
pub struct DockerRuntime {
    docker: Docker,
    engine: EngineKind,
}

impl std::fmt::Debug for DockerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerRuntime")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl DockerRuntime {
    /// Connect to the first reachable engine from the socket candidate list.
    pub async fn connect() -> Result<Self> {
        let mut last_error = None;

        for (path, kind) in socket_candidates() {
            if !path.exists() {
                tracing::debug!(socket = %path.display(), "socket not present, skipping");
                continue;
            }
            match Self::connect_with_socket(&path, kind).await {
                Ok(runtime) => return Ok(runtime),
                Err(err) => {
                    tracing::debug!(socket = %path.display(), error = %err, "engine connection failed");
                    last_error = Some(err);
                }
            }
        }

        Err(RuntimeError::EngineUnavailable {
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no container engine socket found".to_string()),
        })
    }

    /// Connect to a specific engine socket and verify it with a ping.
    pub async fn connect_with_socket(path: &Path, engine: EngineKind) -> Result<Self> {
        let docker = Docker::connect_with_unix(
            &path.to_string_lossy(),
            CONNECT_TIMEOUT_SECS,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| RuntimeError::EngineUnavailable {
            reason: format!("failed to connect to {engine} at {}: {e}", path.display()),
        })?;

        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::EngineUnavailable {
                reason: format!("ping to {engine} failed: {e}"),
            })?;

        tracing::info!(engine = %engine, socket = %path.display(), "connected to container engine");
        Ok(Self { docker, engine })
    }

    /// Wrap a pre-configured bollard client.
    pub fn with_client(docker: Docker, engine: EngineKind) -> Self {
        Self { docker, engine }
    }

    /// The engine flavor this adapter is connected to.
    pub fn engine(&self) -> EngineKind {
        self.engine
    }
}

/// Check whether any supported container engine is reachable.
pub async fn is_engine_available() -> bool {
    DockerRuntime::connect().await.is_ok()
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn port_key(port: u16) -> String {
    format!("{port}/tcp")
}

fn parse_port_key(key: &str) -> Option<u16> {
    key.split('/').next().and_then(|p| p.parse().ok())
}

fn env_to_vec(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter().map(|(k, v)| format!("{k}={v}")).collect()
}

fn env_slice_to_map(env: &[String]) -> BTreeMap<String, String> {
    env.iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn build_create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let env = env_to_vec(&spec.env);
    let labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let exposed_ports: Vec<String> = spec.exposed_ports.iter().map(|p| port_key(*p)).collect();

    let mounts: Vec<bollard::models::Mount> = spec
        .mounts
        .iter()
        .map(|m| bollard::models::Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(m.source.clone()),
            target: Some(m.target.clone()),
            read_only: Some(m.read_only),
            ..Default::default()
        })
        .collect();

    let port_bindings: HashMap<String, Option<Vec<bollard::models::PortBinding>>> = spec
        .port_bindings
        .iter()
        .map(|(port, bindings)| {
            let bound = bindings
                .iter()
                .map(|b| bollard::models::PortBinding {
                    host_ip: Some(b.host_ip.clone()),
                    host_port: Some(b.host_port.to_string()),
                })
                .collect();
            (port_key(*port), Some(bound))
        })
        .collect();

    let host_config = HostConfig {
        mounts: if mounts.is_empty() { None } else { Some(mounts) },
        network_mode: if spec.network_mode.is_empty() {
            None
        } else {
            Some(spec.network_mode.clone())
        },
        cap_add: if spec.cap_add.is_empty() {
            None
        } else {
            Some(spec.cap_add.clone())
        },
        cap_drop: if spec.cap_drop.is_empty() {
            None
        } else {
            Some(spec.cap_drop.clone())
        },
        security_opt: if spec.security_opt.is_empty() {
            None
        } else {
            Some(spec.security_opt.clone())
        },
        dns: if spec.dns_servers.is_empty() {
            None
        } else {
            Some(spec.dns_servers.clone())
        },
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        restart_policy: spec.restart_unless_stopped.then(|| RestartPolicy {
            name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    let endpoints_config: HashMap<String, EndpointSettings> = spec
        .networks
        .iter()
        .map(|network| (network.clone(), EndpointSettings::default()))
        .collect();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: if spec.command.is_empty() {
            None
        } else {
            Some(spec.command.clone())
        },
        env: if env.is_empty() { None } else { Some(env) },
        labels: if labels.is_empty() { None } else { Some(labels) },
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        attach_stdin: Some(spec.attach_stdio),
        attach_stdout: Some(spec.attach_stdio),
        attach_stderr: Some(spec.attach_stdio),
        open_stdin: Some(spec.attach_stdio),
        tty: Some(false),
        host_config: Some(host_config),
        networking_config: if endpoints_config.is_empty() {
            None
        } else {
            Some(NetworkingConfig {
                endpoints_config: Some(endpoints_config),
            })
        },
        ..Default::default()
    }
}

// Observed configuration of an existing container, in the same shape the
// desired spec uses so the reconcile comparison is a single function.
fn spec_from_inspect(inspect: &ContainerInspectResponse) -> ContainerSpec {
    let config = inspect.config.clone().unwrap_or_default();
    let host_config = inspect.host_config.clone().unwrap_or_default();

    let attach_stdio = config.attach_stdin.unwrap_or(false)
        && config.attach_stdout.unwrap_or(false)
        && config.attach_stderr.unwrap_or(false)
        && config.open_stdin.unwrap_or(false);

    let mounts = host_config
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|m| Mount {
            source: m.source.unwrap_or_default(),
            target: m.target.unwrap_or_default(),
            read_only: m.read_only.unwrap_or(false),
        })
        .collect();

    let exposed_ports = config
        .exposed_ports
        .unwrap_or_default()
        .iter()
        .filter_map(|key| parse_port_key(key))
        .collect();

    let port_bindings = host_config
        .port_bindings
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, bindings)| {
            let port = parse_port_key(&key)?;
            let bound = bindings
                .unwrap_or_default()
                .into_iter()
                .map(|b| PortBinding {
                    host_ip: b.host_ip.unwrap_or_default(),
                    host_port: b
                        .host_port
                        .as_deref()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0),
                })
                .collect();
            Some((port, bound))
        })
        .collect();

    ContainerSpec {
        name: inspect
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        command: config.cmd.unwrap_or_default(),
        env: env_slice_to_map(&config.env.unwrap_or_default()),
        labels: config.labels.unwrap_or_default().into_iter().collect(),
        mounts,
        network_mode: host_config.network_mode.unwrap_or_default(),
        cap_add: host_config.cap_add.unwrap_or_default(),
        cap_drop: host_config.cap_drop.unwrap_or_default(),
        security_opt: host_config.security_opt.unwrap_or_default(),
        networks: Vec::new(),
        dns_servers: host_config.dns.unwrap_or_default(),
        exposed_ports,
        port_bindings,
        attach_stdio,
        restart_unless_stopped: host_config
            .restart_policy
            .and_then(|p| p.name)
            .map(|name| name == RestartPolicyNameEnum::UNLESS_STOPPED)
            .unwrap_or(false),
    }
}

fn info_from_summary(summary: &ContainerSummary) -> ContainerInfo {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())
        .unwrap_or_default();

    let ports = summary
        .ports
        .as_ref()
        .map(|ports| {
            ports
                .iter()
                .map(|p| PortMapping {
                    container_port: p.private_port,
                    host_port: p.public_port.unwrap_or(0),
                    protocol: p
                        .typ
                        .as_ref()
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "tcp".to_string()),
                })
                .collect()
        })
        .unwrap_or_default();

    ContainerInfo {
        id: summary.id.clone().unwrap_or_default(),
        name,
        image: summary.image.clone().unwrap_or_default(),
        status: summary.status.clone().unwrap_or_default(),
        state: summary
            .state
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_default(),
        created: summary
            .created
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)),
        labels: summary.labels.clone().unwrap_or_default(),
        ports,
    }
}

fn info_from_inspect(inspect: &ContainerInspectResponse) -> ContainerInfo {
    let config = inspect.config.clone().unwrap_or_default();
    let status = inspect
        .state
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .map(|s| s.to_string())
        .unwrap_or_default();

    let ports = inspect
        .network_settings
        .as_ref()
        .and_then(|n| n.ports.clone())
        .unwrap_or_default()
        .into_iter()
        .flat_map(|(key, bindings)| {
            let container_port = parse_port_key(&key).unwrap_or(0);
            let protocol = key
                .split('/')
                .nth(1)
                .unwrap_or("tcp")
                .to_string();
            bindings
                .unwrap_or_default()
                .into_iter()
                .map(move |b| PortMapping {
                    container_port,
                    host_port: b
                        .host_port
                        .as_deref()
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(0),
                    protocol: protocol.clone(),
                })
        })
        .collect();

    ContainerInfo {
        id: inspect.id.clone().unwrap_or_default(),
        name: inspect
            .name
            .as_deref()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_default(),
        image: config.image.unwrap_or_default(),
        status: status.clone(),
        state: status,
        created: None,
        labels: config.labels.unwrap_or_default(),
        ports,
    }
}

#[async_trait::async_trait]
impl Runtime for DockerRuntime {
    #[instrument(skip(self), fields(otel.name = "image.pull", image = %image))]
    async fn pull_image(&self, image: &str) -> Result<()> {
        tracing::info!(image = %image, "pulling image");

        let options = CreateImageOptions {
            from_image: Some(image.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(progress) => {
                    if let Some(status) = progress.status {
                        tracing::debug!(status = %status, "pull progress");
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::PullFailed {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(image = %image, "image pulled");
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let images = self
            .docker
            .list_images(Some(ListImagesOptions {
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to list images: {e}")))?;

        Ok(!images.is_empty())
    }

    #[instrument(skip(self, spec), fields(otel.name = "container.deploy", container = %spec.name, image = %spec.image))]
    async fn deploy_container(&self, spec: &ContainerSpec) -> Result<String> {
        if let Some(existing_id) = self.find_container_by_name(&spec.name).await? {
            let inspect = self
                .docker
                .inspect_container(&existing_id, None)
                .await
                .map_err(|e| RuntimeError::Internal(format!("failed to inspect container: {e}")))?;

            let current = spec_from_inspect(&inspect);
            if spec.reconciles_with(&current) {
                let running = inspect
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                if !running {
                    self.start_container(&existing_id).await?;
                }
                tracing::info!(container = %spec.name, id = %existing_id, "reusing existing container");
                return Ok(existing_id);
            }

            tracing::info!(container = %spec.name, "configuration changed, replacing container");
            self.stop_container(&existing_id, DEFAULT_STOP_GRACE).await?;
            self.remove_container(&existing_id).await?;
        }

        let options = CreateContainerOptions {
            name: Some(spec.name.clone()),
            platform: String::new(),
        };
        let body = build_create_body(spec);

        tracing::info!(container = %spec.name, image = %spec.image, "creating container");
        let response = self
            .docker
            .create_container(Some(options), body)
            .await
            .map_err(|e| RuntimeError::CreateFailed {
                id: spec.name.clone(),
                reason: e.to_string(),
            })?;

        self.docker
            .start_container(&response.id, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::StartFailed {
                id: response.id.clone(),
                reason: e.to_string(),
            })?;

        Ok(response.id)
    }

    #[instrument(skip(self), fields(otel.name = "container.start", container = %id))]
    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(|e| RuntimeError::StartFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self), fields(otel.name = "container.stop", container = %id, grace_secs = grace.as_secs()))]
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()> {
        match self.is_running(id).await {
            Ok(false) => return Ok(()),
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
            Ok(true) => {}
        }

        let options = StopContainerOptions {
            t: Some(grace.as_secs() as i32),
            signal: None,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => {
                tracing::info!(container = %id, "container stopped");
                Ok(())
            }
            // Removed underneath us; target state reached either way
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::Internal(format!(
                "failed to stop container: {e}"
            ))),
        }
    }

    #[instrument(skip(self), fields(otel.name = "container.remove", container = %id))]
    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => {
                tracing::info!(container = %id, "container removed");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(RuntimeError::Internal(format!(
                "failed to remove container: {e}"
            ))),
        }
    }

    async fn list_containers(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            label_filters
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect(),
        );

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to list containers: {e}")))?;

        Ok(containers.iter().map(info_from_summary).collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::NotFound {
                        container: id.to_string(),
                        reason: "container not found".to_string(),
                    }
                } else {
                    RuntimeError::Internal(format!("failed to inspect container: {e}"))
                }
            })?;

        Ok(info_from_inspect(&inspect))
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::NotFound {
                        container: id.to_string(),
                        reason: "container not found".to_string(),
                    }
                } else {
                    RuntimeError::Internal(format!("failed to inspect container: {e}"))
                }
            })?;

        Ok(inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    #[instrument(skip(self), fields(otel.name = "container.logs", container = %id, follow = follow))]
    async fn container_logs(&self, id: &str, follow: bool) -> Result<String> {
        let options = LogsOptions {
            stdout: true,
            stderr: true,
            follow,
            tail: "100".to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut output = String::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(chunk) => output.push_str(&chunk.to_string()),
                Err(e) => {
                    return Err(RuntimeError::NotFound {
                        container: id.to_string(),
                        reason: format!("failed to get logs: {e}"),
                    });
                }
            }
        }

        Ok(output)
    }

    #[instrument(skip(self), fields(otel.name = "container.attach", container = %id))]
    async fn attach_container(&self, id: &str) -> Result<(ContainerStdin, ContainerStdout)> {
        if !self.is_running(id).await? {
            return Err(RuntimeError::NotRunning {
                container: id.to_string(),
            });
        }

        let options = AttachContainerOptions {
            stream: true,
            stdin: true,
            stdout: true,
            stderr: true,
            logs: false,
            ..Default::default()
        };

        let results = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| RuntimeError::AttachFailed {
                container: id.to_string(),
                reason: e.to_string(),
            })?;

        // The attach output is a demultiplexed frame stream; adapt it into a
        // plain byte reader for the bridge.
        let reader = StreamReader::new(results.output.map(|chunk| {
            chunk
                .map(|output| output.into_bytes())
                .map_err(|e| std::io::Error::other(e.to_string()))
        }));

        Ok((Box::new(results.input), Box::new(reader)))
    }

    #[instrument(skip(self, labels), fields(otel.name = "network.create", network = %name, internal = internal))]
    async fn create_network(
        &self,
        name: &str,
        internal: bool,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let existing = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: Some(filters),
            }))
            .await
            .map_err(|e| RuntimeError::Network(format!("failed to list networks: {e}")))?;
        if !existing.is_empty() {
            return Ok(());
        }

        let request = NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            internal: Some(internal),
            labels: Some(labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            ..Default::default()
        };

        self.docker
            .create_network(request)
            .await
            .map_err(|e| RuntimeError::Network(format!("failed to create network {name}: {e}")))?;

        tracing::info!(network = %name, internal = internal, "network created");
        Ok(())
    }

    #[instrument(skip(self), fields(otel.name = "network.delete", network = %name))]
    async fn delete_network(&self, name: &str) -> Result<()> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: Some(filters),
            }))
            .await
            .map_err(|e| RuntimeError::Network(format!("failed to list networks: {e}")))?;

        let Some(id) = networks.first().and_then(|n| n.id.clone()) else {
            return Ok(());
        };

        self.docker
            .remove_network(&id)
            .await
            .map_err(|e| RuntimeError::Network(format!("failed to remove network {name}: {e}")))?;

        tracing::info!(network = %name, "network deleted");
        Ok(())
    }

    async fn container_ip(&self, id: &str, network: &str) -> Result<Option<IpAddr>> {
        let inspect = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(|e| {
                if is_not_found(&e) {
                    RuntimeError::NotFound {
                        container: id.to_string(),
                        reason: "container not found".to_string(),
                    }
                } else {
                    RuntimeError::Internal(format!("failed to inspect container: {e}"))
                }
            })?;

        let ip = inspect
            .network_settings
            .and_then(|settings| settings.networks)
            .and_then(|networks| networks.get(network).cloned())
            .and_then(|endpoint| endpoint.ip_address)
            .filter(|ip| !ip.is_empty())
            .and_then(|ip| ip.parse().ok());

        Ok(ip)
    }

    async fn find_container_by_name(&self, name: &str) -> Result<Option<String>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters: Some(filters),
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Internal(format!("failed to list containers: {e}")))?;

        // The name filter matches substrings; require an exact match
        for container in &containers {
            let names = container.names.clone().unwrap_or_default();
            if names
                .iter()
                .any(|n| n == name || n.trim_start_matches('/') == name)
            {
                return Ok(container.id.clone());
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_key_round_trip() {
        assert_eq!(port_key(8080), "8080/tcp");
        assert_eq!(parse_port_key("8080/tcp"), Some(8080));
        assert_eq!(parse_port_key("garbage"), None);
    }

    #[test]
    fn test_env_conversion() {
        let mut env = BTreeMap::new();
        env.insert("B".to_string(), "2".to_string());
        env.insert("A".to_string(), "1".to_string());

        let vec = env_to_vec(&env);
        assert_eq!(vec, vec!["A=1".to_string(), "B=2".to_string()]);
        assert_eq!(env_slice_to_map(&vec), env);
    }

    #[test]
    fn test_env_slice_ignores_malformed_entries() {
        let parsed = env_slice_to_map(&["A=1".to_string(), "NOEQUALS".to_string()]);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed.get("A"), Some(&"1".to_string()));
    }

    #[test]
    fn test_build_create_body_maps_spec() {
        let mut spec = ContainerSpec {
            name: "fetch".to_string(),
            image: "test:latest".to_string(),
            network_mode: "none".to_string(),
            cap_drop: vec!["ALL".to_string()],
            attach_stdio: true,
            restart_unless_stopped: true,
            networks: vec!["toolhive-fetch-internal".to_string()],
            ..Default::default()
        };
        spec.env.insert("A".to_string(), "1".to_string());
        spec.exposed_ports.insert(9090);
        spec.port_bindings.insert(
            9090,
            vec![PortBinding {
                host_ip: "0.0.0.0".to_string(),
                host_port: 8080,
            }],
        );

        let body = build_create_body(&spec);
        assert_eq!(body.image.as_deref(), Some("test:latest"));
        assert_eq!(body.env.unwrap(), vec!["A=1".to_string()]);
        assert_eq!(body.exposed_ports.unwrap(), vec!["9090/tcp".to_string()]);
        assert_eq!(body.attach_stdin, Some(true));
        assert_eq!(body.open_stdin, Some(true));
        assert_eq!(body.tty, Some(false));

        let host_config = body.host_config.unwrap();
        assert_eq!(host_config.network_mode.as_deref(), Some("none"));
        assert_eq!(host_config.cap_drop.unwrap(), vec!["ALL".to_string()]);
        let bindings = host_config.port_bindings.unwrap();
        let bound = bindings.get("9090/tcp").unwrap().as_ref().unwrap();
        assert_eq!(bound[0].host_port.as_deref(), Some("8080"));
        assert_eq!(
            host_config.restart_policy.unwrap().name,
            Some(RestartPolicyNameEnum::UNLESS_STOPPED)
        );

        let endpoints = body
            .networking_config
            .unwrap()
            .endpoints_config
            .unwrap();
        assert!(endpoints.contains_key("toolhive-fetch-internal"));
    }

    #[test]
    fn test_socket_candidates_include_known_paths() {
        let candidates = socket_candidates();
        let paths: Vec<String> = candidates
            .iter()
            .map(|(p, _)| p.to_string_lossy().into_owned())
            .collect();
        assert!(paths.iter().any(|p| p.ends_with("podman/podman.sock")));
        assert!(paths.iter().any(|p| p == "/var/run/docker.sock"));
    }
}
