//! Abstract container runtime interface
//!
//! Defines the `Runtime` trait implemented by the Docker adapter and by the
//! in-memory mock used in tests. The trait is a thin capability surface:
//! create, start, stop, remove, inspect, list, attach, pull, logs, and
//! network management against a Docker-API-compatible engine.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Result, RuntimeError};

/// Writer end of a container's stdin
pub type ContainerStdin = Box<dyn AsyncWrite + Unpin + Send>;
/// Reader end of a container's combined stdout/stderr
pub type ContainerStdout = Box<dyn AsyncRead + Unpin + Send>;

/// A bind mount from the host into a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// A host port binding for a container port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Host IP to bind to; empty binds all interfaces
    pub host_ip: String,
    /// Host port; zero lets the engine pick
    pub host_port: u16,
}

/// Everything the engine needs to create one container.
///
/// Collections use ordered types so the spec compares and serializes
/// deterministically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network_mode: String,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub security_opt: Vec<String>,
    /// Networks the container joins (endpoint attachments)
    pub networks: Vec<String>,
    /// Explicit DNS servers for the container
    pub dns_servers: Vec<String>,
    pub exposed_ports: BTreeSet<u16>,
    pub port_bindings: BTreeMap<u16, Vec<PortBinding>>,
    /// Attach stdin/stdout/stderr and keep stdin open
    pub attach_stdio: bool,
    /// Restart policy `unless-stopped`
    pub restart_unless_stopped: bool,
}

impl ContainerSpec {
    /// Whether an existing container with this observed configuration can be
    /// reused for the desired spec (`self`), or must be replaced.
    ///
    /// Env vars and labels compare as subsets: the engine injects its own
    /// entries, so the desired set must be present with equal values but the
    /// existing container may carry more. Everything else compares exactly.
    pub fn reconciles_with(&self, existing: &ContainerSpec) -> bool {
        if self.image != existing.image || self.command != existing.command {
            return false;
        }

        for (key, value) in &self.env {
            if existing.env.get(key) != Some(value) {
                return false;
            }
        }
        for (key, value) in &self.labels {
            if existing.labels.get(key) != Some(value) {
                return false;
            }
        }

        if self.attach_stdio != existing.attach_stdio {
            return false;
        }
        if self.network_mode != existing.network_mode {
            return false;
        }
        if self.cap_add != existing.cap_add
            || self.cap_drop != existing.cap_drop
            || self.security_opt != existing.security_opt
        {
            return false;
        }
        if self.restart_unless_stopped != existing.restart_unless_stopped {
            return false;
        }

        // Mounts compare by target path
        if self.mounts.len() != existing.mounts.len() {
            return false;
        }
        let existing_mounts: HashMap<&str, &Mount> = existing
            .mounts
            .iter()
            .map(|m| (m.target.as_str(), m))
            .collect();
        for mount in &self.mounts {
            match existing_mounts.get(mount.target.as_str()) {
                Some(m) if m.source == mount.source && m.read_only == mount.read_only => {}
                _ => return false,
            }
        }

        self.exposed_ports == existing.exposed_ports
            && self.port_bindings == existing.port_bindings
    }
}

/// A port mapping reported by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

/// Information about a container as reported by the engine
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub status: String,
    pub state: String,
    pub created: Option<SystemTime>,
    pub labels: HashMap<String, String>,
    pub ports: Vec<PortMapping>,
}

/// Abstract container runtime trait.
///
/// Operations are idempotent where the semantics allow: stopping a stopped
/// container, removing an absent one, and creating an existing network all
/// succeed.
#[async_trait::async_trait]
pub trait Runtime: Send + Sync {
    /// Pull an image from a registry
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Check whether an image exists in local storage
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// Create and start a container, reconciling against any existing
    /// container with the same name. A matching container is reused (and
    /// started if stopped); a mismatched one is stopped, removed, and
    /// recreated. Returns the container id.
    async fn deploy_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Start a container; no-op if already running
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container with SIGTERM, escalating to SIGKILL after `grace`.
    /// No-op if the container is already stopped or absent.
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<()>;

    /// Force-remove a container; no-op if absent
    async fn remove_container(&self, id: &str) -> Result<()>;

    /// List containers matching every given `label=value` pair
    async fn list_containers(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerInfo>>;

    /// Inspect a container by id or name
    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo>;

    /// Whether the container is currently running
    async fn is_running(&self, id: &str) -> Result<bool>;

    /// Fetch combined stdout/stderr logs
    async fn container_logs(&self, id: &str, follow: bool) -> Result<String>;

    /// Attach to a running container's stdio streams
    async fn attach_container(&self, id: &str) -> Result<(ContainerStdin, ContainerStdout)>;

    /// Create a bridge network; an existing network with the name is success
    async fn create_network(
        &self,
        name: &str,
        internal: bool,
        labels: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Delete a network by name; absent is success
    async fn delete_network(&self, name: &str) -> Result<()>;

    /// IP address of a container on a named network, if assigned
    async fn container_ip(&self, id: &str, network: &str) -> Result<Option<IpAddr>>;

    /// Resolve an exact container name to its id
    async fn find_container_by_name(&self, name: &str) -> Result<Option<String>>;
}

/// In-memory mock runtime for tests.
///
/// Tracks containers, networks, and images, and records every mutating call
/// in an event log so tests can assert on reconcile behavior. `attach`
/// returns duplex pipes whose far ends are available through [`MockRuntime::take_io`].
pub struct MockRuntime {
    state: tokio::sync::Mutex<MockState>,
}

/// Test-side ends of a mock container's stdio pipes.
///
/// Bytes the bridge writes to the container's stdin can be read from
/// `stdin`; bytes written to `stdout` appear on the bridge's reader.
pub struct MockIo {
    pub stdin: tokio::io::DuplexStream,
    pub stdout: tokio::io::DuplexStream,
}

#[derive(Debug, Clone)]
struct MockContainer {
    id: String,
    spec: ContainerSpec,
    running: bool,
}

#[derive(Debug, Clone)]
struct MockNetwork {
    internal: bool,
    labels: BTreeMap<String, String>,
}

#[derive(Default)]
struct MockState {
    containers: Vec<MockContainer>,
    networks: HashMap<String, MockNetwork>,
    images: std::collections::HashSet<String>,
    failing_pulls: std::collections::HashSet<String>,
    io: HashMap<String, MockIo>,
    events: Vec<String>,
    next_id: u64,
}

impl MockState {
    fn find(&self, id_or_name: &str) -> Option<usize> {
        self.containers
            .iter()
            .position(|c| c.id == id_or_name || c.spec.name == id_or_name)
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::Mutex::new(MockState::default()),
        }
    }

    /// Mark an image as present in local storage
    pub async fn add_image(&self, image: &str) {
        self.state.lock().await.images.insert(image.to_string());
    }

    /// Make future pulls of `image` fail
    pub async fn fail_pulls_of(&self, image: &str) {
        self.state
            .lock()
            .await
            .failing_pulls
            .insert(image.to_string());
    }

    /// Snapshot of the mutating-call event log
    pub async fn events(&self) -> Vec<String> {
        self.state.lock().await.events.clone()
    }

    /// Spec of a container by id or name
    pub async fn container_spec(&self, id_or_name: &str) -> Option<ContainerSpec> {
        let state = self.state.lock().await;
        state.find(id_or_name).map(|i| state.containers[i].spec.clone())
    }

    /// Flip a container's running flag without recording an event,
    /// simulating an external crash or kill
    pub async fn set_running(&self, id_or_name: &str, running: bool) {
        let mut state = self.state.lock().await;
        if let Some(i) = state.find(id_or_name) {
            state.containers[i].running = running;
        }
    }

    /// Drop a container entirely, simulating external removal
    pub async fn drop_container(&self, id_or_name: &str) {
        let mut state = self.state.lock().await;
        if let Some(i) = state.find(id_or_name) {
            state.containers.remove(i);
        }
    }

    /// Take the test-side stdio handles for an attached container
    pub async fn take_io(&self, id_or_name: &str) -> Option<MockIo> {
        let mut state = self.state.lock().await;
        let name = state
            .find(id_or_name)
            .map(|i| state.containers[i].spec.name.clone())?;
        state.io.remove(&name)
    }

    /// Whether a network exists, with its internal flag
    pub async fn network(&self, name: &str) -> Option<(bool, BTreeMap<String, String>)> {
        self.state
            .lock()
            .await
            .networks
            .get(name)
            .map(|n| (n.internal, n.labels.clone()))
    }

    fn info_from(container: &MockContainer) -> ContainerInfo {
        ContainerInfo {
            id: container.id.clone(),
            name: container.spec.name.clone(),
            image: container.spec.image.clone(),
            status: if container.running {
                "Up 1 second".to_string()
            } else {
                "Exited (0) 1 second ago".to_string()
            },
            state: if container.running {
                "running".to_string()
            } else {
                "exited".to_string()
            },
            created: Some(SystemTime::now()),
            labels: container
                .spec
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            ports: container
                .spec
                .port_bindings
                .iter()
                .flat_map(|(port, bindings)| {
                    bindings.iter().map(|b| PortMapping {
                        container_port: *port,
                        host_port: b.host_port,
                        protocol: "tcp".to_string(),
                    })
                })
                .collect(),
        }
    }
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Runtime for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_pulls.contains(image) {
            return Err(RuntimeError::PullFailed {
                image: image.to_string(),
                reason: "simulated registry failure".to_string(),
            });
        }
        state.images.insert(image.to_string());
        state.events.push(format!("pull:{image}"));
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state.lock().await.images.contains(image))
    }

    async fn deploy_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut state = self.state.lock().await;

        if let Some(i) = state.find(&spec.name) {
            if spec.reconciles_with(&state.containers[i].spec) {
                let id = state.containers[i].id.clone();
                if !state.containers[i].running {
                    state.containers[i].running = true;
                    state.events.push(format!("start:{}", spec.name));
                }
                return Ok(id);
            }
            state.events.push(format!("stop:{}", spec.name));
            state.events.push(format!("remove:{}", spec.name));
            state.containers.remove(i);
        }

        state.next_id += 1;
        let id = format!("mock-{:04}", state.next_id);
        state.events.push(format!("create:{}", spec.name));
        state.events.push(format!("start:{}", spec.name));
        state.containers.push(MockContainer {
            id: id.clone(),
            spec: spec.clone(),
            running: true,
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.find(id) {
            Some(i) => {
                if !state.containers[i].running {
                    state.containers[i].running = true;
                    let name = state.containers[i].spec.name.clone();
                    state.events.push(format!("start:{name}"));
                }
                Ok(())
            }
            None => Err(RuntimeError::NotFound {
                container: id.to_string(),
                reason: "container not found".to_string(),
            }),
        }
    }

    async fn stop_container(&self, id: &str, _grace: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(i) = state.find(id) {
            if state.containers[i].running {
                state.containers[i].running = false;
                let name = state.containers[i].spec.name.clone();
                state.events.push(format!("stop:{name}"));
            }
        }
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(i) = state.find(id) {
            let name = state.containers[i].spec.name.clone();
            state.containers.remove(i);
            state.events.push(format!("remove:{name}"));
        }
        Ok(())
    }

    async fn list_containers(&self, label_filters: &[(&str, &str)]) -> Result<Vec<ContainerInfo>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .iter()
            .filter(|c| {
                label_filters.iter().all(|(key, value)| {
                    c.spec.labels.get(*key).map(String::as_str) == Some(*value)
                })
            })
            .map(Self::info_from)
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo> {
        let state = self.state.lock().await;
        state
            .find(id)
            .map(|i| Self::info_from(&state.containers[i]))
            .ok_or_else(|| RuntimeError::NotFound {
                container: id.to_string(),
                reason: "container not found".to_string(),
            })
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let state = self.state.lock().await;
        state
            .find(id)
            .map(|i| state.containers[i].running)
            .ok_or_else(|| RuntimeError::NotFound {
                container: id.to_string(),
                reason: "container not found".to_string(),
            })
    }

    async fn container_logs(&self, id: &str, _follow: bool) -> Result<String> {
        let state = self.state.lock().await;
        state
            .find(id)
            .map(|i| format!("mock logs for {}", state.containers[i].spec.name))
            .ok_or_else(|| RuntimeError::NotFound {
                container: id.to_string(),
                reason: "container not found".to_string(),
            })
    }

    async fn attach_container(&self, id: &str) -> Result<(ContainerStdin, ContainerStdout)> {
        let mut state = self.state.lock().await;
        let i = state.find(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
            reason: "container not found".to_string(),
        })?;
        if !state.containers[i].running {
            return Err(RuntimeError::NotRunning {
                container: id.to_string(),
            });
        }
        let name = state.containers[i].spec.name.clone();

        let (stdin_writer, stdin_reader) = tokio::io::duplex(64 * 1024);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(64 * 1024);
        state.io.insert(
            name,
            MockIo {
                stdin: stdin_reader,
                stdout: stdout_writer,
            },
        );
        Ok((Box::new(stdin_writer), Box::new(stdout_reader)))
    }

    async fn create_network(
        &self,
        name: &str,
        internal: bool,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.networks.contains_key(name) {
            state.networks.insert(
                name.to_string(),
                MockNetwork {
                    internal,
                    labels: labels.clone(),
                },
            );
            state.events.push(format!("network-create:{name}"));
        }
        Ok(())
    }

    async fn delete_network(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.networks.remove(name).is_some() {
            state.events.push(format!("network-delete:{name}"));
        }
        Ok(())
    }

    async fn container_ip(&self, id: &str, network: &str) -> Result<Option<IpAddr>> {
        let state = self.state.lock().await;
        let i = state.find(id).ok_or_else(|| RuntimeError::NotFound {
            container: id.to_string(),
            reason: "container not found".to_string(),
        })?;
        if !state.containers[i].spec.networks.iter().any(|n| n == network) {
            return Ok(None);
        }
        // Deterministic address derived from the container index
        Ok(Some(IpAddr::V4(std::net::Ipv4Addr::new(
            172,
            20,
            0,
            (i + 2) as u8,
        ))))
    }

    async fn find_container_by_name(&self, name: &str) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .containers
            .iter()
            .find(|c| c.spec.name == name)
            .map(|c| c.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_spec(name: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: "test:latest".to_string(),
            network_mode: "none".to_string(),
            cap_drop: vec!["ALL".to_string()],
            attach_stdio: true,
            restart_unless_stopped: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_reconcile_identical_specs() {
        let spec = base_spec("api");
        assert!(spec.reconciles_with(&spec.clone()));
    }

    #[test]
    fn test_reconcile_env_is_subset() {
        let mut desired = base_spec("api");
        desired.env.insert("A".to_string(), "1".to_string());

        let mut existing = desired.clone();
        existing.env.insert("PATH".to_string(), "/bin".to_string());

        assert!(desired.reconciles_with(&existing));
        assert!(!existing.reconciles_with(&desired));
    }

    #[test]
    fn test_reconcile_rejects_env_change() {
        let mut desired = base_spec("api");
        desired.env.insert("A".to_string(), "2".to_string());

        let mut existing = base_spec("api");
        existing.env.insert("A".to_string(), "1".to_string());

        assert!(!desired.reconciles_with(&existing));
    }

    #[test]
    fn test_reconcile_rejects_image_and_command_change() {
        let desired = base_spec("api");

        let mut other = desired.clone();
        other.image = "test:v2".to_string();
        assert!(!desired.reconciles_with(&other));

        let mut other = desired.clone();
        other.command = vec!["--verbose".to_string()];
        assert!(!desired.reconciles_with(&other));
    }

    #[test]
    fn test_reconcile_rejects_mount_and_port_changes() {
        let mut desired = base_spec("api");
        desired.mounts.push(Mount {
            source: "/data".to_string(),
            target: "/data".to_string(),
            read_only: true,
        });

        let mut existing = desired.clone();
        existing.mounts[0].read_only = false;
        assert!(!desired.reconciles_with(&existing));

        let mut existing = desired.clone();
        existing.port_bindings.insert(
            8080,
            vec![PortBinding {
                host_ip: String::new(),
                host_port: 8080,
            }],
        );
        assert!(!desired.reconciles_with(&existing));
    }

    #[test]
    fn test_reconcile_rejects_stdio_and_caps_changes() {
        let desired = base_spec("api");

        let mut other = desired.clone();
        other.attach_stdio = false;
        assert!(!desired.reconciles_with(&other));

        let mut other = desired.clone();
        other.cap_add = vec!["NET_ADMIN".to_string()];
        assert!(!desired.reconciles_with(&other));
    }

    #[tokio::test]
    async fn test_mock_deploy_is_idempotent() {
        let runtime = MockRuntime::new();
        let spec = base_spec("api");

        let id1 = runtime.deploy_container(&spec).await.unwrap();
        let id2 = runtime.deploy_container(&spec).await.unwrap();
        assert_eq!(id1, id2);

        let events = runtime.events().await;
        assert_eq!(
            events.iter().filter(|e| e.starts_with("create:")).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_mock_deploy_replaces_on_diff() {
        let runtime = MockRuntime::new();
        let mut spec = base_spec("api");
        spec.env.insert("A".to_string(), "1".to_string());

        let id1 = runtime.deploy_container(&spec).await.unwrap();

        spec.env.insert("A".to_string(), "2".to_string());
        let id2 = runtime.deploy_container(&spec).await.unwrap();
        assert_ne!(id1, id2);

        let events = runtime.events().await;
        let replay: Vec<&str> = events.iter().map(String::as_str).collect();
        assert_eq!(
            replay,
            vec![
                "create:api",
                "start:api",
                "stop:api",
                "remove:api",
                "create:api",
                "start:api"
            ]
        );
        assert_eq!(
            runtime.container_spec("api").await.unwrap().env.get("A"),
            Some(&"2".to_string())
        );
    }

    #[tokio::test]
    async fn test_mock_stop_and_remove_are_idempotent() {
        let runtime = MockRuntime::new();
        runtime
            .stop_container("ghost", Duration::from_secs(1))
            .await
            .unwrap();
        runtime.remove_container("ghost").await.unwrap();
    }

    #[tokio::test]
    async fn test_mock_attach_requires_running() {
        let runtime = MockRuntime::new();
        let spec = base_spec("api");
        let id = runtime.deploy_container(&spec).await.unwrap();

        runtime.set_running(&id, false).await;
        assert!(matches!(
            runtime.attach_container(&id).await,
            Err(RuntimeError::NotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_attach_pipes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let runtime = MockRuntime::new();
        let id = runtime.deploy_container(&base_spec("api")).await.unwrap();

        let (mut stdin, mut stdout) = runtime.attach_container(&id).await.unwrap();
        let mut io = runtime.take_io("api").await.unwrap();

        stdin.write_all(b"hello\n").await.unwrap();
        let mut buf = [0u8; 6];
        io.stdin.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\n");

        io.stdout.write_all(b"world\n").await.unwrap();
        let mut buf = [0u8; 6];
        stdout.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"world\n");
    }

    #[tokio::test]
    async fn test_mock_list_filters_by_label() {
        let runtime = MockRuntime::new();
        let mut spec = base_spec("api");
        spec.labels
            .insert("toolhive".to_string(), "true".to_string());
        runtime.deploy_container(&spec).await.unwrap();
        runtime.deploy_container(&base_spec("other")).await.unwrap();

        let listed = runtime
            .list_containers(&[("toolhive", "true")])
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "api");
    }
}
