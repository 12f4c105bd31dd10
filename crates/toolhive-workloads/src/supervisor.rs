//! Workload supervision
//!
//! One supervisor owns one workload: it drives permission compilation,
//! sandbox construction, the protocol bridge, and the liveness monitor,
//! and tears everything down on failure or request. State moves forward
//! only: Starting, Running, Stopping, Stopped, with Failed reachable from
//! anywhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use toolhive_core::workload::WorkloadSpec;
use toolhive_runtime::monitor::ContainerMonitor;
use toolhive_runtime::sandbox::{Sandbox, SandboxBuilder};
use toolhive_runtime::{Runtime, RuntimeError};
use toolhive_transport::proxy::Middleware;
use toolhive_transport::StdioBridge;

use crate::error::Result;

/// Default grace period for workload shutdown
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(30);

/// Lifecycle state of a supervised workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadState {
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl std::fmt::Display for WorkloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkloadState::Starting => "starting",
            WorkloadState::Running => "running",
            WorkloadState::Stopping => "stopping",
            WorkloadState::Stopped => "stopped",
            WorkloadState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Tunables for a supervisor; tests shorten the monitor interval.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub monitor_poll_interval: Duration,
    pub stop_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            monitor_poll_interval: toolhive_runtime::monitor::DEFAULT_POLL_INTERVAL,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

/// Owns the lifecycle of one workload.
pub struct WorkloadSupervisor {
    spec: WorkloadSpec,
    runtime: Arc<dyn Runtime>,
    middlewares: Vec<Middleware>,
    config: SupervisorConfig,

    state: Mutex<WorkloadState>,
    last_error: Mutex<Option<String>>,
    // Shutdown sentinel: the first stop wins, any concurrent stop returns
    // immediately without a second teardown.
    stopping: AtomicBool,

    sandbox: AsyncMutex<Option<Sandbox>>,
    bridge: AsyncMutex<Option<StdioBridge>>,
    monitor: AsyncMutex<Option<ContainerMonitor>>,
}

impl WorkloadSupervisor {
    pub fn new(
        spec: WorkloadSpec,
        runtime: Arc<dyn Runtime>,
        middlewares: Vec<Middleware>,
    ) -> Self {
        Self::with_config(spec, runtime, middlewares, SupervisorConfig::default())
    }

    pub fn with_config(
        spec: WorkloadSpec,
        runtime: Arc<dyn Runtime>,
        middlewares: Vec<Middleware>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            spec,
            runtime,
            middlewares,
            config,
            state: Mutex::new(WorkloadState::Starting),
            last_error: Mutex::new(None),
            stopping: AtomicBool::new(false),
            sandbox: AsyncMutex::new(None),
            bridge: AsyncMutex::new(None),
            monitor: AsyncMutex::new(None),
        }
    }

    /// Workload name
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Workload spec
    pub fn spec(&self) -> &WorkloadSpec {
        &self.spec
    }

    /// Current lifecycle state
    pub fn state(&self) -> WorkloadState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Error recorded when the workload failed, if any
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Id of the main MCP container, once the sandbox exists
    pub async fn main_container_id(&self) -> Option<String> {
        self.sandbox.lock().await.as_ref().map(|s| s.main_id.clone())
    }

    /// Address the bridge is serving on, once running
    pub async fn proxy_addr(&self) -> Option<std::net::SocketAddr> {
        self.bridge
            .lock()
            .await
            .as_ref()
            .and_then(|b| b.proxy().local_addr())
    }

    fn set_state(&self, next: WorkloadState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        tracing::debug!(workload = %self.spec.name, from = %*state, to = %next, "state transition");
        *state = next;
    }

    fn fail(&self, err: &dyn std::fmt::Display) {
        *self.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(err.to_string());
        self.set_state(WorkloadState::Failed);
    }

    /// Start the workload: pull the image on miss, build the sandbox,
    /// attach the bridge, and begin liveness monitoring. Returns once the
    /// bridge is accepting connections.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if let Err(err) = self.spec.validate() {
            self.fail(&err);
            return Err(RuntimeError::from(err).into());
        }

        tracing::info!(workload = %self.spec.name, image = %self.spec.image, "starting workload");

        let image_present = match self.runtime.image_exists(&self.spec.image).await {
            Ok(present) => present,
            Err(err) => {
                self.fail(&err);
                return Err(err.into());
            }
        };
        if !image_present {
            if let Err(err) = self.runtime.pull_image(&self.spec.image).await {
                // Pull failed before anything was created: no residue
                self.fail(&err);
                return Err(err.into());
            }
        }

        let builder = SandboxBuilder::new(self.runtime.clone());
        let sandbox = match builder.build(&self.spec).await {
            Ok(sandbox) => sandbox,
            Err(err) => {
                self.fail(&err);
                return Err(err.into());
            }
        };
        let main_id = sandbox.main_id.clone();
        *self.sandbox.lock().await = Some(sandbox);

        // SSE servers speak HTTP themselves and are reached through the
        // egress-published ingress port; only stdio servers get a bridge.
        if self.spec.transport == toolhive_core::TransportType::Stdio {
            let (stdin, stdout) = match self.runtime.attach_container(&main_id).await {
                Ok(io) => io,
                Err(err) => {
                    self.fail(&err);
                    self.teardown_sandbox().await;
                    return Err(err.into());
                }
            };

            let bridge = match StdioBridge::start(
                self.spec.proxy_port,
                &self.spec.name,
                stdin,
                stdout,
                self.middlewares.clone(),
            )
            .await
            {
                Ok(bridge) => bridge,
                Err(err) => {
                    self.fail(&err);
                    self.teardown_sandbox().await;
                    return Err(err.into());
                }
            };
            *self.bridge.lock().await = Some(bridge);
        }

        let monitor = ContainerMonitor::new(self.runtime.clone(), &main_id, &self.spec.name)
            .with_poll_interval(self.config.monitor_poll_interval);
        let mut events = match monitor.start().await {
            Ok(events) => events,
            Err(err) => {
                self.fail(&err);
                self.shutdown_bridge().await;
                self.teardown_sandbox().await;
                return Err(err.into());
            }
        };
        *self.monitor.lock().await = Some(monitor);

        // Exit waiter: one monitor event means the container died out from
        // under us; convert it into a normal stop.
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            if let Some(err) = events.recv().await {
                tracing::warn!(workload = %supervisor.spec.name, error = %err, "container exited, stopping workload");
                if let Err(stop_err) = supervisor.stop(DEFAULT_STOP_GRACE).await {
                    tracing::error!(workload = %supervisor.spec.name, error = %stop_err, "failed to stop workload after exit");
                }
            }
        });

        self.set_state(WorkloadState::Running);
        tracing::info!(workload = %self.spec.name, container = %main_id, "workload is running");
        Ok(())
    }

    /// Stop the workload and tear down its sandbox. Idempotent: concurrent
    /// and repeated calls observe the sentinel and return immediately.
    pub async fn stop(&self, grace: Duration) -> Result<()> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            tracing::debug!(workload = %self.spec.name, "stop already in progress");
            return Ok(());
        }

        self.set_state(WorkloadState::Stopping);
        tracing::info!(workload = %self.spec.name, "stopping workload");

        if let Some(monitor) = self.monitor.lock().await.take() {
            monitor.stop();
        }
        self.shutdown_bridge().await;

        let builder = SandboxBuilder::new(self.runtime.clone());
        if self.sandbox.lock().await.take().is_some() {
            builder.teardown(&self.spec.name, grace).await?;
        }

        self.set_state(WorkloadState::Stopped);
        tracing::info!(workload = %self.spec.name, "workload stopped");
        Ok(())
    }

    async fn shutdown_bridge(&self) {
        if let Some(mut bridge) = self.bridge.lock().await.take() {
            bridge.stop(self.config.stop_grace).await;
        }
    }

    async fn teardown_sandbox(&self) {
        if self.sandbox.lock().await.take().is_some() {
            let builder = SandboxBuilder::new(self.runtime.clone());
            if let Err(err) = builder.teardown(&self.spec.name, self.config.stop_grace).await {
                tracing::warn!(workload = %self.spec.name, error = %err, "best-effort teardown failed");
            }
        }
    }
}
