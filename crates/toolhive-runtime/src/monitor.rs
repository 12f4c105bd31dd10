//! Container liveness monitoring
//!
//! Watches one container and reports once, on the first observation that it
//! is gone or no longer running. The supervisor reacts to that single event
//! by tearing the workload down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};

use crate::error::{Result, RuntimeError};
use crate::runtime::Runtime;

/// Default interval between liveness probes
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Watches a container's state and reports when it exits
pub struct ContainerMonitor {
    runtime: Arc<dyn Runtime>,
    container_id: String,
    container_name: String,
    poll_interval: Duration,
    shutdown: Arc<Notify>,
    running: Arc<AtomicBool>,
}

impl ContainerMonitor {
    pub fn new(runtime: Arc<dyn Runtime>, container_id: &str, container_name: &str) -> Self {
        Self {
            runtime,
            container_id: container_id.to_string(),
            container_name: container_name.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Override the probe interval (tests use a short one)
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Start monitoring. The returned channel yields at most one event:
    /// the error describing why the container is no longer alive.
    ///
    /// Fails with `NotRunning` if the container is already down.
    pub async fn start(&self) -> Result<mpsc::Receiver<RuntimeError>> {
        if !self.runtime.is_running(&self.container_id).await? {
            return Err(RuntimeError::NotRunning {
                container: self.container_id.clone(),
            });
        }

        let (event_tx, event_rx) = mpsc::channel(1);
        self.running.store(true, Ordering::SeqCst);

        let runtime = Arc::clone(&self.runtime);
        let shutdown = Arc::clone(&self.shutdown);
        let running = Arc::clone(&self.running);
        let container_id = self.container_id.clone();
        let container_name = self.container_name.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = tokio::time::sleep(poll_interval) => {
                        match runtime.is_running(&container_id).await {
                            Ok(true) => {}
                            Ok(false) => {
                                let logs = runtime
                                    .container_logs(&container_id, false)
                                    .await
                                    .unwrap_or_default();
                                let _ = event_tx
                                    .send(RuntimeError::Exited {
                                        container: container_name.clone(),
                                        reason: format!(
                                            "container exited unexpectedly; last logs:\n{logs}"
                                        ),
                                    })
                                    .await;
                                break;
                            }
                            Err(err) if err.is_not_found() => {
                                let _ = event_tx
                                    .send(RuntimeError::Exited {
                                        container: container_name.clone(),
                                        reason: "container not found, it may have been removed"
                                            .to_string(),
                                    })
                                    .await;
                                break;
                            }
                            Err(err) => {
                                // Transient engine error; keep probing
                                tracing::debug!(
                                    container = %container_name,
                                    error = %err,
                                    "liveness probe failed, retrying"
                                );
                            }
                        }
                    }
                }
            }
            running.store(false, Ordering::SeqCst);
        });

        Ok(event_rx)
    }

    /// Stop monitoring. Idempotent.
    pub fn stop(&self) {
        // notify_one stores a permit, so a stop that lands while the loop
        // is mid-probe is not lost
        self.shutdown.notify_one();
    }

    /// Whether the monitor loop is currently alive
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
