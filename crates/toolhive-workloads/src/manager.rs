//! Workload manager: the front door for external commands
//!
//! Run, stop, remove, logs, and list, resolving targets through the
//! registry. Listing goes to the engine so it reflects reality even after
//! a process restart.

use std::sync::Arc;
use std::time::Duration;

use toolhive_core::labels;
use toolhive_core::workload::WorkloadSpec;
use toolhive_runtime::{ContainerInfo, Runtime};
use toolhive_transport::proxy::Middleware;

use crate::error::{Result, WorkloadError};
use crate::registry::WorkloadRegistry;
use crate::supervisor::{SupervisorConfig, WorkloadSupervisor};

/// Coordinates supervisors, the registry, and the engine
pub struct WorkloadManager {
    runtime: Arc<dyn Runtime>,
    registry: Arc<WorkloadRegistry>,
    config: SupervisorConfig,
}

impl WorkloadManager {
    pub fn new(runtime: Arc<dyn Runtime>, registry: Arc<WorkloadRegistry>) -> Self {
        Self {
            runtime,
            registry,
            config: SupervisorConfig::default(),
        }
    }

    /// Override supervisor tunables for every workload run by this manager.
    pub fn with_supervisor_config(mut self, config: SupervisorConfig) -> Self {
        self.config = config;
        self
    }

    /// Start a workload and register it. Fails without side effects if a
    /// workload with the name is already registered.
    pub async fn run_workload(
        &self,
        spec: WorkloadSpec,
        middlewares: Vec<Middleware>,
    ) -> Result<Arc<WorkloadSupervisor>> {
        if self.registry.lookup(&spec.name).is_some() {
            return Err(WorkloadError::AlreadyExists(spec.name));
        }

        let supervisor = Arc::new(WorkloadSupervisor::with_config(
            spec,
            self.runtime.clone(),
            middlewares,
            self.config.clone(),
        ));
        supervisor.start().await?;
        self.registry.register(supervisor.clone())?;
        Ok(supervisor)
    }

    /// Stop a workload resolved by name or id prefix.
    pub async fn stop_workload(&self, query: &str, grace: Duration) -> Result<()> {
        let supervisor = self.registry.resolve(query).await?;
        supervisor.stop(grace).await
    }

    /// Stop a workload and drop it from the registry.
    pub async fn remove_workload(&self, query: &str, grace: Duration) -> Result<()> {
        let supervisor = self.registry.resolve(query).await?;
        supervisor.stop(grace).await?;
        self.registry.unregister(supervisor.name());
        Ok(())
    }

    /// Logs of a workload's main container.
    pub async fn workload_logs(&self, query: &str, follow: bool) -> Result<String> {
        let supervisor = self.registry.resolve(query).await?;
        let Some(container_id) = supervisor.main_container_id().await else {
            return Err(WorkloadError::NotFound(query.to_string()));
        };
        Ok(self.runtime.container_logs(&container_id, follow).await?)
    }

    /// All main workload containers known to the engine.
    pub async fn list_workloads(&self) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .runtime
            .list_containers(&[
                (labels::LABEL_TOOLHIVE, "true"),
                (labels::LABEL_MAIN_WORKLOAD, "true"),
            ])
            .await?)
    }
}
