//! Process-wide workload registry
//!
//! The index of active supervisors, keyed by workload name. External
//! commands (stop, rm, logs) resolve their target here: an exact name
//! match wins; otherwise a unique main-container-id prefix is accepted,
//! and ambiguity is an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use crate::error::{Result, WorkloadError};
use crate::supervisor::WorkloadSupervisor;

static GLOBAL_REGISTRY: OnceLock<WorkloadRegistry> = OnceLock::new();

/// Registry of active workload supervisors
#[derive(Default)]
pub struct WorkloadRegistry {
    workloads: Mutex<HashMap<String, Arc<WorkloadSupervisor>>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry instance
    pub fn global() -> &'static WorkloadRegistry {
        GLOBAL_REGISTRY.get_or_init(WorkloadRegistry::new)
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<WorkloadSupervisor>>> {
        self.workloads.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a supervisor under its workload name.
    pub fn register(&self, supervisor: Arc<WorkloadSupervisor>) -> Result<()> {
        let mut workloads = self.guard();
        let name = supervisor.name().to_string();
        if workloads.contains_key(&name) {
            return Err(WorkloadError::AlreadyExists(name));
        }
        workloads.insert(name, supervisor);
        Ok(())
    }

    /// Look up a supervisor by exact workload name.
    pub fn lookup(&self, name: &str) -> Option<Arc<WorkloadSupervisor>> {
        self.guard().get(name).cloned()
    }

    /// All registered supervisors.
    pub fn list(&self) -> Vec<Arc<WorkloadSupervisor>> {
        self.guard().values().cloned().collect()
    }

    /// Remove a workload from the index. Returns the supervisor if it was
    /// registered.
    pub fn unregister(&self, name: &str) -> Option<Arc<WorkloadSupervisor>> {
        self.guard().remove(name)
    }

    /// Resolve a name or main-container-id prefix to a supervisor.
    pub async fn resolve(&self, query: &str) -> Result<Arc<WorkloadSupervisor>> {
        if let Some(supervisor) = self.lookup(query) {
            return Ok(supervisor);
        }

        let candidates = self.list();
        let mut matches = Vec::new();
        for supervisor in candidates {
            if let Some(id) = supervisor.main_container_id().await {
                if id.starts_with(query) {
                    matches.push(supervisor);
                }
            }
        }

        match matches.len() {
            0 => Err(WorkloadError::NotFound(query.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(WorkloadError::Ambiguous {
                query: query.to_string(),
                matches: matches
                    .iter()
                    .map(|s| s.name().to_string())
                    .collect(),
            }),
        }
    }
}
