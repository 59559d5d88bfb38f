//! Service registry - tracks the services managed by the orchestrator
//!
//! The registry is the snapshot source consumed by the state monitor: each
//! poll tick reads the current `{status, health, pid, port}` of every tracked
//! service. Orchestration code updates it as services start, stop, and report
//! health; tests drive it directly via `update_status`/`update_health`.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Lifecycle status of a tracked service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceStatus {
    Starting,
    Ready,
    Running,
    Stopping,
    Stopped,
    Error,
    NotRunning,
    Watching,
    Building,
    Failed,
    Completed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Starting => "starting",
            ServiceStatus::Ready => "ready",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopping => "stopping",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Error => "error",
            ServiceStatus::NotRunning => "not-running",
            ServiceStatus::Watching => "watching",
            ServiceStatus::Building => "building",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Health of a tracked service as reported by its health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single tracked service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub status: ServiceStatus,
    pub health: HealthStatus,
    pub pid: u32,
    pub port: u16,
}

impl ServiceEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ServiceStatus::NotRunning,
            health: HealthStatus::Unknown,
            pid: 0,
            port: 0,
        }
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_health(mut self, health: HealthStatus) -> Self {
        self.health = health;
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

/// In-memory registry of tracked services, safe for concurrent use.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceEntry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Register a service, replacing any existing entry with the same name.
    pub fn register(&self, entry: ServiceEntry) {
        let mut services = self.services.write().unwrap();
        services.insert(entry.name.clone(), entry);
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        let mut services = self.services.write().unwrap();
        if services.remove(name).is_none() {
            bail!("service not registered: {}", name);
        }
        Ok(())
    }

    pub fn update_status(&self, name: &str, status: ServiceStatus) -> Result<()> {
        let mut services = self.services.write().unwrap();
        match services.get_mut(name) {
            Some(entry) => {
                entry.status = status;
                Ok(())
            }
            None => bail!("service not registered: {}", name),
        }
    }

    pub fn update_health(&self, name: &str, health: HealthStatus) -> Result<()> {
        let mut services = self.services.write().unwrap();
        match services.get_mut(name) {
            Some(entry) => {
                entry.health = health;
                Ok(())
            }
            None => bail!("service not registered: {}", name),
        }
    }

    /// Current entry for a service, if registered. Returns a copy.
    pub fn get(&self, name: &str) -> Option<ServiceEntry> {
        let services = self.services.read().unwrap();
        services.get(name).cloned()
    }

    /// All registered services, as copies.
    pub fn list_all(&self) -> Vec<ServiceEntry> {
        let services = self.services.read().unwrap();
        services.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
