//! Pipeline event types

use crate::monitor::ServiceState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of notification event flowing through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServiceStateChange,
    ResourceUpdate,
    DeploymentComplete,
    HealthCheck,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ServiceStateChange => "service_state_change",
            EventType::ResourceUpdate => "resource_update",
            EventType::DeploymentComplete => "deployment_complete",
            EventType::HealthCheck => "health_check",
            EventType::Error => "error",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The pipeline's unit of work. One event is produced per accepted state
/// transition; other producers (deployment completion, manual test
/// notifications) publish events directly.
///
/// `old_state`/`new_state` are opaque to the pipeline itself - only handlers
/// that care about them look inside.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_state: Option<ServiceState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<ServiceState>,
    pub message: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Event {
    pub fn new(
        event_type: EventType,
        service_name: impl Into<String>,
        message: impl Into<String>,
        severity: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            service_name: service_name.into(),
            old_state: None,
            new_state: None,
            message: message.into(),
            severity: severity.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_states(mut self, old_state: ServiceState, new_state: ServiceState) -> Self {
        self.old_state = Some(old_state);
        self.new_state = Some(new_state);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
