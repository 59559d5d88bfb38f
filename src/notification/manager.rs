//! Notification manager - wires the monitor, pipeline, and handlers together
//!
//! The manager owns the whole notification subsystem: it builds the pipeline,
//! registers whichever handlers the environment supports, connects the state
//! monitor's listener to the pipeline, and drives startup/shutdown in order.

use crate::monitor::{MonitorConfig, StateMonitor, StateTransition};
use crate::notification::event::{Event, EventType};
use crate::notification::handlers::{
    BroadcastFn, DashboardHandler, HistoryHandler, OsNotificationHandler,
};
use crate::notification::history::{HistoryStore, NotificationRecord};
use crate::notification::pipeline::Pipeline;
use crate::notify::Notifier;
use crate::prefs::NotificationPreferences;
use crate::registry::ServiceRegistry;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Manager-level configuration.
#[derive(Clone)]
pub struct ManagerConfig {
    pub monitor: MonitorConfig,
    /// Pipeline buffer size.
    pub buffer_size: usize,
    /// History database location. `None` uses the default path.
    pub history_path: Option<PathBuf>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            buffer_size: 100,
            history_path: None,
        }
    }
}

pub struct NotificationManager {
    pipeline: Arc<Pipeline>,
    monitor: Arc<StateMonitor>,
    prefs: Arc<RwLock<NotificationPreferences>>,
    os_handler: Option<Arc<OsNotificationHandler>>,
    history: Option<Arc<HistoryStore>>,
    started: AtomicBool,
}

impl NotificationManager {
    /// Build the subsystem. Handlers are registered only when their backing
    /// facility is usable: no desktop handler without a working notifier, no
    /// history handler if the database cannot be opened. A missing facility
    /// is degraded operation, not a construction error.
    pub fn new(
        registry: Arc<ServiceRegistry>,
        prefs: Arc<RwLock<NotificationPreferences>>,
        notifier: Option<Arc<dyn Notifier>>,
        broadcast: Option<BroadcastFn>,
        config: ManagerConfig,
    ) -> Result<Arc<Self>> {
        let pipeline = Arc::new(Pipeline::new(config.buffer_size));

        let os_handler = match notifier {
            Some(notifier) if notifier.is_available() => {
                let handler = OsNotificationHandler::new(notifier, Arc::clone(&prefs));
                pipeline.register_handler(handler.clone());
                debug!("desktop notification handler registered");
                Some(handler)
            }
            Some(_) => {
                warn!("platform notifier unavailable, desktop notifications disabled");
                None
            }
            None => None,
        };

        if let Some(broadcast) = broadcast {
            if prefs.read().unwrap().dashboard_notifications {
                pipeline.register_handler(Arc::new(DashboardHandler::new(broadcast)));
                debug!("dashboard handler registered");
            }
        }

        let history_path = match config.history_path {
            Some(path) => path,
            None => HistoryStore::default_path()?,
        };
        let history = match HistoryStore::open(&history_path) {
            Ok(store) => {
                let store = Arc::new(store);
                pipeline.register_handler(Arc::new(HistoryHandler::new(Arc::clone(&store))));
                debug!(path = %history_path.display(), "history handler registered");
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "failed to open notification history, continuing without it");
                None
            }
        };

        let monitor_config = MonitorConfig {
            rate_limit_window: prefs.read().unwrap().rate_limit_duration(),
            ..config.monitor
        };
        let monitor = Arc::new(StateMonitor::new(registry, monitor_config));

        let pipeline_for_listener = Arc::clone(&pipeline);
        monitor.add_listener(Arc::new(move |transition: StateTransition| {
            let event = transition_event(transition);
            if let Err(e) = pipeline_for_listener.publish(event) {
                warn!(error = %e, "failed to publish state transition");
            }
        }));

        Ok(Arc::new(Self {
            pipeline,
            monitor,
            prefs,
            os_handler,
            history,
            started: AtomicBool::new(false),
        }))
    }

    /// Start the pipeline dispatcher, then the monitor. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.pipeline.start();
        Arc::clone(&self.monitor).start();
        info!(
            handlers = self.pipeline.handler_count(),
            "notification manager started"
        );
    }

    /// Stop in reverse order: monitor first so no new events are produced,
    /// then the pipeline (which drains buffered events), then the handlers.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        self.monitor.stop().await;
        self.pipeline.stop().await;
        if let Some(handler) = &self.os_handler {
            if let Err(e) = handler.close() {
                warn!(error = %e, "failed to close desktop notifier");
            }
        }
        info!("notification manager stopped");
    }

    /// Publish a synthetic event to verify the delivery path end to end.
    pub fn send_test_notification(&self) -> Result<()> {
        let event = Event::new(
            EventType::ServiceStateChange,
            "test-service",
            "This is a test notification",
            "info",
        );
        self.pipeline.publish(event)
    }

    /// Whether desktop notifications can actually be delivered: the OS
    /// handler was wired at construction and the preference is on.
    pub fn is_notifications_enabled(&self) -> bool {
        self.os_handler.is_some() && self.prefs.read().unwrap().os_notifications
    }

    pub fn monitor(&self) -> &Arc<StateMonitor> {
        &self.monitor
    }

    pub fn history(&self) -> Option<&Arc<HistoryStore>> {
        self.history.as_ref()
    }

    /// Recent persisted notifications, if the history store is available.
    pub fn get_history(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        match &self.history {
            Some(store) => store.get_recent(limit),
            None => Ok(Vec::new()),
        }
    }
}

/// Convert an accepted state transition into a pipeline event.
fn transition_event(transition: StateTransition) -> Event {
    let to_state = &transition.to_state;
    let mut event = Event::new(
        EventType::ServiceStateChange,
        transition.service_name.clone(),
        transition.description.clone(),
        transition.severity.as_str(),
    )
    .with_metadata("status", serde_json::json!(to_state.status.as_str()))
    .with_metadata("health", serde_json::json!(to_state.health.as_str()));
    if to_state.pid != 0 {
        event = event.with_metadata("pid", serde_json::json!(to_state.pid));
    }
    if to_state.port != 0 {
        event = event.with_metadata("port", serde_json::json!(to_state.port));
    }
    event.timestamp = transition.timestamp;
    event.with_states(transition.from_state, transition.to_state)
}
