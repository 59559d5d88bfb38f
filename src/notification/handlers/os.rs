//! Desktop notification handler
//!
//! Bridges pipeline events to the platform notifier, applying user
//! preferences (severity filter, per-service toggles, quiet hours) and a
//! per-`service:event_type` rate limit so a flapping service does not spam
//! the desktop.

use crate::notification::event::Event;
use crate::notification::pipeline::Handler;
use crate::notify::{Notification, Notifier};
use crate::prefs::NotificationPreferences;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// How often the stale-entry sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct OsNotificationHandler {
    notifier: Arc<dyn Notifier>,
    prefs: Arc<RwLock<NotificationPreferences>>,
    last_sent: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    shutdown: watch::Sender<bool>,
}

impl OsNotificationHandler {
    /// Create the handler and spawn its background sweep task. The sweep
    /// evicts rate-limit entries older than twice the configured window so
    /// the map does not grow with every service that ever notified.
    pub fn new(
        notifier: Arc<dyn Notifier>,
        prefs: Arc<RwLock<NotificationPreferences>>,
    ) -> Arc<Self> {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handler = Arc::new(Self {
            notifier,
            prefs,
            last_sent: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        });

        let last_sent = Arc::clone(&handler.last_sent);
        let prefs = Arc::clone(&handler.prefs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let window = prefs.read().unwrap().rate_limit_duration();
                        let cutoff = Utc::now()
                            - chrono::Duration::from_std(window * 2)
                                .unwrap_or_else(|_| chrono::Duration::seconds(600));
                        last_sent.lock().unwrap().retain(|_, sent| *sent > cutoff);
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        handler
    }

    /// Stop the sweep task and release the platform notifier.
    pub fn close(&self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.notifier.close()
    }

    fn is_rate_limited(&self, key: &str, window: Duration) -> bool {
        let last_sent = self.last_sent.lock().unwrap();
        match last_sent.get(key) {
            Some(sent) => {
                let elapsed = Utc::now().signed_duration_since(*sent);
                elapsed.to_std().map(|e| e < window).unwrap_or(true)
            }
            None => false,
        }
    }

    fn record_sent(&self, key: String) {
        self.last_sent.lock().unwrap().insert(key, Utc::now());
    }
}

impl Handler for OsNotificationHandler {
    fn name(&self) -> &str {
        "os"
    }

    fn handle(&self, event: &Event) -> Result<()> {
        let (allowed, window) = {
            let prefs = self.prefs.read().unwrap();
            (
                prefs.os_notifications && prefs.should_notify(&event.service_name, &event.severity),
                prefs.rate_limit_duration(),
            )
        };
        if !allowed {
            return Ok(());
        }

        let key = format!("{}:{}", event.service_name, event.event_type);
        if self.is_rate_limited(&key, window) {
            debug!(
                service = %event.service_name,
                event_type = %event.event_type,
                "desktop notification rate limited"
            );
            return Ok(());
        }

        self.record_sent(key);
        let notification = Notification::new(
            format!("{} ({})", event.service_name, event.severity),
            &event.message,
            &event.severity,
        );
        self.notifier.send(&notification)
    }
}
