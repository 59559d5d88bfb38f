//! State monitor - turns noisy polled service snapshots into a sparse,
//! deduplicated stream of meaningful transitions
//!
//! Every tick the monitor captures a fresh [`ServiceState`] for each
//! registered service (re-probing PID liveness and port binding itself),
//! diffs it against the last observed state, classifies the change through a
//! fixed-priority rule list, and fans accepted transitions out to listeners.
//! Non-critical repeats within the rate-limit window are suppressed; critical
//! transitions always go through.

use crate::probe::{PortProbe, ProcessProbe, SystemProcessProbe, TcpPortProbe};
use crate::registry::{HealthStatus, ServiceEntry, ServiceRegistry, ServiceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Severity of a state transition. Total order: Info < Warning < Critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub const ALL: [Severity; 3] = [Severity::Info, Severity::Warning, Severity::Critical];
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Immutable snapshot of one service at a point in time.
///
/// `port_listens` and `pid_valid` are re-probed fresh on capture, not taken
/// from the registry's cached fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceState {
    pub name: String,
    pub status: ServiceStatus,
    pub health: HealthStatus,
    pub pid: u32,
    pub port: u16,
    pub port_listens: bool,
    pub pid_valid: bool,
    pub timestamp: DateTime<Utc>,
}

/// A detected, classified change between two consecutive observed states.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub service_name: String,
    pub from_state: ServiceState,
    pub to_state: ServiceState,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Callback invoked for every accepted transition. Each invocation runs on
/// its own task; panics are caught and logged.
pub type StateListener = Arc<dyn Fn(StateTransition) + Send + Sync>;

/// State monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Polling interval.
    pub interval: Duration,
    /// Maximum transitions retained in history.
    pub max_history: usize,
    /// Suppression window for repeated non-critical transitions.
    pub rate_limit_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_history: 1000,
            rate_limit_window: Duration::from_secs(5 * 60),
        }
    }
}

/// A start has to take longer than this, between two consecutive observations
/// both in `starting`, before the slow-start warning fires.
const SLOW_START_THRESHOLD: Duration = Duration::from_secs(30);

struct MonitorState {
    previous_states: HashMap<String, ServiceState>,
    state_history: Vec<StateTransition>,
}

/// Monitors service state changes and detects transitions.
pub struct StateMonitor {
    registry: Arc<ServiceRegistry>,
    process_probe: Arc<dyn ProcessProbe>,
    port_probe: Arc<dyn PortProbe>,
    interval: Duration,
    max_history: usize,
    rate_limit_window: Duration,
    // previous_states and state_history share one lock; the rate-limit map
    // has its own so unrelated operations do not serialize on it.
    inner: Mutex<MonitorState>,
    last_notify_time: Mutex<HashMap<String, DateTime<Utc>>>,
    listeners: RwLock<Vec<StateListener>>,
    shutdown: watch::Sender<bool>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl StateMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, config: MonitorConfig) -> Self {
        Self::with_probes(
            registry,
            config,
            Arc::new(SystemProcessProbe::new()),
            Arc::new(TcpPortProbe),
        )
    }

    /// Construct with injected probes. The monitor only depends on the probe
    /// traits; tests substitute deterministic implementations here.
    pub fn with_probes(
        registry: Arc<ServiceRegistry>,
        config: MonitorConfig,
        process_probe: Arc<dyn ProcessProbe>,
        port_probe: Arc<dyn PortProbe>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry,
            process_probe,
            port_probe,
            interval: config.interval,
            max_history: config.max_history.max(1),
            rate_limit_window: config.rate_limit_window,
            inner: Mutex::new(MonitorState {
                previous_states: HashMap::new(),
                state_history: Vec::new(),
            }),
            last_notify_time: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            shutdown,
            poll_task: Mutex::new(None),
        }
    }

    /// Begin polling on a dedicated background task. Calling `start` on an
    /// already-running monitor has no effect.
    pub fn start(self: Arc<Self>) {
        let mut task = self.poll_task.lock().unwrap();
        if task.is_some() {
            return;
        }

        let monitor = Arc::clone(&self);
        let mut shutdown_rx = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => monitor.check_now(),
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        }));
    }

    /// Cancel the polling loop and wait for the in-flight tick, if any, to
    /// complete. Safe to call multiple times.
    pub async fn stop(&self) {
        let _ = self.shutdown.send(true);
        let task = self.poll_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Register a listener for accepted transitions.
    pub fn add_listener(&self, listener: StateListener) {
        self.listeners.write().unwrap().push(listener);
    }

    /// Transition history, most recent last. Returns copies; never more than
    /// `max_history` entries.
    pub fn get_history(&self) -> Vec<StateTransition> {
        self.inner.lock().unwrap().state_history.clone()
    }

    /// Last observed state of a service, if it has been polled at least once.
    pub fn get_current_state(&self, service_name: &str) -> Option<ServiceState> {
        self.inner
            .lock()
            .unwrap()
            .previous_states
            .get(service_name)
            .cloned()
    }

    /// Run one poll cycle over every registered service. The background loop
    /// calls this on each tick; tests call it directly.
    pub fn check_now(&self) {
        for entry in self.registry.list_all() {
            let state = self.capture_state(&entry);
            self.detect_transition(state);
        }
    }

    /// Capture a fresh snapshot, re-probing PID and port independently of
    /// whatever the registry has cached.
    fn capture_state(&self, entry: &ServiceEntry) -> ServiceState {
        let pid_valid = entry.pid > 0 && self.process_probe.is_running(entry.pid);
        let port_listens = entry.port > 0 && self.port_probe.is_listening(entry.port);
        ServiceState {
            name: entry.name.clone(),
            status: entry.status,
            health: entry.health,
            pid: entry.pid,
            port: entry.port,
            port_listens,
            pid_valid,
            timestamp: Utc::now(),
        }
    }

    fn detect_transition(&self, current: ServiceState) {
        // State bookkeeping happens under the lock; listener dispatch does not.
        if let Some(transition) = self.process_state_update(current) {
            self.notify_listeners(transition);
        }
    }

    /// Diff against the previous state, classify, rate-limit, and record.
    /// Returns the transition to notify about, if any.
    fn process_state_update(&self, current: ServiceState) -> Option<StateTransition> {
        let mut inner = self.inner.lock().unwrap();

        let previous = match inner.previous_states.get(&current.name) {
            Some(prev) => prev.clone(),
            None => {
                // First observation only seeds the baseline.
                inner.previous_states.insert(current.name.clone(), current);
                return None;
            }
        };

        let transition = match Self::evaluate_transition(&previous, &current) {
            Some(t) => t,
            None => {
                inner.previous_states.insert(current.name.clone(), current);
                return None;
            }
        };

        if self.should_rate_limit(&current.name, transition.severity) {
            debug!(
                service = %current.name,
                severity = %transition.severity,
                "suppressing transition inside rate-limit window"
            );
            inner.previous_states.insert(current.name.clone(), current);
            return None;
        }

        Self::push_history(&mut inner.state_history, transition.clone(), self.max_history);
        inner.previous_states.insert(current.name.clone(), current);
        drop(inner);

        self.record_notified(&transition.service_name);
        Some(transition)
    }

    /// Classify a state change. Rules are checked in fixed priority order so
    /// at most one transition is derived per poll per service.
    fn evaluate_transition(prev: &ServiceState, curr: &ServiceState) -> Option<StateTransition> {
        let make = |severity: Severity, description: String| StateTransition {
            service_name: curr.name.clone(),
            from_state: prev.clone(),
            to_state: curr.clone(),
            severity,
            description,
            timestamp: curr.timestamp,
            acknowledged: false,
        };

        // Process crashed
        if prev.pid_valid && !curr.pid_valid && curr.pid > 0 {
            return Some(make(
                Severity::Critical,
                format!("Process crashed - PID {} no longer exists", prev.pid),
            ));
        }

        // Status changed to error
        if prev.status != ServiceStatus::Error && curr.status == ServiceStatus::Error {
            return Some(make(
                Severity::Critical,
                "Service entered error state".to_string(),
            ));
        }

        // Health degraded
        if prev.health == HealthStatus::Healthy && curr.health == HealthStatus::Unhealthy {
            return Some(make(
                Severity::Critical,
                "Health check failure - service became unhealthy".to_string(),
            ));
        }

        // Port stopped listening
        if prev.port_listens && !curr.port_listens && curr.port > 0 {
            return Some(make(
                Severity::Critical,
                format!("Port {} no longer listening", curr.port),
            ));
        }

        // Service taking long to start. Elapsed time is measured between the
        // two consecutive observations, not since the service first entered
        // "starting".
        if prev.status == ServiceStatus::Starting && curr.status == ServiceStatus::Starting {
            let elapsed = curr.timestamp - prev.timestamp;
            let elapsed_secs = elapsed.num_milliseconds() as f64 / 1000.0;
            if elapsed_secs > SLOW_START_THRESHOLD.as_secs_f64() {
                return Some(make(
                    Severity::Warning,
                    format!(
                        "Service taking longer than expected to start ({:.0}s)",
                        elapsed_secs
                    ),
                ));
            }
        }

        // Service became healthy
        if prev.health != HealthStatus::Healthy && curr.health == HealthStatus::Healthy {
            return Some(make(Severity::Info, "Service became healthy".to_string()));
        }

        // Service started successfully
        if matches!(prev.status, ServiceStatus::Starting | ServiceStatus::Stopped)
            && matches!(curr.status, ServiceStatus::Running | ServiceStatus::Ready)
        {
            return Some(make(
                Severity::Info,
                "Service started successfully".to_string(),
            ));
        }

        None
    }

    /// Critical transitions are never rate limited. Everything else is
    /// suppressed when the same service+severity was notified inside the
    /// window.
    fn should_rate_limit(&self, service_name: &str, severity: Severity) -> bool {
        if severity == Severity::Critical {
            return false;
        }

        let last_notify = self.last_notify_time.lock().unwrap();
        let key = format!("{}:{}", service_name, severity);
        match last_notify.get(&key) {
            Some(last) => {
                let elapsed = Utc::now() - *last;
                elapsed.to_std().map_or(false, |e| e < self.rate_limit_window)
            }
            None => false,
        }
    }

    /// Stamp all three severities for the service so a burst of
    /// mixed-severity noise from one flapping service stays suppressed.
    fn record_notified(&self, service_name: &str) {
        let now = Utc::now();
        let mut last_notify = self.last_notify_time.lock().unwrap();
        for severity in Severity::ALL {
            last_notify.insert(format!("{}:{}", service_name, severity), now);
        }
    }

    fn push_history(history: &mut Vec<StateTransition>, transition: StateTransition, max: usize) {
        history.push(transition);
        if history.len() > max {
            let excess = history.len() - max;
            history.drain(..excess);
        }
    }

    /// Dispatch to all listeners, each on its own task. A slow or panicking
    /// listener cannot block polling or the other listeners.
    fn notify_listeners(&self, transition: StateTransition) {
        let listeners = self.listeners.read().unwrap().clone();
        for listener in listeners {
            let transition = transition.clone();
            tokio::spawn(async move {
                let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(transition)));
                if let Err(panic) = result {
                    error!(panic = %panic_message(&panic), "state listener panicked");
                }
            });
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn state(name: &str, status: ServiceStatus, health: HealthStatus) -> ServiceState {
        ServiceState {
            name: name.to_string(),
            status,
            health,
            pid: 100,
            port: 8080,
            port_listens: true,
            pid_valid: true,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_process_crash_is_critical() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.pid_valid = false;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Critical);
        assert_eq!(t.description, "Process crashed - PID 100 no longer exists");
    }

    #[test]
    fn test_no_crash_when_pid_is_zero() {
        let mut prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        prev.pid = 0;
        prev.pid_valid = true;
        let mut curr = prev.clone();
        curr.pid_valid = false;

        // pid=0 means nothing was ever running; the crash rule must not fire
        let t = StateMonitor::evaluate_transition(&prev, &curr);
        assert!(t.is_none());
    }

    #[test]
    fn test_error_state_is_critical() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.status = ServiceStatus::Error;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Critical);
        assert_eq!(t.description, "Service entered error state");
    }

    #[test]
    fn test_health_degraded_is_critical() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.health = HealthStatus::Unhealthy;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Critical);
        assert_eq!(
            t.description,
            "Health check failure - service became unhealthy"
        );
    }

    #[test]
    fn test_degraded_health_is_not_a_transition() {
        // healthy -> degraded does not match the unhealthy rule
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.health = HealthStatus::Degraded;

        assert!(StateMonitor::evaluate_transition(&prev, &curr).is_none());
    }

    #[test]
    fn test_port_unbound_is_critical() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.port_listens = false;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Critical);
        assert_eq!(t.description, "Port 8080 no longer listening");
    }

    #[test]
    fn test_slow_start_is_warning() {
        let mut prev = state("api", ServiceStatus::Starting, HealthStatus::Unknown);
        prev.pid_valid = false;
        prev.pid = 0;
        prev.port_listens = false;
        prev.port = 0;
        let mut curr = prev.clone();
        curr.timestamp = prev.timestamp + ChronoDuration::seconds(31);

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Warning);
        assert_eq!(
            t.description,
            "Service taking longer than expected to start (31s)"
        );
    }

    #[test]
    fn test_slow_start_below_threshold_is_silent() {
        let mut prev = state("api", ServiceStatus::Starting, HealthStatus::Unknown);
        prev.pid = 0;
        prev.pid_valid = false;
        prev.port = 0;
        prev.port_listens = false;
        let mut curr = prev.clone();
        curr.timestamp = prev.timestamp + ChronoDuration::seconds(10);

        assert!(StateMonitor::evaluate_transition(&prev, &curr).is_none());
    }

    #[test]
    fn test_recovery_is_info() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Unhealthy);
        let mut curr = prev.clone();
        curr.health = HealthStatus::Healthy;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Info);
        assert_eq!(t.description, "Service became healthy");
    }

    #[test]
    fn test_started_is_info() {
        let mut prev = state("api", ServiceStatus::Starting, HealthStatus::Unknown);
        prev.pid = 0;
        prev.pid_valid = false;
        prev.port = 0;
        prev.port_listens = false;
        let mut curr = prev.clone();
        curr.status = ServiceStatus::Running;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert_eq!(t.severity, Severity::Info);
        assert_eq!(t.description, "Service started successfully");

        let mut from_stopped = prev.clone();
        from_stopped.status = ServiceStatus::Stopped;
        let mut to_ready = curr.clone();
        to_ready.status = ServiceStatus::Ready;
        assert!(StateMonitor::evaluate_transition(&from_stopped, &to_ready).is_some());
    }

    #[test]
    fn test_rule_priority_crash_beats_error_status() {
        // When both the crash and error-status rules match, only the crash
        // transition fires.
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let mut curr = prev.clone();
        curr.pid_valid = false;
        curr.status = ServiceStatus::Error;

        let t = StateMonitor::evaluate_transition(&prev, &curr).unwrap();
        assert!(t.description.starts_with("Process crashed"));
    }

    #[test]
    fn test_unchanged_state_is_silent() {
        let prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
        let curr = prev.clone();
        assert!(StateMonitor::evaluate_transition(&prev, &curr).is_none());
    }

    #[test]
    fn test_critical_never_rate_limited() {
        let monitor = test_monitor();
        monitor.record_notified("api");
        assert!(!monitor.should_rate_limit("api", Severity::Critical));
        assert!(monitor.should_rate_limit("api", Severity::Warning));
        assert!(monitor.should_rate_limit("api", Severity::Info));
    }

    #[test]
    fn test_rate_limit_is_per_service() {
        let monitor = test_monitor();
        monitor.record_notified("api");
        assert!(monitor.should_rate_limit("api", Severity::Info));
        assert!(!monitor.should_rate_limit("worker", Severity::Info));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = Vec::new();
        for i in 0..10 {
            let mut prev = state("api", ServiceStatus::Running, HealthStatus::Healthy);
            prev.pid = i;
            let t = StateTransition {
                service_name: "api".to_string(),
                from_state: prev.clone(),
                to_state: prev,
                severity: Severity::Info,
                description: format!("t{}", i),
                timestamp: Utc::now(),
                acknowledged: false,
            };
            StateMonitor::push_history(&mut history, t, 5);
        }
        assert_eq!(history.len(), 5);
        // Most recent entries survive, oldest are evicted
        assert_eq!(history[0].description, "t5");
        assert_eq!(history[4].description, "t9");
    }

    #[test]
    fn test_slow_start_burst_dispatches_one_warning() {
        // Given: a service stuck in starting, each observation 31s after the
        // previous one
        let monitor = test_monitor();
        let mut observed = state("worker", ServiceStatus::Starting, HealthStatus::Unknown);
        observed.pid = 0;
        observed.pid_valid = false;
        observed.port = 0;
        observed.port_listens = false;
        assert!(monitor.process_state_update(observed.clone()).is_none()); // seeds

        // When: five slow-start breaches land inside the rate-limit window
        let mut dispatched = 0;
        for _ in 0..5 {
            observed.timestamp = observed.timestamp + ChronoDuration::seconds(31);
            if monitor.process_state_update(observed.clone()).is_some() {
                dispatched += 1;
            }
        }

        // Then: only the first warning goes out, and history matches
        assert_eq!(dispatched, 1);
        let history = monitor.get_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].severity, Severity::Warning);
        assert!(history[0]
            .description
            .starts_with("Service taking longer than expected to start"));
    }

    fn test_monitor() -> StateMonitor {
        struct NoProbe;
        impl crate::probe::ProcessProbe for NoProbe {
            fn is_running(&self, _pid: u32) -> bool {
                false
            }
        }
        impl crate::probe::PortProbe for NoProbe {
            fn is_listening(&self, _port: u16) -> bool {
                false
            }
        }
        StateMonitor::with_probes(
            Arc::new(ServiceRegistry::new()),
            MonitorConfig::default(),
            Arc::new(NoProbe),
            Arc::new(NoProbe),
        )
    }
}
