//! Poll-driven state monitor scenarios

use devstack_monitor::{
    HealthStatus, MonitorConfig, PortProbe, ProcessProbe, ServiceEntry, ServiceRegistry,
    ServiceStatus, Severity, StateMonitor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Probes whose answers the test controls.
struct FakeProbes {
    pid_alive: AtomicBool,
    port_open: AtomicBool,
}

impl FakeProbes {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            pid_alive: AtomicBool::new(true),
            port_open: AtomicBool::new(true),
        })
    }

    fn set_pid_alive(&self, alive: bool) {
        self.pid_alive.store(alive, Ordering::SeqCst);
    }

    fn set_port_open(&self, open: bool) {
        self.port_open.store(open, Ordering::SeqCst);
    }
}

impl ProcessProbe for FakeProbes {
    fn is_running(&self, _pid: u32) -> bool {
        self.pid_alive.load(Ordering::SeqCst)
    }
}

impl PortProbe for FakeProbes {
    fn is_listening(&self, _port: u16) -> bool {
        self.port_open.load(Ordering::SeqCst)
    }
}

fn monitor_with(
    registry: Arc<ServiceRegistry>,
    probes: Arc<FakeProbes>,
    rate_limit_window: Duration,
) -> StateMonitor {
    StateMonitor::with_probes(
        registry,
        MonitorConfig {
            rate_limit_window,
            ..MonitorConfig::default()
        },
        probes.clone(),
        probes,
    )
}

#[tokio::test]
async fn test_health_flip_produces_one_critical_then_one_info() {
    // Given: a healthy running service, observed once to seed the baseline
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("api")
            .with_status(ServiceStatus::Running)
            .with_health(HealthStatus::Healthy),
    );
    let probes = FakeProbes::new();
    // Tiny window so the recovery Info is not swallowed by the stamp the
    // Critical left behind.
    let monitor = monitor_with(registry.clone(), probes, Duration::from_millis(10));
    monitor.check_now();
    assert!(monitor.get_history().is_empty());

    // When: health degrades and stays degraded across several polls
    registry
        .update_health("api", HealthStatus::Unhealthy)
        .unwrap();
    monitor.check_now();
    monitor.check_now();
    monitor.check_now();

    // Then: exactly one Critical, not one per tick
    let history = monitor.get_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].severity, Severity::Critical);
    assert_eq!(
        history[0].description,
        "Health check failure - service became unhealthy"
    );

    // When: health recovers after the rate-limit window has passed
    tokio::time::sleep(Duration::from_millis(25)).await;
    registry.update_health("api", HealthStatus::Healthy).unwrap();
    monitor.check_now();

    // Then: one Info recovery transition follows the Critical
    let history = monitor.get_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].severity, Severity::Info);
    assert_eq!(history[1].description, "Service became healthy");
}

#[tokio::test]
async fn test_repeated_info_transitions_are_rate_limited() {
    // Given: a service flapping between degraded and healthy
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("worker")
            .with_status(ServiceStatus::Running)
            .with_health(HealthStatus::Degraded),
    );
    let probes = FakeProbes::new();
    let monitor = monitor_with(registry.clone(), probes, Duration::from_secs(300));
    monitor.check_now();

    // When: it recovers five times inside the rate-limit window
    for _ in 0..5 {
        registry.update_health("worker", HealthStatus::Healthy).unwrap();
        monitor.check_now();
        registry.update_health("worker", HealthStatus::Degraded).unwrap();
        monitor.check_now();
    }

    // Then: only the first recovery was dispatched
    let history = monitor.get_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].severity, Severity::Info);
}

#[tokio::test]
async fn test_critical_crashes_are_never_rate_limited() {
    // Given: a service with a live pid
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("db")
            .with_status(ServiceStatus::Running)
            .with_pid(4242),
    );
    let probes = FakeProbes::new();
    let monitor = monitor_with(registry.clone(), probes.clone(), Duration::from_secs(300));
    monitor.check_now();

    // When: the process dies, restarts, and dies again inside the window
    probes.set_pid_alive(false);
    monitor.check_now();
    probes.set_pid_alive(true);
    monitor.check_now();
    probes.set_pid_alive(false);
    monitor.check_now();

    // Then: both crashes were recorded
    let history = monitor.get_history();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|t| t.severity == Severity::Critical
            && t.description == "Process crashed - PID 4242 no longer exists"));
}

#[tokio::test]
async fn test_port_unbound_is_critical() {
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("web")
            .with_status(ServiceStatus::Running)
            .with_port(8080),
    );
    let probes = FakeProbes::new();
    let monitor = monitor_with(registry.clone(), probes.clone(), Duration::from_secs(300));
    monitor.check_now();

    probes.set_port_open(false);
    monitor.check_now();

    let history = monitor.get_history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].severity, Severity::Critical);
    assert_eq!(history[0].description, "Port 8080 no longer listening");
}

#[tokio::test]
async fn test_history_stays_bounded_with_most_recent_kept() {
    // Given: a monitor that keeps at most 3 transitions
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("db")
            .with_status(ServiceStatus::Running)
            .with_pid(4242),
    );
    let probes = FakeProbes::new();
    let monitor = StateMonitor::with_probes(
        registry.clone(),
        MonitorConfig {
            max_history: 3,
            ..MonitorConfig::default()
        },
        probes.clone(),
        probes.clone(),
    );
    monitor.check_now();

    // When: five crash transitions accumulate (critical, so none suppressed)
    for _ in 0..5 {
        probes.set_pid_alive(false);
        monitor.check_now();
        probes.set_pid_alive(true);
        monitor.check_now();
    }

    // Then: only the three most recent remain
    let history = monitor.get_history();
    assert_eq!(history.len(), 3);
    assert!(history
        .iter()
        .all(|t| t.description == "Process crashed - PID 4242 no longer exists"));
}

#[tokio::test]
async fn test_listener_receives_accepted_transitions() {
    // Given: a monitor with a channel-backed listener
    let registry = Arc::new(ServiceRegistry::new());
    registry.register(
        ServiceEntry::new("api")
            .with_status(ServiceStatus::Running)
            .with_health(HealthStatus::Healthy),
    );
    let probes = FakeProbes::new();
    let monitor = monitor_with(registry.clone(), probes, Duration::from_secs(300));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    monitor.add_listener(Arc::new(move |transition| {
        let _ = tx.send(transition);
    }));
    monitor.check_now();

    // When: a transition fires
    registry
        .update_health("api", HealthStatus::Unhealthy)
        .unwrap();
    monitor.check_now();

    // Then: the listener observes it
    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("listener should have been called")
        .expect("channel open");
    assert_eq!(received.service_name, "api");
    assert_eq!(received.severity, Severity::Critical);
}
