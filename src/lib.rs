//! DevStack Monitor - state-change detection and notification delivery for
//! local development services

pub mod monitor;
pub mod notification;
pub mod notify;
pub mod prefs;
pub mod probe;
pub mod registry;

pub use monitor::{
    MonitorConfig, Severity, ServiceState, StateListener, StateMonitor, StateTransition,
};
pub use notification::{
    BroadcastFn, Event, EventType, Handler, HistoryStats, HistoryStore, ManagerConfig,
    NotificationManager, NotificationRecord, Pipeline,
};
pub use notify::{DesktopNotifier, MockNotifier, Notification, Notifier};
pub use prefs::{parse_duration, NotificationPreferences, QuietHourRange};
pub use probe::{PortProbe, ProcessProbe, SystemProcessProbe, TcpPortProbe};
pub use registry::{HealthStatus, ServiceEntry, ServiceRegistry, ServiceStatus};
