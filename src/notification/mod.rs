//! Notification delivery subsystem
//!
//! State transitions and other events flow through a bounded [`Pipeline`]
//! to pluggable handlers: desktop notifications, dashboard broadcast, and
//! a persistent SQLite history. [`NotificationManager`] wires it all up.

pub mod event;
pub mod handlers;
pub mod history;
pub mod manager;
pub mod pipeline;

pub use event::{Event, EventType};
pub use handlers::{BroadcastFn, DashboardHandler, HistoryHandler, OsNotificationHandler};
pub use history::{HistoryStats, HistoryStore, NotificationRecord};
pub use manager::{ManagerConfig, NotificationManager};
pub use pipeline::{Handler, Pipeline};
