//! Built-in pipeline handlers

pub mod dashboard;
pub mod history;
pub mod os;

pub use dashboard::{BroadcastFn, DashboardHandler};
pub use history::HistoryHandler;
pub use os::OsNotificationHandler;
