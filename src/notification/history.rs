//! Durable notification history - SQLite-backed append-and-query log
//!
//! Every delivered event is persisted as a [`NotificationRecord`]. Records
//! are immutable except for the `read`/`acknowledged` flags; deletion happens
//! only through age-based pruning or bulk clear.

use super::event::Event;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT NOT NULL,
        service_name TEXT NOT NULL,
        message TEXT NOT NULL,
        severity TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        read INTEGER DEFAULT 0,
        acknowledged INTEGER DEFAULT 0,
        metadata TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_service_name ON notifications(service_name);
    CREATE INDEX IF NOT EXISTS idx_timestamp ON notifications(timestamp DESC);
    CREATE INDEX IF NOT EXISTS idx_read ON notifications(read);
    CREATE INDEX IF NOT EXISTS idx_severity ON notifications(severity);
";

const RECORD_COLUMNS: &str =
    "id, type, service_name, message, severity, timestamp, read, acknowledged, metadata";

/// A persisted notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub service_name: String,
    pub message: String,
    pub severity: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    pub acknowledged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Aggregate counts over the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStats {
    pub total: i64,
    pub unread: i64,
    pub critical: i64,
}

/// SQLite-backed notification history.
///
/// The connection lives behind a mutex; all calls are short and run off the
/// monitor's hot path, so contention is not a concern.
pub struct HistoryStore {
    conn: Mutex<Connection>,
}

impl HistoryStore {
    /// Default location: `~/.config/devstack-monitor/history.db`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("failed to locate home directory")?;
        Ok(home
            .join(".config")
            .join("devstack-monitor")
            .join("history.db"))
    }

    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create history directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to open history database: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;
        Self::from_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to initialize history schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Persist one event.
    pub fn save(&self, event: &Event) -> Result<()> {
        let metadata = if event.metadata.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&event.metadata)?)
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (type, service_name, message, severity, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                event.event_type.as_str(),
                event.service_name,
                event.message,
                event.severity,
                event.timestamp.to_rfc3339(),
                metadata,
            ],
        )
        .context("failed to save notification")?;
        Ok(())
    }

    /// Most recent notifications, newest first.
    pub fn get_recent(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM notifications ORDER BY timestamp DESC LIMIT ?1"
        ))?;
        let rows = stmt.query_map([limit as i64], scan_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read notifications")
    }

    /// Notifications for one service, newest first.
    pub fn get_by_service(&self, service_name: &str, limit: usize) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM notifications
             WHERE service_name = ?1 ORDER BY timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(rusqlite::params![service_name, limit as i64], scan_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read notifications")
    }

    pub fn get_unread(&self) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM notifications WHERE read = 0 ORDER BY timestamp DESC"
        ))?;
        let rows = stmt.query_map([], scan_record)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read notifications")
    }

    pub fn mark_as_read(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id])
            .context("failed to mark notification as read")?;
        Ok(())
    }

    pub fn mark_all_as_read(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("UPDATE notifications SET read = 1 WHERE read = 0", [])
            .context("failed to mark notifications as read")?;
        Ok(())
    }

    pub fn clear_all(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM notifications", [])
            .context("failed to clear notifications")?;
        Ok(())
    }

    /// Delete notifications older than the given age.
    pub fn clear_old(&self, older_than: Duration) -> Result<()> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).context("retention duration out of range")?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM notifications WHERE timestamp < ?1",
            [cutoff.to_rfc3339()],
        )
        .context("failed to prune notifications")?;
        Ok(())
    }

    pub fn stats(&self) -> Result<HistoryStats> {
        let conn = self.conn.lock().unwrap();
        let total = conn.query_row("SELECT COUNT(*) FROM notifications", [], |r| r.get(0))?;
        let unread = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE read = 0",
            [],
            |r| r.get(0),
        )?;
        let critical = conn.query_row(
            "SELECT COUNT(*) FROM notifications WHERE severity = 'critical'",
            [],
            |r| r.get(0),
        )?;
        Ok(HistoryStats {
            total,
            unread,
            critical,
        })
    }
}

fn scan_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<NotificationRecord> {
    let timestamp: String = row.get(5)?;
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let metadata: Option<String> = row.get(8)?;
    let metadata = match metadata {
        Some(raw) if !raw.is_empty() => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
        })?),
        _ => None,
    };

    Ok(NotificationRecord {
        id: row.get(0)?,
        event_type: row.get(1)?,
        service_name: row.get(2)?,
        message: row.get(3)?,
        severity: row.get(4)?,
        timestamp,
        read: row.get::<_, i64>(6)? == 1,
        acknowledged: row.get::<_, i64>(7)? == 1,
        metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::event::EventType;

    fn event(service: &str, severity: &str, message: &str) -> Event {
        Event::new(EventType::ServiceStateChange, service, message, severity)
    }

    #[test]
    fn test_save_and_get_recent() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.save(&event("api", "critical", "crashed")).unwrap();
        store.save(&event("web", "info", "started")).unwrap();

        let records = store.get_recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.read && !r.acknowledged));
        assert!(records[0].id > 0);
    }

    #[test]
    fn test_get_recent_is_newest_first_and_limited() {
        let store = HistoryStore::open_in_memory().unwrap();
        for i in 0..5 {
            let mut e = event("api", "info", &format!("event {}", i));
            e.timestamp = Utc::now() + chrono::Duration::seconds(i);
            store.save(&e).unwrap();
        }

        let records = store.get_recent(3).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].message, "event 4");
        assert_eq!(records[2].message, "event 2");
    }

    #[test]
    fn test_get_by_service() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.save(&event("api", "critical", "crashed")).unwrap();
        store.save(&event("web", "info", "started")).unwrap();
        store.save(&event("api", "info", "recovered")).unwrap();

        let records = store.get_by_service("api", 10).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.service_name == "api"));
    }

    #[test]
    fn test_mark_as_read() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.save(&event("api", "critical", "crashed")).unwrap();
        store.save(&event("web", "info", "started")).unwrap();

        let unread = store.get_unread().unwrap();
        assert_eq!(unread.len(), 2);

        store.mark_as_read(unread[0].id).unwrap();
        assert_eq!(store.get_unread().unwrap().len(), 1);

        store.mark_all_as_read().unwrap();
        assert!(store.get_unread().unwrap().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.save(&event("api", "critical", "crashed")).unwrap();
        store.clear_all().unwrap();
        assert!(store.get_recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_clear_old_keeps_recent_records() {
        let store = HistoryStore::open_in_memory().unwrap();

        let mut old = event("api", "info", "old");
        old.timestamp = Utc::now() - chrono::Duration::days(30);
        store.save(&old).unwrap();
        store.save(&event("api", "info", "fresh")).unwrap();

        store.clear_old(Duration::from_secs(7 * 24 * 3600)).unwrap();

        let records = store.get_recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, "fresh");
    }

    #[test]
    fn test_stats() {
        let store = HistoryStore::open_in_memory().unwrap();
        store.save(&event("api", "critical", "crashed")).unwrap();
        store.save(&event("api", "warning", "slow")).unwrap();
        store.save(&event("web", "info", "started")).unwrap();

        let first = store.get_recent(10).unwrap().pop().unwrap();
        store.mark_as_read(first.id).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.unread, 2);
        assert_eq!(stats.critical, 1);
    }

    #[test]
    fn test_metadata_round_trip() {
        let store = HistoryStore::open_in_memory().unwrap();
        let e = event("api", "critical", "crashed")
            .with_metadata("pid", serde_json::json!(4242))
            .with_metadata("port", serde_json::json!(8080));
        store.save(&e).unwrap();

        let records = store.get_recent(1).unwrap();
        let metadata = records[0].metadata.as_ref().unwrap();
        assert_eq!(metadata["pid"], serde_json::json!(4242));
        assert_eq!(metadata["port"], serde_json::json!(8080));
    }
}
