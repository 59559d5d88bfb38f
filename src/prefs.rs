//! Notification preferences - validated, persisted delivery policy
//!
//! A single instance is constructed at startup (from
//! `~/.config/devstack-monitor/notifications.json`, falling back to defaults
//! when the file is absent) and shared read-mostly across handlers behind an
//! `Arc<RwLock<_>>`. Saves are atomic: write to a temp file, then rename.

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_RATE_LIMIT_WINDOW: &str = "5m";
const VALID_SEVERITY_FILTERS: [&str; 4] = ["critical", "warning", "info", "all"];

/// A time-of-day range during which OS notifications are suppressed.
/// Ranges may cross midnight (e.g. 22:00 to 08:00).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHourRange {
    /// "HH:MM", 24-hour
    pub start: String,
    /// "HH:MM", 24-hour
    pub end: String,
}

/// Per-service notification preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNotificationSettings {
    pub enabled: bool,
}

/// User preferences for the notification system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NotificationPreferences {
    /// Whether OS-level notifications are enabled at all.
    pub os_notifications: bool,

    /// Whether in-dashboard toast notifications are enabled.
    pub dashboard_notifications: bool,

    /// Minimum-severity gate: "critical", "warning", "info", or "all".
    pub severity_filter: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub quiet_hours: Vec<QuietHourRange>,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub service_settings: HashMap<String, ServiceNotificationSettings>,

    /// Deduplication window as a duration string ("5m", "10s", "1h30m").
    pub rate_limit_window: String,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        Self {
            os_notifications: true,
            dashboard_notifications: true,
            // Only critical by default for OS notifications
            severity_filter: "critical".to_string(),
            quiet_hours: Vec::new(),
            service_settings: HashMap::new(),
            rate_limit_window: DEFAULT_RATE_LIMIT_WINDOW.to_string(),
        }
    }
}

impl NotificationPreferences {
    /// Path of the preferences file: `~/.config/devstack-monitor/notifications.json`.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("failed to locate home directory")?;
        Ok(home
            .join(".config")
            .join("devstack-monitor")
            .join("notifications.json"))
    }

    /// Load preferences from the default path. A missing file yields
    /// defaults; a file that fails to parse or validate is an error (callers
    /// fall back to defaults rather than crashing).
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read notification preferences: {}", path.display()))?;
        let mut prefs: NotificationPreferences =
            serde_json::from_str(&data).context("failed to parse notification preferences")?;
        prefs.apply_defaults();
        prefs.validate().context("invalid notification preferences")?;
        Ok(prefs)
    }

    /// Validate then persist atomically (temp file, then rename).
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config directory: {}", parent.display()))?;
        }

        let data = serde_json::to_string_pretty(self)
            .context("failed to serialize notification preferences")?;

        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .with_context(|| format!("failed to write temp preferences file: {}", tmp_path.display()))?;
        if let Err(e) = fs::rename(&tmp_path, path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e).context("failed to save notification preferences");
        }
        Ok(())
    }

    /// Check every invariant: known severity filter, parseable positive
    /// rate-limit window, HH:MM quiet-hour boundaries.
    pub fn validate(&self) -> Result<()> {
        if !VALID_SEVERITY_FILTERS.contains(&self.severity_filter.as_str()) {
            bail!(
                "invalid severity filter: {} (must be critical, warning, info, or all)",
                self.severity_filter
            );
        }

        if !self.rate_limit_window.is_empty() {
            let window = parse_duration(&self.rate_limit_window).with_context(|| {
                format!(
                    "invalid rate limit window: {} (use a format like '5m' or '10s')",
                    self.rate_limit_window
                )
            })?;
            if window.is_zero() {
                bail!("rate limit window must be positive");
            }
        }

        for (i, range) in self.quiet_hours.iter().enumerate() {
            if parse_hhmm(&range.start).is_none() {
                bail!(
                    "invalid quiet hours start time at index {}: {} (use HH:MM)",
                    i,
                    range.start
                );
            }
            if parse_hhmm(&range.end).is_none() {
                bail!(
                    "invalid quiet hours end time at index {}: {} (use HH:MM)",
                    i,
                    range.end
                );
            }
        }

        Ok(())
    }

    /// Fill in anything a hand-edited file left empty.
    pub fn apply_defaults(&mut self) {
        if self.severity_filter.is_empty() {
            self.severity_filter = "critical".to_string();
        }
        if self.rate_limit_window.is_empty() {
            self.rate_limit_window = DEFAULT_RATE_LIMIT_WINDOW.to_string();
        }
    }

    /// Services with no explicit settings default to enabled.
    pub fn is_service_enabled(&self, service_name: &str) -> bool {
        self.service_settings
            .get(service_name)
            .map_or(true, |s| s.enabled)
    }

    pub fn set_service_enabled(&mut self, service_name: impl Into<String>, enabled: bool) {
        self.service_settings
            .insert(service_name.into(), ServiceNotificationSettings { enabled });
    }

    /// Whether the current wall-clock time falls inside any quiet-hour range.
    pub fn is_in_quiet_hours(&self) -> bool {
        self.is_in_quiet_hours_at(Local::now().time())
    }

    pub fn is_in_quiet_hours_at(&self, now: NaiveTime) -> bool {
        self.quiet_hours.iter().any(|range| {
            match (parse_hhmm(&range.start), parse_hhmm(&range.end)) {
                (Some(start), Some(end)) => time_in_range(now, start, end),
                _ => false,
            }
        })
    }

    /// Full delivery gate for the OS channel: per-service enablement, quiet
    /// hours, then the minimum-severity filter.
    pub fn should_notify(&self, service_name: &str, severity: &str) -> bool {
        if !self.is_service_enabled(service_name) {
            return false;
        }
        if self.is_in_quiet_hours() {
            return false;
        }
        self.severity_passes_filter(severity)
    }

    pub fn severity_passes_filter(&self, severity: &str) -> bool {
        match self.severity_filter.as_str() {
            "critical" => severity == "critical",
            "warning" => severity == "critical" || severity == "warning",
            "info" => severity == "critical" || severity == "warning" || severity == "info",
            "all" => true,
            _ => severity == "critical",
        }
    }

    /// Parsed rate-limit window, falling back to five minutes.
    pub fn rate_limit_duration(&self) -> Duration {
        parse_duration(&self.rate_limit_window).unwrap_or(Duration::from_secs(5 * 60))
    }
}

fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// `true` when `now` is in `[start, end)`, handling ranges that cross
/// midnight (e.g. 23:00 to 01:00).
fn time_in_range(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        now >= start && now < end
    } else {
        now >= start || now < end
    }
}

/// Parse compact duration strings ("300ms", "10s", "5m", "1h30m").
/// Units: ns, us, ms, s, m, h; segments accumulate.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_end);
        let value: f64 = number
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid duration: {}", s))?;

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => bail!("invalid duration unit in: {}", s),
        };

        let segment = Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|_| anyhow::anyhow!("invalid duration: {}", s))?;
        total = total
            .checked_add(segment)
            .ok_or_else(|| anyhow::anyhow!("invalid duration: {}", s))?;
        rest = next;
    }
    Ok(total)
}
