//! OS notification boundary
//!
//! The core only depends on the [`Notifier`] trait; [`DesktopNotifier`] is
//! the command-based implementation for the current platform. Rendering and
//! permission UX belong to the OS - a send here is fire-and-forget.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::process::Command;
use tracing::debug;

/// A notification to display.
#[derive(Debug, Clone)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// "critical", "warning", or "info"
    pub severity: String,
    pub timestamp: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity: severity.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Platform notification system.
pub trait Notifier: Send + Sync {
    /// Send a notification to the OS notification system.
    fn send(&self, notification: &Notification) -> Result<()>;

    /// Whether OS notifications are available and permitted.
    fn is_available(&self) -> bool;

    /// Request notification permission from the OS.
    fn request_permission(&self) -> Result<()>;

    /// Release notification system resources.
    fn close(&self) -> Result<()>;
}

/// Desktop notifier using the platform's notification helper:
/// `osascript` on macOS, `notify-send` on Linux, a PowerShell toast on
/// Windows.
pub struct DesktopNotifier {
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }

    #[cfg(target_os = "macos")]
    fn send_platform(&self, notification: &Notification) -> Result<()> {
        // Quotes must be escaped before interpolation into AppleScript
        let escape = |s: &str| s.replace('\\', "\\\\").replace('"', "\\\"");
        let script = format!(
            "display notification \"{}\" with title \"{}\" subtitle \"{}\"",
            escape(&notification.message),
            escape(&notification.title),
            escape(&self.app_name),
        );

        let output = Command::new("osascript")
            .args(["-e", &script])
            .output()
            .context("failed to run osascript")?;
        if !output.status.success() {
            bail!(
                "osascript failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn send_platform(&self, notification: &Notification) -> Result<()> {
        let urgency = match notification.severity.as_str() {
            "critical" => "critical",
            "warning" => "normal",
            _ => "low",
        };

        let output = Command::new("notify-send")
            .args([
                "--app-name",
                &self.app_name,
                "--urgency",
                urgency,
                &notification.title,
                &notification.message,
            ])
            .output()
            .context("failed to run notify-send")?;
        if !output.status.success() {
            bail!(
                "notify-send failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    #[cfg(target_os = "windows")]
    fn send_platform(&self, notification: &Notification) -> Result<()> {
        // Single quotes double up inside PowerShell single-quoted strings
        let escape = |s: &str| s.replace('\'', "''");
        let script = format!(
            r#"
[Windows.UI.Notifications.ToastNotificationManager, Windows.UI.Notifications, ContentType = WindowsRuntime] | Out-Null
[Windows.Data.Xml.Dom.XmlDocument, Windows.Data.Xml.Dom.XmlDocument, ContentType = WindowsRuntime] | Out-Null
$template = @"
<toast>
    <visual>
        <binding template='ToastGeneric'>
            <text>{}</text>
            <text>{}</text>
            <text placement='attribution'>{}</text>
        </binding>
    </visual>
</toast>
"@
$xml = New-Object Windows.Data.Xml.Dom.XmlDocument
$xml.LoadXml($template)
$toast = New-Object Windows.UI.Notifications.ToastNotification $xml
[Windows.UI.Notifications.ToastNotificationManager]::CreateToastNotifier('{}').Show($toast)
"#,
            escape(&notification.title),
            escape(&notification.message),
            escape(&self.app_name),
            escape(&self.app_name),
        );

        let output = Command::new("powershell.exe")
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .output()
            .context("failed to run powershell")?;
        if !output.status.success() {
            bail!(
                "powershell toast failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }

    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    fn send_platform(&self, _notification: &Notification) -> Result<()> {
        bail!("OS notifications not supported on this platform");
    }

    fn helper_binary() -> &'static str {
        if cfg!(target_os = "macos") {
            "osascript"
        } else if cfg!(target_os = "windows") {
            "powershell.exe"
        } else {
            "notify-send"
        }
    }
}

impl Notifier for DesktopNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        if !self.is_available() {
            bail!("OS notifications not available");
        }
        debug!(
            title = %notification.title,
            severity = %notification.severity,
            "sending desktop notification"
        );
        self.send_platform(notification)
    }

    fn is_available(&self) -> bool {
        if cfg!(not(any(target_os = "macos", target_os = "linux", target_os = "windows"))) {
            return false;
        }
        which::which(Self::helper_binary()).is_ok()
    }

    /// The first delivered notification triggers the permission prompt on
    /// platforms that have one, so this just sends a greeting.
    fn request_permission(&self) -> Result<()> {
        self.send(&Notification::new(
            self.app_name.clone(),
            "Notifications enabled",
            "info",
        ))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Test notifier that records every send.
pub struct MockNotifier {
    pub sent: std::sync::Mutex<Vec<Notification>>,
    pub available: bool,
    pub fail_sends: bool,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
            available: true,
            fail_sends: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::new()
        }
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl Default for MockNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for MockNotifier {
    fn send(&self, notification: &Notification) -> Result<()> {
        if self.fail_sends {
            bail!("mock send failure");
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn request_permission(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
