//! DevStack Monitor CLI
//!
//! Watches registered development services for state changes and delivers
//! notifications to the desktop and a persistent history.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use devstack_monitor::{
    DesktopNotifier, ManagerConfig, MonitorConfig, NotificationManager, NotificationPreferences,
    Notifier, ServiceEntry, ServiceRegistry, ServiceStatus,
};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "dsmon")]
#[command(about = "DevStack Monitor - service state-change notifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch services and deliver notifications until Ctrl+C
    Watch {
        /// Poll interval in seconds
        #[arg(long, short, default_value = "5")]
        interval: u64,
        /// Service to watch, as NAME[:PID[:PORT]] (repeatable)
        #[arg(long = "service", short)]
        services: Vec<String>,
    },
    /// Send a test notification through the full delivery path
    Test,
    /// List notification history
    List {
        /// Show at most N notifications
        #[arg(long, short, default_value = "20")]
        limit: usize,
        /// Only notifications for this service
        #[arg(long, short)]
        service: Option<String>,
        /// Only unread notifications
        #[arg(long)]
        unread: bool,
    },
    /// Mark notifications as read
    MarkRead {
        /// Notification id
        id: Option<i64>,
        /// Mark every notification as read
        #[arg(long)]
        all: bool,
    },
    /// Delete notification history
    Clear {
        /// Only delete notifications older than this (e.g. "24h", "7d" as "168h")
        #[arg(long)]
        older_than: Option<String>,
    },
    /// Show history statistics
    Stats,
    /// Show or change notification preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print current preferences
    Show,
    /// Change preferences and save
    Set {
        /// Enable or disable desktop notifications (on/off)
        #[arg(long)]
        os: Option<String>,
        /// Enable or disable dashboard notifications (on/off)
        #[arg(long)]
        dashboard: Option<String>,
        /// Minimum severity: all, info, warning, critical, none
        #[arg(long)]
        severity_filter: Option<String>,
        /// Rate limit window, e.g. "5m" or "1h"
        #[arg(long)]
        rate_limit: Option<String>,
        /// Service name for --enabled
        #[arg(long)]
        service: Option<String>,
        /// Enable or disable notifications for --service (on/off)
        #[arg(long)]
        enabled: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devstack_monitor=info,dsmon=info"));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Watch { interval, services } => watch(interval, services).await?,
        Commands::Test => {
            let manager = build_manager(MonitorConfig::default())?;
            manager.start();
            manager.send_test_notification()?;
            manager.stop().await;
            println!("Test notification sent");
        }
        Commands::List {
            limit,
            service,
            unread,
        } => list(limit, service, unread)?,
        Commands::MarkRead { id, all } => {
            let store = open_history()?;
            match (id, all) {
                (Some(id), false) => {
                    store.mark_as_read(id)?;
                    println!("Notification {} marked as read", id);
                }
                (None, true) => {
                    store.mark_all_as_read()?;
                    println!("All notifications marked as read");
                }
                _ => bail!("provide a notification id or --all"),
            }
        }
        Commands::Clear { older_than } => {
            let store = open_history()?;
            match older_than {
                Some(spec) => {
                    let age = devstack_monitor::parse_duration(&spec)
                        .with_context(|| format!("invalid duration: {}", spec))?;
                    store.clear_old(age)?;
                    println!("Cleared notifications older than {}", spec);
                }
                None => {
                    store.clear_all()?;
                    println!("Cleared all notifications");
                }
            }
        }
        Commands::Stats => {
            let store = open_history()?;
            let stats = store.stats()?;
            println!("Total:    {}", stats.total);
            println!("Unread:   {}", stats.unread);
            println!("Critical: {}", stats.critical);
        }
        Commands::Prefs { action } => prefs_command(action)?,
    }

    Ok(())
}

async fn watch(interval: u64, services: Vec<String>) -> Result<()> {
    let registry = Arc::new(ServiceRegistry::new());
    if services.is_empty() {
        info!("no services given, watching an empty registry; add them with --service");
    }
    for spec in &services {
        registry.register(parse_service_spec(spec)?);
    }

    let config = ManagerConfig {
        monitor: MonitorConfig {
            interval: Duration::from_secs(interval.max(1)),
            ..MonitorConfig::default()
        },
        ..ManagerConfig::default()
    };
    let prefs = Arc::new(RwLock::new(NotificationPreferences::load()?));
    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier::new("DevStack Monitor"));
    let manager = NotificationManager::new(registry, prefs, Some(notifier), None, config)?;
    manager.start();
    info!(interval, services = services.len(), "watching services, Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    info!("shutting down");
    manager.stop().await;
    Ok(())
}

fn build_manager(monitor: MonitorConfig) -> Result<Arc<NotificationManager>> {
    let registry = Arc::new(ServiceRegistry::new());
    let prefs = Arc::new(RwLock::new(NotificationPreferences::load()?));
    let notifier: Arc<dyn Notifier> = Arc::new(DesktopNotifier::new("DevStack Monitor"));
    NotificationManager::new(
        registry,
        prefs,
        Some(notifier),
        None,
        ManagerConfig {
            monitor,
            ..ManagerConfig::default()
        },
    )
}

/// Parse `NAME[:PID[:PORT]]` into a registry entry.
fn parse_service_spec(spec: &str) -> Result<ServiceEntry> {
    let mut parts = spec.split(':');
    let name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => bail!("invalid service spec: {}", spec),
    };
    let mut entry = ServiceEntry::new(name).with_status(ServiceStatus::Running);
    if let Some(pid) = parts.next() {
        entry = entry.with_pid(pid.parse().with_context(|| format!("invalid pid in: {}", spec))?);
    }
    if let Some(port) = parts.next() {
        entry = entry
            .with_port(port.parse().with_context(|| format!("invalid port in: {}", spec))?);
    }
    Ok(entry)
}

fn open_history() -> Result<devstack_monitor::HistoryStore> {
    let path = devstack_monitor::HistoryStore::default_path()?;
    devstack_monitor::HistoryStore::open(&path)
}

fn list(limit: usize, service: Option<String>, unread: bool) -> Result<()> {
    let store = open_history()?;
    let records = if unread {
        store.get_unread()?
    } else if let Some(service) = &service {
        store.get_by_service(service, limit)?
    } else {
        store.get_recent(limit)?
    };

    if records.is_empty() {
        println!("No notifications");
        return Ok(());
    }

    for record in &records {
        let marker = if record.read { " " } else { "*" };
        println!(
            "{} [{:>4}] {:<10} {:<8} {:<12} {}",
            marker,
            record.id,
            format_relative_time(record.timestamp),
            record.severity,
            record.service_name,
            record.message,
        );
    }
    Ok(())
}

fn prefs_command(action: PrefsAction) -> Result<()> {
    match action {
        PrefsAction::Show => {
            let prefs = NotificationPreferences::load()?;
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
        PrefsAction::Set {
            os,
            dashboard,
            severity_filter,
            rate_limit,
            service,
            enabled,
        } => {
            let mut prefs = NotificationPreferences::load()?;
            if let Some(os) = os {
                prefs.os_notifications = parse_on_off(&os)?;
            }
            if let Some(dashboard) = dashboard {
                prefs.dashboard_notifications = parse_on_off(&dashboard)?;
            }
            if let Some(filter) = severity_filter {
                prefs.severity_filter = filter;
            }
            if let Some(window) = rate_limit {
                prefs.rate_limit_window = window;
            }
            match (service, enabled) {
                (Some(service), Some(enabled)) => {
                    let enabled = parse_on_off(&enabled)?;
                    prefs.set_service_enabled(service, enabled);
                }
                (None, None) => {}
                _ => bail!("--service and --enabled must be given together"),
            }
            prefs.save()?;
            println!("Preferences saved");
        }
    }
    Ok(())
}

fn parse_on_off(value: &str) -> Result<bool> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on or off, got: {}", other),
    }
}

/// "just now", "5m ago", "3h ago", "2d ago", or the date for older entries.
fn format_relative_time(timestamp: chrono::DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(timestamp);
    if elapsed.num_seconds() < 60 {
        "just now".to_string()
    } else if elapsed.num_minutes() < 60 {
        format!("{}m ago", elapsed.num_minutes())
    } else if elapsed.num_hours() < 24 {
        format!("{}h ago", elapsed.num_hours())
    } else if elapsed.num_days() < 7 {
        format!("{}d ago", elapsed.num_days())
    } else {
        timestamp.format("%Y-%m-%d").to_string()
    }
}
