//! User-visible transient notifications
//!
//! The orchestrator never waits on a notification; rendering belongs to the
//! host. The headless runner logs them.

use std::time::Duration;

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Success,
    Info,
    Warning,
    Error,
}

/// A titled toast with a display duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub severity: Severity,
    pub duration: Duration,
}

impl Notification {
    pub fn new(title: impl Into<String>, severity: Severity, duration: Duration) -> Self {
        Self {
            title: title.into(),
            severity,
            duration,
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(title, Severity::Success, Duration::from_millis(2000))
    }

    pub fn error(title: impl Into<String>) -> Self {
        Self::new(title, Severity::Error, Duration::from_millis(2000))
    }

    pub fn warning(title: impl Into<String>) -> Self {
        Self::new(title, Severity::Warning, Duration::from_millis(5000))
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        let duration_ms = n.duration.as_millis() as u64;
        match n.severity {
            Severity::Success | Severity::Info => info!(title = %n.title, duration_ms, "notification"),
            Severity::Warning => warn!(title = %n.title, duration_ms, "notification"),
            Severity::Error => error!(title = %n.title, duration_ms, "notification"),
        }
    }
}
