use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

const DEFAULT_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub at: DateTime<Utc>,
}

impl Toast {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
            at: Utc::now(),
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, description)
    }
}

/// Fire-and-forget user-visible messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}

/// Keeps the most recent toasts for display and mirrors them to the log.
pub struct ToastLog {
    entries: Mutex<VecDeque<Toast>>,
    capacity: usize,
}

impl Default for ToastLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ToastLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn latest(&self) -> Option<Toast> {
        self.entries.lock().back().cloned()
    }

    pub fn all(&self) -> Vec<Toast> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn titles(&self) -> Vec<String> {
        self.entries.lock().iter().map(|t| t.title.clone()).collect()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|t| t.severity == severity)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Notifier for ToastLog {
    fn notify(&self, toast: Toast) {
        match toast.severity {
            Severity::Info => tracing::info!(title = %toast.title, "{}", toast.description),
            Severity::Warning => tracing::warn!(title = %toast.title, "{}", toast.description),
            Severity::Error => tracing::error!(title = %toast.title, "{}", toast.description),
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(toast);
    }
}
