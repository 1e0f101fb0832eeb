//! Real-time log streaming via Server-Sent Events (SSE).
//!
//! Pipeline logs go through one broadcast channel. Every entry is echoed to
//! the console and fanned out to the SSE clients of `GET /api/logs`.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Log level for frontend display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
    /// Nesting depth for grouped lines
    #[serde(default)]
    pub indent: u8,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            indent: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }

    /// Console form of the entry.
    pub fn render(&self) -> String {
        let prefix = match self.level {
            LogLevel::Info => "   ",
            LogLevel::Success => "   ✓",
            LogLevel::Warning => "   ⚠️",
            LogLevel::Error => "   ❌",
        };
        let indent = "   ".repeat(self.indent as usize);
        format!("{}{} {}", indent, prefix, self.message)
    }
}

/// Global log broadcaster
pub static LOG_BROADCASTER: Lazy<LogBroadcaster> = Lazy::new(LogBroadcaster::new);

/// Broadcasts log entries to all connected SSE clients
pub struct LogBroadcaster {
    sender: broadcast::Sender<LogEntry>,
    /// Echo to stderr instead of stdout, so CLI output on stdout stays clean.
    stderr: AtomicBool,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            sender,
            stderr: AtomicBool::new(false),
        }
    }

    pub fn echo_to_stderr(&self, enabled: bool) {
        self.stderr.store(enabled, Ordering::Relaxed);
    }

    /// Send a log entry to all subscribers
    pub fn log(&self, entry: LogEntry) {
        if self.stderr.load(Ordering::Relaxed) {
            eprintln!("{}", entry.render());
        } else {
            println!("{}", entry.render());
        }

        // No receivers is fine
        let _ = self.sender.send(entry);
    }

    /// Get a receiver for SSE streaming
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.sender.subscribe()
    }
}

impl Default for LogBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenient logging functions
pub fn log_info(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::info(msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::success(msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::warning(msg));
}

pub fn log_error(msg: impl Into<String>) {
    LOG_BROADCASTER.log(LogEntry::error(msg));
}
