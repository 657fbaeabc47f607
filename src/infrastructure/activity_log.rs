use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const ACTIVITY_LOG_FILE: &str = "activity.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Append-only JSON-lines log shared by the background, popup and blocked-page
/// contexts. Write failures are dropped so logging never fails a caller.
#[derive(Debug)]
pub struct ActivityLog {
    path: Option<PathBuf>,
    guard: Mutex<()>,
}

impl ActivityLog {
    pub fn new(logs_dir: impl AsRef<Path>) -> Self {
        Self {
            path: Some(logs_dir.as_ref().join(ACTIVITY_LOG_FILE)),
            guard: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            path: None,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self, command: &str, message: &str) {
        self.append(LogLevel::Info, command, message);
    }

    pub fn warn(&self, command: &str, message: &str) {
        self.append(LogLevel::Warn, command, message);
    }

    pub fn error(&self, command: &str, message: &str) {
        self.append(LogLevel::Error, command, message);
    }

    fn append(&self, level: LogLevel, command: &str, message: &str) {
        let Some(path) = self.path.as_ref() else {
            return;
        };
        let Ok(_guard) = self.guard.lock() else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level.as_str(),
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::disabled()
    }
}
