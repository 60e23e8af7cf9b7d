// logging.rs - tracing integration for DocVault
//
// The library itself only emits `tracing` events. Embedders that do not
// install their own subscriber can call `init_logging` once at startup.

use tracing_subscriber::EnvFilter;

/// Log levels (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors - critical failures that prevent operations
    Error = 0,
    /// Warnings - recovered corruption, failing watch callbacks
    Warn = 1,
    /// Info - open/close/backup
    Info = 2,
    /// Debug - commits, checkpoints, garbage collection
    Debug = 3,
    /// Trace - extremely verbose
    Trace = 4,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<LogLevel> {
        match s.to_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Install a global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set. Returns `false` when
/// a global subscriber was already installed (by the embedder or an earlier
/// call), in which case nothing changes.
pub fn init_logging(level: LogLevel) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("docvault_core={}", level.as_str())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
