/// Structured logging for the tank telemetry service.
///
/// Provides context-rich logging with subsystem and tank identifiers,
/// timestamps, and severity levels. Supports both console output and
/// file-based logging for daemon operations.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

// ---------------------------------------------------------------------------
// Subsystems
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Ingest,
    Pipeline,
    Database,
    Config,
    System,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subsystem::Ingest => write!(f, "INGEST"),
            Subsystem::Pipeline => write!(f, "PIPE"),
            Subsystem::Database => write!(f, "DB"),
            Subsystem::Config => write!(f, "CFG"),
            Subsystem::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
}

impl Logger {
    /// Initialize the global logger
    pub fn init(min_level: LogLevel, log_file: Option<String>) {
        *LOGGER.lock().unwrap() = Some(Logger { min_level, log_file });
    }

    fn log(&self, level: LogLevel, subsystem: Subsystem, tank_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let tank_part = tank_id.map(|t| format!(" [{}]", t)).unwrap_or_default();
        let log_entry = format!("{} {} {}{}: {}", timestamp, level, subsystem, tank_part, message);

        match level {
            LogLevel::Error | LogLevel::Warning => eprintln!("{}", log_entry),
            LogLevel::Info | LogLevel::Debug => println!("{}", log_entry),
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>) {
    Logger::init(min_level, log_file.map(String::from));
}

/// Log a general informational message
pub fn info(subsystem: Subsystem, tank_id: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Info, subsystem, tank_id, message);
    }
}

/// Log a warning message
pub fn warn(subsystem: Subsystem, tank_id: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Warning, subsystem, tank_id, message);
    }
}

/// Log an error message
pub fn error(subsystem: Subsystem, tank_id: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Error, subsystem, tank_id, message);
    }
}

/// Log a debug message
pub fn debug(subsystem: Subsystem, tank_id: Option<&str>, message: &str) {
    if let Some(logger) = LOGGER.lock().unwrap().as_ref() {
        logger.log(LogLevel::Debug, subsystem, tank_id, message);
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a durable-store failure. Storage outages must not disturb the
/// pipeline, so these are reported here and nowhere else.
pub fn log_db_failure(tank_id: &str, operation: &str, err: &dyn std::error::Error) {
    let message = format!("{} failed: {}", operation, err);
    error(Subsystem::Database, Some(tank_id), &message);
}

/// Log a bounds-check rejection. Not an error: the reading was
/// intentionally ignored to protect the filter from glitches.
pub fn log_ignored_reading(tank_id: &str, raw_distance_cm: f64) {
    let message = format!("ignored out-of-range reading: {} cm", raw_distance_cm);
    warn(Subsystem::Ingest, Some(tank_id), &message);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
