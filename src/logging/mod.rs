//! # Logging
//!
//! Two output modes share the `log` facade:
//!
//! * [`LogMode::Interactive`] installs `env_logger` so an operator running the
//!   command sees progress on the terminal (`RUST_LOG` still applies).
//! * [`LogMode::Background`] is used for `--quiet` runs from a scheduler. Lines
//!   go into a bounded in-memory ring and a broadcast channel, and optionally
//!   to a log file. Nothing is written to stdout.

pub mod features;

pub use features::LogFeature;

use crate::constants::LOG_BUFFER_CAPACITY;
use chrono::Utc;
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::OnceCell;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogMode {
    Interactive,
    Background { log_file: Option<PathBuf> },
}

/// Logging system errors
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Logging system already initialized")]
    AlreadyInitialized,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
}

/// Buffered logger used in background mode
pub struct BackgroundLogger {
    buffer: Mutex<VecDeque<String>>,
    sender: broadcast::Sender<String>,
    file: Option<Mutex<File>>,
}

impl BackgroundLogger {
    fn new(file: Option<File>) -> Self {
        let (sender, _) = broadcast::channel(LOG_BUFFER_CAPACITY);
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(LOG_BUFFER_CAPACITY)),
            sender,
            file: file.map(Mutex::new),
        }
    }
}

static LOGGER: OnceCell<BackgroundLogger> = OnceCell::new();

impl log::Log for BackgroundLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let msg = format!(
            "{} {} {} - {}",
            Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{}", msg);
            }
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.push_back(msg.clone());
            if buf.len() > LOG_BUFFER_CAPACITY {
                buf.pop_front();
            }
        }
        let _ = self.sender.send(msg);
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
    }
}

/// Parse a level name as used in the config file (`info`, `DEBUG`, ...)
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    match level.to_ascii_uppercase().as_str() {
        "OFF" => Ok(LevelFilter::Off),
        "TRACE" => Ok(LevelFilter::Trace),
        "DEBUG" => Ok(LevelFilter::Debug),
        "INFO" => Ok(LevelFilter::Info),
        "WARN" => Ok(LevelFilter::Warn),
        "ERROR" => Ok(LevelFilter::Error),
        _ => Err(LoggingError::InvalidLevel(level.to_string())),
    }
}

/// Install the process-wide logger. Can only succeed once per process.
pub fn init(mode: LogMode, level: &str) -> Result<(), LoggingError> {
    let level_filter = parse_level(level)?;
    match mode {
        LogMode::Interactive => {
            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(level_filter.as_str()),
            )
            .format_timestamp_millis()
            .try_init()
            .map_err(|_| LoggingError::AlreadyInitialized)?;
        }
        LogMode::Background { log_file } => {
            let file = match log_file {
                Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
                None => None,
            };
            if LOGGER.set(BackgroundLogger::new(file)).is_err() {
                return Err(LoggingError::AlreadyInitialized);
            }
            let logger = LOGGER.get().ok_or(LoggingError::AlreadyInitialized)?;
            log::set_logger(logger).map_err(|_| LoggingError::AlreadyInitialized)?;
            log::set_max_level(level_filter);
        }
    }
    Ok(())
}

/// Lines captured by the background logger (empty in interactive mode)
pub fn get_logs() -> Vec<String> {
    LOGGER
        .get()
        .and_then(|l| l.buffer.lock().ok().map(|buf| buf.iter().cloned().collect()))
        .unwrap_or_default()
}

/// Subscribe to lines logged in background mode
pub fn subscribe() -> Option<broadcast::Receiver<String>> {
    LOGGER.get().map(|l| l.sender.subscribe())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("info").unwrap(), LevelFilter::Info);
        assert_eq!(parse_level("WARN").unwrap(), LevelFilter::Warn);
        assert!(matches!(
            parse_level("loud"),
            Err(LoggingError::InvalidLevel(_))
        ));
    }

    #[test]
    fn background_logger_keeps_bounded_buffer() {
        use log::Log;

        let logger = BackgroundLogger::new(None);
        let mut rx = logger.sender.subscribe();
        log::set_max_level(LevelFilter::Info);
        logger.log(
            &Record::builder()
                .level(log::Level::Info)
                .target("pipeliner_sync::lock")
                .args(format_args!("first"))
                .build(),
        );
        assert!(rx.try_recv().unwrap().contains("pipeliner_sync::lock - first"));

        for i in 0..(LOG_BUFFER_CAPACITY + 5) {
            logger.log(
                &Record::builder()
                    .level(log::Level::Info)
                    .target("pipeliner_sync::lock")
                    .args(format_args!("line {}", i))
                    .build(),
            );
        }
        let buf = logger.buffer.lock().unwrap();
        assert_eq!(buf.len(), LOG_BUFFER_CAPACITY);
        assert!(buf.back().unwrap().ends_with(&format!("line {}", LOG_BUFFER_CAPACITY + 4)));
    }
}
