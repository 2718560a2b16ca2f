// Leveled, append-only log for pool and session lifecycle events.
//
// `SessionLogger` writes one line per entry:
//
//   [2024-05-01 18:30:00] [WARNING] white (Alice) disconnected
//
// to a file that survives restarts, optionally mirrored to stdout. All
// writes, from every logger instance in the process, go through one global
// lock, so concurrent sessions never interleave partial lines.
//
// The logger is also a `log::Log` backend. `install()` registers it, after
// which the rest of the crate just uses `log::{info, warn, error}`. The
// `log` crate's `Warn` is rendered as `WARNING`; `Debug` and `Trace` sit
// below `Info` and are always dropped.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{Local, NaiveDate};

/// Directory name used when no log file is configured. Resolved against
/// `crate::base_dir()`, the executable's directory.
pub const DEFAULT_LOG_DIR: &str = "Logs";

static WRITE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, clap::ValueEnum)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }

    fn from_log(level: log::Level) -> Option<Self> {
        match level {
            log::Level::Error => Some(LogLevel::Error),
            log::Level::Warn => Some(LogLevel::Warning),
            log::Level::Info => Some(LogLevel::Info),
            log::Level::Debug | log::Level::Trace => None,
        }
    }

    fn as_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warning => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

/// Date-stamped default log path relative to the base directory, e.g.
/// `Logs/log_2024-05-01.txt`.
pub fn default_log_path(date: NaiveDate) -> PathBuf {
    Path::new(DEFAULT_LOG_DIR).join(format!("log_{}.txt", date.format("%Y-%m-%d")))
}

pub struct SessionLogger {
    path: PathBuf,
    console: bool,
    min_level: LogLevel,
}

impl SessionLogger {
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn minimum_level(&self) -> LogLevel {
        self.min_level
    }

    /// Append one entry. Entries below the minimum level are dropped before
    /// any formatting happens. A failed write is reported on stderr; logging
    /// never fails the caller.
    pub fn log_at(&self, level: LogLevel, message: &str) {
        if level < self.min_level {
            return;
        }
        let line = format!(
            "[{}] [{}] {message}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            level.label()
        );

        let _guard = WRITE_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = self.append(&line) {
            eprintln!("failed to write log entry to {}: {e}", self.path.display());
        }
        if self.console {
            println!("{line}");
        }
    }

    pub fn info(&self, message: &str) {
        self.log_at(LogLevel::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log_at(LogLevel::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log_at(LogLevel::Error, message);
    }

    /// Make this logger the process-wide `log` backend. Fails if a logger
    /// was already installed.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let max = self.min_level.as_filter();
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(max);
        Ok(())
    }

    fn append(&self, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

impl log::Log for SessionLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        LogLevel::from_log(metadata.level()).is_some_and(|level| level >= self.min_level)
    }

    fn log(&self, record: &log::Record) {
        if let Some(level) = LogLevel::from_log(record.level()) {
            self.log_at(level, &record.args().to_string());
        }
    }

    fn flush(&self) {}
}

/// Builder for `SessionLogger`. Every setting is optional.
#[derive(Clone, Debug)]
pub struct LoggerBuilder {
    path: Option<PathBuf>,
    console: bool,
    min_level: LogLevel,
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self {
            path: None,
            console: true,
            min_level: LogLevel::Info,
        }
    }
}

impl LoggerBuilder {
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.console = enabled;
        self
    }

    pub fn minimum_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Resolve the destination and create its parent directory. Without an
    /// explicit file, logs go under `Logs/` next to the executable.
    pub fn build(self) -> io::Result<SessionLogger> {
        let path = self.path.unwrap_or_else(|| {
            crate::base_dir().join(default_log_path(Local::now().date_naive()))
        });
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        Ok(SessionLogger {
            path,
            console: self.console,
            min_level: self.min_level,
        })
    }
}
