//! This module defines the logging facilities, using tracing and tracing-subscriber.
//!
//! Logs are displayed in the terminal and written to a log file per run. Only the newest
//! `logs_max` log files are kept.

use chrono::Local;
use color_eyre::Result;
use color_eyre::eyre::{OptionExt, WrapErr};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable overriding the computed log filter, e.g. `BLOCKS_LOG=blocks=trace,sqlx=debug`
const LOG_FILTER_ENV: &str = "BLOCKS_LOG";

// -------------------------------------------------------------------------------------------------
// Logger
// -------------------------------------------------------------------------------------------------

/// A configured, not yet installed logger.
#[derive(Debug)]
pub(crate) struct Logger {
    verbosity: u8,
    log_dir: PathBuf,
    log_file: PathBuf,
}

impl Logger {
    /// Installs the global tracing subscriber.
    ///
    /// The returned guard flushes the file writer when dropped and must be held until the program
    /// exits.
    pub(crate) fn start(&self) -> Result<WorkerGuard> {
        let file_name = self
            .log_file
            .file_name()
            .ok_or_eyre("Log file has no file name")?;
        let appender = tracing_appender::rolling::never(&self.log_dir, file_name);
        let (file_writer, guard) = tracing_appender::non_blocking(appender);

        let timer = ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string());

        let terminal_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(self.verbosity > 0)
            .with_timer(timer.clone())
            .with_filter(self.filter());

        let file_layer = fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_timer(timer)
            .with_filter(self.filter());

        tracing_subscriber::registry()
            .with(terminal_layer)
            .with(file_layer)
            .with(ErrorLayer::default())
            .try_init()
            .wrap_err("Failed to initialize logging")?;

        Ok(guard)
    }

    /// Path of the log file of this run.
    pub(crate) fn log_file(&self) -> &Path {
        &self.log_file
    }

    fn filter(&self) -> EnvFilter {
        let level = match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_env(LOG_FILTER_ENV)
            .unwrap_or_else(|_| EnvFilter::new(format!("blocks={level},sqlx=warn")))
    }
}

// -------------------------------------------------------------------------------------------------
// Logger Builder
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default)]
pub(crate) struct LoggerBuilder {
    verbosity: Option<u8>,
    log_dir: Option<PathBuf>,
    max_logs: Option<usize>,
}

impl LoggerBuilder {
    /// Sets the verbosity (0 = info, 1 = debug, 2 = trace).
    pub(crate) fn with_verbosity(&mut self, verbosity: u8) -> &mut Self {
        self.verbosity = Some(verbosity);
        self
    }

    pub(crate) fn with_log_dir<P: AsRef<Path>>(&mut self, log_dir: P) -> &mut Self {
        self.log_dir = Some(log_dir.as_ref().to_path_buf());
        self
    }

    pub(crate) fn with_max_logs(&mut self, max_logs: usize) -> &mut Self {
        self.max_logs = Some(max_logs);
        self
    }

    /// Prepares the log directory and rotates old log files.
    ///
    /// # Errors
    /// Returns an error if the log directory cannot be created or old logs cannot be removed.
    pub(crate) fn build(&self) -> Result<Logger> {
        let log_dir = match self.log_dir {
            Some(ref dir) => dir.clone(),
            None => get_default_log_dir()?,
        };
        fs::create_dir_all(&log_dir)
            .wrap_err_with(|| format!("Failed to create log directory at {}", log_dir.display()))?;

        // Make room for the log file of this run
        let max_logs = self.max_logs.unwrap_or(15).max(1);
        rotate_logs(&log_dir, max_logs - 1)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_file = log_dir.join(format!("blocks_{}.log", timestamp));

        Ok(Logger {
            verbosity: self.verbosity.unwrap_or(0).min(2),
            log_dir,
            log_file,
        })
    }
}

/// Get the directory where log files should be stored.
///
/// Uses `$XDG_DATA_HOME/blocks/logs` if available, otherwise `~/.local/share/blocks/logs`.
pub(crate) fn get_default_log_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_eyre("Could not determine user's data directory")?
        .join("blocks")
        .join("logs"))
}

/// Rotate log files, keeping only the `keep` most recent ones.
fn rotate_logs<P: AsRef<Path>>(log_dir: P, keep: usize) -> Result<()> {
    let mut log_files: Vec<_> = fs::read_dir(&log_dir)
        .wrap_err_with(|| format!("Failed to read log directory {:?}", log_dir.as_ref()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("blocks_") && name.ends_with(".log")
        })
        .collect();

    // Timestamped names sort chronologically, newest first
    log_files.sort_by_key(|entry| entry.file_name());
    log_files.reverse();

    for old_log in log_files.iter().skip(keep) {
        fs::remove_file(old_log.path())
            .wrap_err_with(|| format!("Failed to remove old log file {:?}", old_log.path()))?;
    }

    Ok(())
}

// -------------------------------------------------------------------------------------------------
// Tests
// -------------------------------------------------------------------------------------------------
