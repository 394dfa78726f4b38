//! Logging system configuration and initialization
//!
//! - Daily rolling log files (non-blocking writer)
//! - Optional structured JSON file output
//! - Console output
//! - KST (Korea Standard Time) timestamps
//! - `RUST_LOG` overrides the configured level entirely

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Result, anyhow};
use chrono::{FixedOffset, Offset, Utc};
use lazy_static::lazy_static;
use tracing::{Subscriber, info, warn};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::FormatTime},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

pub use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::config::data_directory;

const LOG_FILE_PREFIX: &str = "market-sweep.log";

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix())
}

/// Custom time formatter for KST (Korea Standard Time, UTC+9)
struct KstTimeFormatter;

impl FormatTime for KstTimeFormatter {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        let kst_time = Utc::now().with_timezone(&kst());
        write!(w, "{}", kst_time.format("%Y-%m-%d %H:%M:%S%.3f %z"))
    }
}

/// Resolves the log directory (configured, or `<data dir>/logs`).
#[must_use]
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config
        .log_dir
        .clone()
        .unwrap_or_else(|| data_directory().join("logs"))
}

fn build_env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::new(level);

        // Suppress verbose dependency logs unless TRACE is requested
        if !level.to_lowercase().contains("trace") {
            for directive in [
                "sqlx::query=warn",
                "sqlx::migrate=info",
                "sqlx::sqlite=warn",
                "reqwest=info",
                "hyper=warn",
                "hyper_util=warn",
                "h2=warn",
                "tokio=info",
                "runtime=warn",
            ] {
                match directive.parse() {
                    Ok(parsed) => filter = filter.add_directive(parsed),
                    Err(e) => eprintln!("invalid log directive {directive}: {e}"),
                }
            }
        }
        filter
    })
}

fn console_layer<S>(enabled: bool) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    enabled.then(|| {
        fmt::Layer::new()
            .with_writer(std::io::stdout)
            .with_timer(KstTimeFormatter)
            .with_target(false)
    })
}

/// Initialize logging with the given configuration.
///
/// Must be called once per process; a second call fails because the global
/// subscriber is already set.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(&config.level);
    let registry = Registry::default().with(env_filter);
    let log_dir = get_log_directory(config);

    if !config.file_output && !config.console_output {
        return Err(anyhow!("No logging output configured"));
    }

    if config.file_output {
        std::fs::create_dir_all(&log_dir)
            .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;
        if config.auto_cleanup {
            cleanup_old_logs(&log_dir, config.max_files)?;
        }

        let file_appender = rolling::daily(&log_dir, LOG_FILE_PREFIX);
        let (file_writer, file_guard) = non_blocking(file_appender);
        LOG_GUARDS
            .lock()
            .map_err(|_| anyhow!("log guard registry poisoned"))?
            .push(file_guard);

        if config.json_format {
            let file_layer = fmt::Layer::new()
                .json()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false);
            registry.with(file_layer).with(console_layer(config.console_output)).try_init()?;
        } else {
            let file_layer = fmt::Layer::new()
                .with_writer(file_writer)
                .with_timer(KstTimeFormatter)
                .with_target(true)
                .with_ansi(false);
            registry.with(file_layer).with(console_layer(config.console_output)).try_init()?;
        }
    } else {
        registry.with(console_layer(config.console_output)).try_init()?;
    }

    info!("📝 Logging system initialized");
    info!(
        "Log level: {}, JSON: {}, console: {}, file: {}",
        config.level, config.json_format, config.console_output, config.file_output
    );
    if config.file_output {
        info!("Log directory: {:?}", log_dir);
    }
    Ok(())
}

/// Removes the oldest rolled log files, keeping `max_files`.
fn cleanup_old_logs(log_dir: &Path, max_files: usize) -> Result<()> {
    if !log_dir.exists() {
        return Ok(());
    }

    let mut log_files = Vec::new();
    for entry in std::fs::read_dir(log_dir)? {
        let entry = entry?;
        let path = entry.path();
        let is_log = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX));
        if path.is_file() && is_log {
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                log_files.push((path, modified));
            }
        }
    }

    // Newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(max_files) {
        if let Err(e) = std::fs::remove_file(path) {
            warn!("Failed to remove old log file {:?}: {}", path, e);
        }
    }
    Ok(())
}
