//! Logging setup shared by the gas analyzer tools
//!
//! Console output always uses the bracketed format
//! (`2025-12-02T00:50:44.809123Z [INFO] message`). When a log directory is
//! configured, a daily-rolling file is written through a non-blocking
//! appender as well.

use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{Error, Result};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
pub struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let now = chrono::Utc::now();
        write!(writer, "{} ", now.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m", // magenta
                Level::DEBUG => "\x1b[34m", // blue
                Level::INFO => "\x1b[32m",  // green
                Level::WARN => "\x1b[33m",  // yellow
                Level::ERROR => "\x1b[31m", // red
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Appender guards must outlive the subscriber or buffered lines are lost
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

/// Logger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is not set,
    /// e.g. `info` or `info,gas_modbus=debug`
    pub level: String,
    /// Directory for daily log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Log file name prefix (`{prefix}.log.YYYY-MM-DD`)
    pub file_prefix: String,
    /// Write JSON lines instead of the bracketed format to the log file
    pub json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
            file_prefix: "gaspoll".to_string(),
            json: false,
            ansi: true,
        }
    }
}

/// `RUST_LOG` wins over the configured level
fn build_filter(config: &LogConfig, rust_log: Option<&str>) -> Result<EnvFilter> {
    let directive = rust_log
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&config.level);
    EnvFilter::try_new(directive)
        .map_err(|e| Error::Logging(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Non-blocking daily-rolling writer, if a log directory is configured
fn file_writer(config: &LogConfig) -> Result<Option<(NonBlocking, WorkerGuard)>> {
    let Some(dir) = &config.log_dir else {
        return Ok(None);
    };
    fs::create_dir_all(dir)?;

    let appender = tracing_appender::rolling::daily(dir, format!("{}.log", config.file_prefix));
    Ok(Some(tracing_appender::non_blocking(appender)))
}

fn keep_guard(guard: WorkerGuard) {
    let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
    match guards.lock() {
        Ok(mut guards) => guards.push(guard),
        Err(poisoned) => {
            eprintln!("Warning: GUARDS lock was poisoned, recovering...");
            poisoned.into_inner().push(guard);
        },
    }
}

/// Initialize the global subscriber
pub fn init_with_config(config: &LogConfig) -> Result<()> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = build_filter(config, rust_log.as_deref())?;

    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match file_writer(config)? {
        Some((writer, guard)) => {
            keep_guard(guard);
            let layer = if config.json {
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    match &config.log_dir {
        Some(dir) => tracing::info!("Logging: {} @ {:?}", config.file_prefix, dir),
        None => tracing::debug!("Logging: console only"),
    }
    Ok(())
}

fn console_subscriber<W>(
    config: &LogConfig,
    rust_log: Option<&str>,
    writer: W,
) -> Result<impl tracing::Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let filter = build_filter(config, rust_log)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .with_writer(writer)
        .finish())
}

/// Console logging on the current thread until the guard drops.
///
/// Covers startup work, such as loading the configuration that holds the
/// real logger settings, before [`init_with_config`] runs.
pub fn init_startup(config: &LogConfig) -> Result<DefaultGuard> {
    let rust_log = std::env::var("RUST_LOG").ok();
    let subscriber = console_subscriber(config, rust_log.as_deref(), std::io::stdout)?;
    Ok(tracing::subscriber::set_default(subscriber))
}

/// Console-only logging at `level`
pub fn init(level: &str) -> Result<()> {
    init_with_config(&LogConfig {
        level: level.to_string(),
        ..Default::default()
    })
}
