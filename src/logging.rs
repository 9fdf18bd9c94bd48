//! Process-wide tracing setup.
//!
//! Filter precedence: `OPSBOARD_LOG`, then `RUST_LOG`, then `[logging].level`.
//! Console output goes to stderr so `opsboard watch` can print events on
//! stdout. An optional daily-rotated file gets the same events without ANSI
//! colouring.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::opsboard_config::{ENV_LOG, LogFormat, LoggingSection};

/// Keeps the non-blocking file writer flushing. Hold it for the life of the
/// process.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Pick the filter directive from the environment and the config section.
///
/// `[logging].level` already carries `OPSBOARD_LOG` when it was set, so it
/// wins in that case; otherwise `RUST_LOG` overrides the file value.
pub fn filter_directive(
    section_level: &str,
    opsboard_log: Option<&str>,
    rust_log: Option<&str>,
) -> String {
    match (opsboard_log, rust_log) {
        (Some(level), _) if !level.trim().is_empty() => level.to_string(),
        (_, Some(level)) if !level.trim().is_empty() => level.to_string(),
        _ => section_level.to_string(),
    }
}

/// Install the global subscriber. `verbose` raises the default to `debug`
/// for the `opsboard` target.
pub fn init(section: &LoggingSection, verbose: bool) -> Result<LoggingGuard> {
    let opsboard_log = std::env::var(ENV_LOG).ok();
    let rust_log = std::env::var("RUST_LOG").ok();
    let mut directive = filter_directive(&section.level, opsboard_log.as_deref(), rust_log.as_deref());
    if verbose {
        directive.push_str(",opsboard=debug");
    }
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match section.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    });

    let mut file_guard = None;
    if let Some(path) = &section.file {
        let (writer, guard) = file_writer(path)?;
        file_guard = Some(guard);
        layers.push(match section.format {
            LogFormat::Pretty => tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
            LogFormat::Json => tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed(),
        });
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: file_guard })
}

fn file_writer(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
    let appender = tracing_appender::rolling::daily(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
