//! Tracing subscriber setup shared by both daemons.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::settings::{LogFormat, LoggingSettings};

/// Initialize the global tracing subscriber from configuration.
///
/// Returns the appender guard when file logging is enabled; the caller must
/// keep it alive for the lifetime of the process or buffered lines are lost.
pub fn init_logging(settings: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(settings)?;

    if let Some(path) = &settings.file {
        let path = std::path::Path::new(path);
        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "cortex.log".to_string());

        let appender = tracing_appender::rolling::daily(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        match settings.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init(),
            LogFormat::Simple => tracing_subscriber::fmt()
                .compact()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init(),
            LogFormat::Standard => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init(),
        }

        return Ok(Some(guard));
    }

    match settings.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Simple => tracing_subscriber::fmt().compact().with_env_filter(filter).init(),
        LogFormat::Standard => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }

    Ok(None)
}

/// Render the configured base level plus per-module overrides into an
/// `EnvFilter` directive string, e.g. `info,cortex_monitor=debug`.
fn build_filter(settings: &LoggingSettings) -> Result<EnvFilter> {
    let base: tracing_subscriber::filter::LevelFilter = settings
        .level
        .to_lowercase()
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown log level: {}", settings.level))?;

    let mut directives = vec![base.to_string().to_lowercase()];
    for (module, level) in &settings.modules {
        directives.push(format!("{}={}", module, level.to_lowercase()));
    }

    EnvFilter::try_new(directives.join(",")).context("invalid logging level configuration")
}
