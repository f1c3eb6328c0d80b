//! File logging for the CLI.
//!
//! Commands print results to the terminal; diagnostics go to
//! `<data_dir>/logs/tether.log` so they never interleave with output.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,reqwest=warn,tungstenite=warn";
const LOG_FILE: &str = "tether.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything but `pretty` (any case) is JSON.
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }
}

/// Where and how to log, read from `TETHER_LOG_FILTER` / `RUST_LOG` and
/// `TETHER_LOG_FORMAT`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogSettings {
    pub path: PathBuf,
    pub filter: String,
    pub format: LogFormat,
}

impl LogSettings {
    pub fn resolve(log_dir: &Path, filter: Option<String>, format: Option<String>) -> Self {
        Self {
            path: log_dir.join(LOG_FILE),
            filter: filter
                .filter(|f| EnvFilter::try_new(f).is_ok())
                .unwrap_or_else(|| DEFAULT_FILTER.to_string()),
            format: LogFormat::parse(format.as_deref()),
        }
    }

    pub fn from_env(log_dir: &Path) -> Self {
        let filter = std::env::var("TETHER_LOG_FILTER")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok();
        Self::resolve(log_dir, filter, std::env::var("TETHER_LOG_FORMAT").ok())
    }
}

pub struct LoggingHandle {
    pub run_id: String,
    _guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path) -> anyhow::Result<LoggingHandle> {
    let settings = LogSettings::from_env(log_dir);
    std::fs::create_dir_all(log_dir)?;

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, LOG_FILE));
    let registry = tracing_subscriber::registry().with(EnvFilter::try_new(&settings.filter)?);
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_target(true);

    match settings.format {
        LogFormat::Pretty => registry.with(layer.pretty()).try_init()?,
        LogFormat::Json => registry
            .with(layer.json().flatten_event(true).with_current_span(true))
            .try_init()?,
    }

    let run_id = format!(
        "pid-{}-{}",
        std::process::id(),
        chrono::Utc::now().timestamp_millis()
    );
    tracing::info!(
        component = "logging",
        event = "logging.initialized",
        run_id = %run_id,
        log_path = %settings.path.display(),
        format = ?settings.format,
        filter = %settings.filter,
        "Logging initialized"
    );

    Ok(LoggingHandle {
        run_id,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_json_and_quiet_transports() {
        let settings = LogSettings::resolve(Path::new("/tmp/tether/logs"), None, None);
        assert_eq!(settings.path, PathBuf::from("/tmp/tether/logs/tether.log"));
        assert_eq!(settings.filter, DEFAULT_FILTER);
        assert_eq!(settings.format, LogFormat::Json);
    }

    #[test]
    fn explicit_filter_and_pretty_format() {
        let settings = LogSettings::resolve(
            Path::new("logs"),
            Some("debug,tether_client=trace".into()),
            Some("PRETTY".into()),
        );
        assert_eq!(settings.filter, "debug,tether_client=trace");
        assert_eq!(settings.format, LogFormat::Pretty);
    }

    #[test]
    fn invalid_filter_falls_back_to_default() {
        let settings = LogSettings::resolve(Path::new("logs"), Some("tether=notalevel".into()), None);
        assert_eq!(settings.filter, DEFAULT_FILTER);
    }
}
