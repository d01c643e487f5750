use std::{fs, path::PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::config::DiagnosticsConfig;

/// Handle returned by [`init_tracing`]. Dropping it flushes the JSON log.
pub struct TelemetryGuard {
    pub session_id: Uuid,
    pub log_file: PathBuf,
    _file_guard: WorkerGuard,
}

/// `<prefix>-<yyyymmdd-hhmmss>.log`
#[must_use]
pub fn log_file_name(prefix: &str, started_at: DateTime<Utc>) -> String {
    format!("{prefix}-{}.log", started_at.format("%Y%m%d-%H%M%S"))
}

/// Installs the global subscriber described by `config`: a JSON file layer
/// in `config.log_dir`, plus a compact stdout layer when `config.stdout` is
/// set. `RUST_LOG` takes precedence over `config.log_filter`.
///
/// Only the first call installs a subscriber; later calls still open a log
/// file but leave the global subscriber alone.
pub fn init_tracing(config: &DiagnosticsConfig) -> anyhow::Result<TelemetryGuard> {
    let log_dir = &config.log_dir;
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log directory: {}", log_dir.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("invalid log filter `{}`", config.log_filter))?;

    let session_id = Uuid::new_v4();
    let file_name = log_file_name(&config.file_prefix, Utc::now());
    let log_file = log_dir.join(&file_name);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name));

    let stdout_layer = config
        .stdout
        .then(|| tracing_subscriber::fmt::layer().compact().with_target(true));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(file_writer);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();
    match installed {
        Ok(()) => info!(
            %session_id,
            log_file = %log_file.display(),
            "cutline tracing initialized"
        ),
        Err(error) => warn!(%error, "tracing subscriber already installed, keeping it"),
    }

    Ok(TelemetryGuard {
        session_id,
        log_file,
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn log_files_are_named_after_prefix_and_start_time() {
        let started_at = Utc
            .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
            .single()
            .expect("timestamp should be valid");
        assert_eq!(log_file_name("cutline-cli", started_at), "cutline-cli-20260304-050607.log");
    }

    #[test]
    fn init_creates_the_log_directory() {
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let config = DiagnosticsConfig {
            log_dir: temp.path().join("logs"),
            stdout: false,
            ..DiagnosticsConfig::default()
        };

        let guard = init_tracing(&config).expect("tracing should initialize");
        assert!(config.log_dir.is_dir());
        assert_eq!(guard.log_file.parent(), Some(config.log_dir.as_path()));
    }

    #[test]
    fn invalid_filters_are_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let temp = tempfile::tempdir().expect("tempdir should be creatable");
        let config = DiagnosticsConfig {
            log_dir: temp.path().to_path_buf(),
            log_filter: "cutline_core=loudest".to_owned(),
            stdout: false,
            ..DiagnosticsConfig::default()
        };
        assert!(init_tracing(&config).is_err());
    }
}
