//! Tracing initialization.
//!
//! Console and file outputs are driven by the `application.log`
//! configuration: a human-readable or JSON format, an optional console
//! layer, and an optional append-only log file. Size-based rotation is left
//! to the platform.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogConfig, LogFormat};

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("log file has no name configured")]
    MissingLogFileName,
    #[error("unable to initialize logging: {0}")]
    Init(String),
}

/// Keeps the non-blocking file writer alive for the process lifetime.
pub struct Telemetry {
    _file_guard: Option<WorkerGuard>,
}

pub fn init(log: &LogConfig, debug: bool) -> Result<Telemetry, TelemetryError> {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let console_layer = if log.console.enabled {
        let layer = match log.format {
            LogFormat::Human => fmt::layer().boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
        };
        Some(layer)
    } else {
        None
    };

    let mut file_guard = None;
    let file_layer = if log.file.enabled {
        let path = log
            .file
            .name
            .as_ref()
            .ok_or(TelemetryError::MissingLogFileName)?;
        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path
            .file_name()
            .ok_or(TelemetryError::MissingLogFileName)?;
        let appender = tracing_appender::rolling::never(directory, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        let layer = match log.format {
            LogFormat::Human => fmt::layer().with_writer(writer).with_ansi(false).boxed(),
            LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        };
        Some(layer)
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    Ok(Telemetry {
        _file_guard: file_guard,
    })
}
