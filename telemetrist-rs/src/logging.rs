//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. Records emitted through the `log`
//! facade are bridged into the same pipeline.

use std::sync::atomic::{AtomicBool, Ordering};

use config_rs::{LogFormat, LoggingConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::TelemetristError;

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the structured logging system
///
/// `RUST_LOG` takes precedence over `config.level`. Calling this more than once
/// is a no-op.
pub fn init_logging(config: &LoggingConfig, service_name: &str) -> Result<(), TelemetristError> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| {
            TelemetristError::Init(format!("invalid log filter '{}': {}", config.level, e))
        })?;

    // Only one of the two formatting layers is ever present
    let (json_layer, text_layer) = match config.format {
        LogFormat::Json => (
            Some(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Text => (None, Some(fmt::layer().with_target(true))),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TelemetristError::Init(format!("failed to set global subscriber: {}", e)))?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    tracing::info!(
        service = %service_name,
        level = %config.level,
        json = matches!(config.format, LogFormat::Json),
        "Structured logging initialized"
    );

    Ok(())
}
