//! Logging setup
//!
//! TigerStyle: Explicit telemetry configuration, installed once at startup.

use crate::error::{Error, Result};

/// Default service name reported in logs
const SERVICE_NAME_DEFAULT: &str = "eddy";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to emit ANSI colours
    pub ansi: bool,
    /// Whether to include the module target in each line
    pub with_target: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            log_level: "info".to_string(),
            ansi: true,
            with_target: true,
        }
    }
}

impl TelemetryConfig {
    /// Create a configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable ANSI colours (log files, CI)
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `EDDY_SERVICE_NAME`: Service name (default: "eddy")
    /// - `RUST_LOG`: Log level filter (default: "info")
    /// - `NO_COLOR`: Disables ANSI colours when set
    pub fn from_env() -> Self {
        let service_name = std::env::var("EDDY_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let ansi = std::env::var_os("NO_COLOR").is_none();

        Self {
            service_name,
            log_level,
            ansi,
            with_target: true,
        }
    }
}

/// Guard returned by [`init_telemetry`]; keep it alive for the process
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    /// Service name the subscriber was installed for
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over `config.log_level`. Fails if a global
/// subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(config.ansi)
        .with_target(config.with_target);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            message: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(service = %config.service_name, "telemetry initialized");

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}
