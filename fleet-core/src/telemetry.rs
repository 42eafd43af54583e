//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Plain,
    Json,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `info,fleet_storage=debug`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Plain,
        }
    }
}

impl TelemetryConfig {
    /// Read `FLEET_LOG` and `FLEET_LOG_FORMAT` (`plain` or `json`).
    pub fn from_env() -> Self {
        let filter = std::env::var("FLEET_LOG").unwrap_or_else(|_| "info".to_string());
        let format = match std::env::var("FLEET_LOG_FORMAT") {
            Ok(s) if s.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Plain,
        };
        Self { filter, format }
    }
}

/// Install the global tracing subscriber.
///
/// Returns false if a subscriber was already installed.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init().is_ok(),
        LogFormat::Plain => registry.with(fmt::layer()).try_init().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        let config = TelemetryConfig {
            filter: "not a [valid filter".to_string(),
            format: LogFormat::Json,
        };
        let _first = init_tracing(&config);
        assert!(!init_tracing(&TelemetryConfig::default()));
    }
}
