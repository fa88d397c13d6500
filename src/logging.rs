use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::error::{IngestError, Result};

/// Target used for security audit events
pub const SECURITY_TARGET: &str = "security";

/// Initializes the global tracing subscriber with the specified log level
///
/// `RUST_LOG` takes precedence when set. Valid log levels are: error, warn,
/// info, debug, trace.
pub fn init(log_level: &str) -> Result<()> {
    let default_directive = format!("{},hyper=warn,sqlx=warn", parse_log_level(log_level));
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&default_directive))
        .map_err(|e| IngestError::Config(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| IngestError::Config(format!("Logging already initialized: {}", e)))
}

/// Parses a log level string into a LevelFilter
///
/// Returns the corresponding LevelFilter, defaulting to Info for invalid strings
pub fn parse_log_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "error" => LevelFilter::ERROR,
        "warn" | "warning" => LevelFilter::WARN,
        "info" => LevelFilter::INFO,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}
