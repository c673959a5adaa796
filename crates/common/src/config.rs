//! Observability configuration shared by room-service binaries.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default tracing filter when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "room_service=debug,tower_http=debug";

/// Output format for the tracing fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, the default for local runs.
    #[default]
    Text,
    /// One JSON object per line, for log shippers.
    Json,
}

impl LogFormat {
    /// Parse a format name, case-insensitively. Unknown names yield `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is absent
    pub log_filter: String,
    /// Log line format
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl ObservabilityConfig {
    /// Build from environment-style variables.
    ///
    /// Reads `RUST_LOG` and `<prefix>_LOG_FORMAT`. An unrecognised format
    /// falls back to text rather than failing startup.
    #[must_use]
    pub fn from_vars(prefix: &str, vars: &HashMap<String, String>) -> Self {
        let log_filter = vars
            .get("RUST_LOG")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_format = vars
            .get(&format!("{prefix}_LOG_FORMAT"))
            .and_then(|v| LogFormat::parse(v))
            .unwrap_or_default();

        Self {
            log_filter,
            log_format,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars("RS", &HashMap::new());
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_json_format_and_filter() {
        let vars = HashMap::from([
            ("RUST_LOG".to_string(), "info".to_string()),
            ("RS_LOG_FORMAT".to_string(), "JSON".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars("RS", &vars);
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_falls_back_to_text() {
        let vars = HashMap::from([("RS_LOG_FORMAT".to_string(), "xml".to_string())]);
        let config = ObservabilityConfig::from_vars("RS", &vars);
        assert_eq!(config.log_format, LogFormat::Text);
    }
}
