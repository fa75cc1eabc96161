//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    let config: GatewayConfig = toml::from_str(content)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{FetchMethod, ResponseType, StoreBackend};
    use std::io::Write;

    #[test]
    fn test_minimal_config_uses_presets() {
        let config = parse_config("").unwrap();
        assert_eq!(config.circuit_breaker.gateway.max_failures, 5);
        assert_eq!(config.circuit_breaker.subgraph.max_failures, 3);
        assert_eq!(config.retries.subgraph.max_attempts, 2);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.cache.query_ttl_secs, config.cache.schema_ttl_secs);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[store]
backend = "memory"

[rate_limit]
max_requests = 3
window_secs = 1

[circuit_breaker.gateway]
max_failures = 2
open_timeout_ms = 1000

[[poller.services]]
name = "accounts"
url = "http://localhost:4001/query"
method = "GET"
response_type = "string"
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limit.max_requests, 3);
        assert_eq!(config.circuit_breaker.gateway.max_failures, 2);
        // Unspecified fields keep the preset values.
        assert_eq!(config.circuit_breaker.gateway.max_half_open_probes, 3);

        let service = &config.poller.services[0];
        assert_eq!(service.method, FetchMethod::Get);
        assert_eq!(service.response_type, ResponseType::String);
        assert_eq!(service.schema_endpoint(), "http://localhost:4001/query");
    }

    #[test]
    fn test_invalid_config_reports_every_error() {
        let err = parse_config(
            r#"
[rate_limit]
max_requests = 0

[retries.gateway]
max_attempts = 0
"#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => assert!(errors.len() >= 2),
            other => panic!("expected validation error, got {other}"),
        }
    }
}
