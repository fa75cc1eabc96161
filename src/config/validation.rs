//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (attempts > 0, jitter within 0..=1)
//! - Check endpoint URLs and service name uniqueness
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Conventions (equal cache TTLs) only warn

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{CircuitBreakerConfig, GatewayConfig, RetryConfig, StoreBackend};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if !config.listener.query_path.starts_with('/') {
        errors.push(ValidationError::new("listener.query_path", "must start with '/'"));
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::new("listener.max_body_bytes", "must be greater than 0"));
    }

    if config.store.backend == StoreBackend::Redis {
        check_url(&mut errors, "store.url", &config.store.url, &["redis", "rediss"]);
    }
    if config.store.op_timeout_ms == 0 {
        errors.push(ValidationError::new("store.op_timeout_ms", "must be greater than 0"));
    }

    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be greater than 0"));
        }
        if config.rate_limit.window_secs == 0 {
            errors.push(ValidationError::new("rate_limit.window_secs", "must be greater than 0"));
        }
    }

    if config.cache.enabled && config.cache.query_ttl_secs == 0 {
        errors.push(ValidationError::new("cache.query_ttl_secs", "must be greater than 0"));
    }
    if config.cache.schema_ttl_secs != config.cache.query_ttl_secs {
        tracing::warn!(
            query_ttl_secs = config.cache.query_ttl_secs,
            schema_ttl_secs = config.cache.schema_ttl_secs,
            "Query and schema cache TTLs differ; cached responses may outlive their schema"
        );
    }

    check_breaker(&mut errors, "circuit_breaker.gateway", &config.circuit_breaker.gateway);
    check_breaker(&mut errors, "circuit_breaker.subgraph", &config.circuit_breaker.subgraph);
    check_retry(&mut errors, "retries.gateway", &config.retries.gateway);
    check_retry(&mut errors, "retries.subgraph", &config.retries.subgraph);

    let mut names = HashSet::new();
    for (i, service) in config.poller.services.iter().enumerate() {
        let field = format!("poller.services[{i}]");
        if service.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !names.insert(service.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate service name '{}'", service.name),
            ));
        }
        check_url(&mut errors, &format!("{field}.url"), &service.url, &["http", "https"]);
        if let Some(schema_url) = &service.schema_url {
            check_url(&mut errors, &format!("{field}.schema_url"), schema_url, &["http", "https"]);
        }
        if let Some(ws_url) = &service.ws_url {
            check_url(&mut errors, &format!("{field}.ws_url"), ws_url, &["ws", "wss"]);
        }
    }

    // The forwarder speaks plain HTTP to the co-located execution engine.
    check_url(&mut errors, "upstream.url", &config.upstream.url, &["http"]);

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "not a socket address",
        ));
    }

    if config.admin.enabled && config.admin.api_key.len() < 16 {
        errors.push(ValidationError::new("admin.api_key", "must be at least 16 characters"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_breaker(errors: &mut Vec<ValidationError>, field: &str, config: &CircuitBreakerConfig) {
    if config.max_failures == 0 {
        errors.push(ValidationError::new(format!("{field}.max_failures"), "must be greater than 0"));
    }
    if config.max_half_open_probes == 0 {
        errors.push(ValidationError::new(
            format!("{field}.max_half_open_probes"),
            "must be greater than 0",
        ));
    }
    if config.open_timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.open_timeout_ms"), "must be greater than 0"));
    }
    if !(0.0..=100.0).contains(&config.failure_rate_threshold) {
        errors.push(ValidationError::new(
            format!("{field}.failure_rate_threshold"),
            "must be a percentage between 0 and 100",
        ));
    }
}

fn check_retry(errors: &mut Vec<ValidationError>, field: &str, config: &RetryConfig) {
    if config.max_attempts == 0 {
        errors.push(ValidationError::new(format!("{field}.max_attempts"), "must be at least 1"));
    }
    if config.max_delay_ms < config.initial_delay_ms {
        errors.push(ValidationError::new(
            format!("{field}.max_delay_ms"),
            "must not be smaller than initial_delay_ms",
        ));
    }
    if config.multiplier < 1.0 {
        errors.push(ValidationError::new(format!("{field}.multiplier"), "must be at least 1.0"));
    }
    if !(0.0..=1.0).contains(&config.jitter) {
        errors.push(ValidationError::new(format!("{field}.jitter"), "must be between 0.0 and 1.0"));
    }
}

fn check_url(errors: &mut Vec<ValidationError>, field: &str, value: &str, schemes: &[&str]) {
    match url::Url::parse(value) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        Ok(parsed) => errors.push(ValidationError::new(
            field,
            format!("unsupported scheme '{}'", parsed.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("invalid URL: {e}"))),
    }
}
