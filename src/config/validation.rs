//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, limits > 0, addresses parse)
//! - Validate path shapes (stream path and session endpoint)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: invalid bind address {value:?}")]
    BindAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must start with '/' (got {value:?})")]
    Path { field: &'static str, value: String },

    #[error("proxy.loopback.bridge_host must not be empty")]
    EmptyBridgeHost,
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let proxy = &config.proxy;
    check_bind(&mut errors, "proxy.bind_address", &proxy.bind_address);
    check_nonzero(&mut errors, "proxy.timeouts.request_ms", proxy.timeouts.request_ms);
    check_nonzero(&mut errors, "proxy.timeouts.stream_ms", proxy.timeouts.stream_ms);
    check_nonzero(&mut errors, "proxy.max_connections", proxy.max_connections as u64);
    check_nonzero(&mut errors, "proxy.max_body_bytes", proxy.max_body_bytes as u64);
    check_path(&mut errors, "proxy.stream_path", &proxy.stream_path);
    if proxy.loopback.enabled && proxy.loopback.bridge_host.trim().is_empty() {
        errors.push(ValidationError::EmptyBridgeHost);
    }

    let sessions = &config.sessions;
    check_bind(&mut errors, "sessions.bind_address", &sessions.bind_address);
    check_path(&mut errors, "sessions.endpoint", &sessions.endpoint);
    check_nonzero(&mut errors, "sessions.max_sessions", sessions.max_sessions as u64);
    check_nonzero(&mut errors, "sessions.notification_buffer", sessions.notification_buffer as u64);
    if sessions.idle_timeout_secs > 0 {
        check_nonzero(&mut errors, "sessions.reap_interval_secs", sessions.reap_interval_secs);
    }

    let observability = &config.observability;
    if observability.metrics_enabled {
        check_bind(&mut errors, "observability.metrics_address", &observability.metrics_address);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_bind(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress { field, value: value.to_string() });
    }
}

fn check_nonzero(errors: &mut Vec<ValidationError>, field: &'static str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::Zero { field });
    }
}

fn check_path(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if !value.starts_with('/') {
        errors.push(ValidationError::Path { field, value: value.to_string() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = GatewayConfig::default();
        config.proxy.bind_address = "nowhere".into();
        config.proxy.timeouts.stream_ms = 0;
        config.proxy.stream_path = "api/stream".into();
        config.proxy.loopback.bridge_host = " ".into();
        config.sessions.max_sessions = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::Zero { field: "proxy.timeouts.stream_ms" }));
        assert!(errors.contains(&ValidationError::EmptyBridgeHost));
    }

    #[test]
    fn reap_interval_only_matters_with_idle_timeout() {
        let mut config = GatewayConfig::default();
        config.sessions.reap_interval_secs = 0;
        assert!(validate_config(&config).is_ok());

        config.sessions.idle_timeout_secs = 60;
        assert_eq!(
            validate_config(&config).unwrap_err(),
            vec![ValidationError::Zero { field: "sessions.reap_interval_secs" }]
        );
    }
}
