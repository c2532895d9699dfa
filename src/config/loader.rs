//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::config::schema::{GatewayConfig, LogFormat};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {name}: {value:?}")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration: optional TOML file, then environment overrides, then validation.
pub fn load_config(path: Option<&Path>) -> Result<GatewayConfig, ConfigError> {
    let mut config = match path {
        Some(path) => parse_config(&fs::read_to_string(path)?)?,
        None => GatewayConfig::default(),
    };

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Parse a TOML document into a configuration (no validation).
pub fn parse_config(content: &str) -> Result<GatewayConfig, ConfigError> {
    Ok(toml::from_str(content)?)
}

/// Apply environment overrides using the given variable lookup.
///
/// # Environment Variables
///
/// - `PROXY_PORT`: forwarding proxy listen port (host part of the bind address is kept)
/// - `PROXY_TIMEOUT_MS`: standard request deadline
/// - `PROXY_STREAM_TIMEOUT_MS`: streaming request deadline
/// - `PROXY_BRIDGE_HOST`: host that replaces loopback targets
/// - `PROXY_DEV_ERRORS`: expose error details in error bodies
/// - `MCP_PORT`: session router listen port
/// - `MCP_SESSION_IDLE_SECS`: idle session timeout
/// - `GATEWAY_LOG_LEVEL`, `GATEWAY_LOG_FORMAT`: logging
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = parsed::<u16, _>(&lookup, "PROXY_PORT")? {
        config.proxy.bind_address = with_port(&config.proxy.bind_address, port);
    }
    if let Some(ms) = parsed(&lookup, "PROXY_TIMEOUT_MS")? {
        config.proxy.timeouts.request_ms = ms;
    }
    if let Some(ms) = parsed(&lookup, "PROXY_STREAM_TIMEOUT_MS")? {
        config.proxy.timeouts.stream_ms = ms;
    }
    if let Some(host) = lookup("PROXY_BRIDGE_HOST") {
        config.proxy.loopback.bridge_host = host;
    }
    if let Some(flag) = lookup("PROXY_DEV_ERRORS") {
        config.proxy.expose_error_details = parse_flag("PROXY_DEV_ERRORS", flag)?;
    }
    if let Some(port) = parsed::<u16, _>(&lookup, "MCP_PORT")? {
        config.sessions.bind_address = with_port(&config.sessions.bind_address, port);
    }
    if let Some(secs) = parsed(&lookup, "MCP_SESSION_IDLE_SECS")? {
        config.sessions.idle_timeout_secs = secs;
    }
    if let Some(level) = lookup("GATEWAY_LOG_LEVEL") {
        config.observability.log_level = level;
    }
    if let Some(format) = lookup("GATEWAY_LOG_FORMAT") {
        config.observability.log_format = match format.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            _ => return Err(ConfigError::Env { name: "GATEWAY_LOG_FORMAT", value: format }),
        };
    }
    Ok(())
}

fn parsed<T, F>(lookup: &F, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { name, value }),
        None => Ok(None),
    }
}

fn parse_flag(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env { name, value }),
    }
}

fn with_port(bind_address: &str, port: u16) -> String {
    let host = bind_address
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(bind_address);
    format!("{}:{}", host, port)
}
