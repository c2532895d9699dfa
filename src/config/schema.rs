//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::http::request::RequestClass;

/// Root configuration for the gateway process.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Forwarding proxy settings.
    pub proxy: ForwardConfig,

    /// Session router settings.
    pub sessions: SessionConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Forwarding proxy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ForwardConfig {
    /// Start the forwarding proxy listener.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:3001").
    pub bind_address: String,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,

    /// Inbound path that selects the streaming classification.
    pub stream_path: String,

    /// Upstream deadlines.
    pub timeouts: TimeoutConfig,

    /// Loopback host rewriting.
    pub loopback: LoopbackConfig,

    /// CORS response headers.
    pub cors: CorsConfig,

    /// Maximum buffered request body size in bytes.
    pub max_body_bytes: usize,

    /// Include error details and request id in error bodies (development only).
    pub expose_error_details: bool,
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:3001".to_string(),
            max_connections: 10_000,
            stream_path: "/api/stream".to_string(),
            timeouts: TimeoutConfig::default(),
            loopback: LoopbackConfig::default(),
            cors: CorsConfig::default(),
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            expose_error_details: false,
        }
    }
}

impl ForwardConfig {
    /// Deadline applied to an upstream call of the given class.
    pub fn deadline_for(&self, class: RequestClass) -> Duration {
        match class {
            RequestClass::Streaming => Duration::from_millis(self.timeouts.stream_ms),
            RequestClass::Standard => Duration::from_millis(self.timeouts.request_ms),
        }
    }
}

/// Upstream deadlines in milliseconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for standard (buffered) requests.
    pub request_ms: u64,

    /// Deadline for streaming requests.
    pub stream_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 120_000,
            stream_ms: 300_000,
        }
    }
}

/// Rewriting of loopback targets to the container-to-host bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoopbackConfig {
    pub enabled: bool,

    /// Host that replaces `localhost`, `127.0.0.1` and `[::1]`.
    pub bridge_host: String,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bridge_host: "host.docker.internal".to_string(),
        }
    }
}

/// CORS header values set on every proxy response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allow_methods: String,
    pub allow_headers: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_methods: "GET, POST, PUT, DELETE, PATCH, OPTIONS".to_string(),
            allow_headers: "Content-Type, Authorization, X-Requested-With, Accept, Origin".to_string(),
        }
    }
}

/// Session router configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Start the session router listener.
    pub enabled: bool,

    /// Bind address (e.g., "0.0.0.0:3000").
    pub bind_address: String,

    /// Path of the session endpoint.
    pub endpoint: String,

    /// Maximum number of live sessions.
    pub max_sessions: usize,

    /// Close sessions idle for longer than this many seconds (0 disables).
    pub idle_timeout_secs: u64,

    /// How often the idle reaper scans the registry.
    pub reap_interval_secs: u64,

    /// Buffered notifications per session push channel.
    pub notification_buffer: usize,

    /// Name reported by the built-in handler in `initialize` results.
    pub server_name: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:3000".to_string(),
            endpoint: "/mcp".to_string(),
            max_sessions: 1024,
            idle_timeout_secs: 0,
            reap_interval_secs: 30,
            notification_buffer: 64,
            server_name: "relay-gateway".to_string(),
        }
    }
}

impl SessionConfig {
    /// Idle timeout, if the reaper is enabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}
