//! Target URL resolution.
//!
//! # Responsibilities
//! - Extract the `targetUrl` query parameter
//! - Require an absolute http(s) URL
//! - Rewrite loopback hosts to the container-to-host bridge

use url::Url;

use crate::config::LoopbackConfig;
use crate::proxy::error::ProxyError;

/// Name of the query parameter carrying the target.
pub const TARGET_PARAM: &str = "targetUrl";

/// Host spellings treated as loopback.
const LOOPBACK_HOSTS: [&str; 3] = ["localhost", "127.0.0.1", "[::1]"];

/// A target URL ready for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTarget {
    url: Url,
    rewritten_from: Option<String>,
}

impl ForwardTarget {
    /// Resolve the target from the inbound query string.
    pub fn from_query(query: Option<&str>, loopback: &LoopbackConfig) -> Result<Self, ProxyError> {
        let raw = query
            .and_then(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .find(|(key, _)| key == TARGET_PARAM)
                    .map(|(_, value)| value.into_owned())
            })
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(ProxyError::missing_target)?;

        Self::parse(raw.trim(), loopback)
    }

    /// Parse an absolute URL and apply the loopback rewrite.
    pub fn parse(raw: &str, loopback: &LoopbackConfig) -> Result<Self, ProxyError> {
        let mut url = Url::parse(raw).map_err(ProxyError::invalid_target)?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::invalid_target(format!(
                "unsupported scheme {:?}",
                url.scheme()
            )));
        }

        let host = url
            .host_str()
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| ProxyError::invalid_target("missing host"))?;

        let mut rewritten_from = None;
        if loopback.enabled && LOOPBACK_HOSTS.contains(&host.as_str()) {
            url.set_host(Some(&loopback.bridge_host))
                .map_err(|e| ProxyError::invalid_target(format!("bridge host: {}", e)))?;
            tracing::info!(
                from = %host,
                to = %loopback.bridge_host,
                "Rewrote loopback target to bridge host"
            );
            rewritten_from = Some(host);
        }

        Ok(Self { url, rewritten_from })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn into_url(self) -> Url {
        self.url
    }

    /// Original loopback host, if the target was rewritten.
    pub fn rewritten_from(&self) -> Option<&str> {
        self.rewritten_from.as_deref()
    }
}
