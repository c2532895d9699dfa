//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the session gateway and the servers for enabled listeners
//! - Bind listeners (fail fast on any bind error)
//! - Spawn the servers and background tasks (idle reaper, session teardown)
//!
//! # Design Decisions
//! - Every listener is bound before any server starts accepting
//! - Config arrives already validated
//! - On shutdown every session is closed, which ends open push streams;
//!   graceful shutdown would otherwise wait on them forever

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::GatewayConfig;
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::session::{CloseReason, HandlerFactory, IdleReaper, SessionGateway};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to bind {server} listener on {address}: {source}")]
    Bind {
        server: &'static str,
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build upstream HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("nothing to run: both proxy and sessions are disabled")]
    NothingEnabled,
}

/// Handles to a started gateway.
pub struct Running {
    pub proxy_addr: Option<SocketAddr>,
    pub session_addr: Option<SocketAddr>,
    pub gateway: Option<Arc<SessionGateway>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// Wait for every server and background task to finish.
    pub async fn wait(self) {
        for task in self.tasks {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "Gateway task panicked");
            }
        }
    }
}

/// Bind enabled listeners and start serving.
pub async fn launch(
    config: GatewayConfig,
    factory: Arc<dyn HandlerFactory>,
    shutdown: &Shutdown,
) -> Result<Running, StartupError> {
    if !config.proxy.enabled && !config.sessions.enabled {
        return Err(StartupError::NothingEnabled);
    }

    let mut servers = Vec::new();
    let mut running = Running {
        proxy_addr: None,
        session_addr: None,
        gateway: None,
        tasks: Vec::new(),
    };

    if config.proxy.enabled {
        let listener = bind("proxy", &config.proxy.bind_address).await?;
        running.proxy_addr = listener.local_addr().ok();
        tracing::info!(
            address = ?running.proxy_addr,
            stream_path = %config.proxy.stream_path,
            request_timeout_ms = config.proxy.timeouts.request_ms,
            stream_timeout_ms = config.proxy.timeouts.stream_ms,
            bridge_host = %config.proxy.loopback.bridge_host,
            "Forwarding proxy configured"
        );
        servers.push((HttpServer::forwarding(config.proxy.clone())?, listener));
    }

    if config.sessions.enabled {
        let listener = bind("sessions", &config.sessions.bind_address).await?;
        running.session_addr = listener.local_addr().ok();
        let gateway = SessionGateway::new(&config.sessions, factory);
        tracing::info!(
            address = ?running.session_addr,
            endpoint = %config.sessions.endpoint,
            max_sessions = config.sessions.max_sessions,
            "Session router configured"
        );

        if let Some(idle_timeout) = config.sessions.idle_timeout() {
            let reaper = IdleReaper::new(
                gateway.clone(),
                idle_timeout,
                std::time::Duration::from_secs(config.sessions.reap_interval_secs),
            );
            running.tasks.push(tokio::spawn(reaper.run(shutdown.subscribe())));
        }

        let mut signal = shutdown.subscribe();
        let teardown = gateway.clone();
        running.tasks.push(tokio::spawn(async move {
            let _ = signal.recv().await;
            let closed = teardown.close_all(CloseReason::Shutdown).await;
            tracing::info!(closed, "Sessions closed for shutdown");
        }));

        servers.push((HttpServer::sessions(&config.sessions, gateway.clone()), listener));
        running.gateway = Some(gateway);
    }

    for (server, listener) in servers {
        let name = server.name();
        let signal = shutdown.subscribe();
        running.tasks.push(tokio::spawn(async move {
            if let Err(err) = server.run(listener, signal).await {
                tracing::error!(server = name, error = %err, "HTTP server failed");
            }
        }));
    }

    Ok(running)
}

async fn bind(server: &'static str, address: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address).await.map_err(|source| StartupError::Bind {
        server,
        address: address.to_string(),
        source,
    })
}
