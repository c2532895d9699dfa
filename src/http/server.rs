//! HTTP server setup.
//!
//! # Responsibilities
//! - Build the Axum router for each listener (forwarding proxy, session endpoint)
//! - Wire up middleware (tracing, in-flight limit)
//! - Serve a listener until the shutdown signal fires

use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::{ForwardConfig, SessionConfig};
use crate::proxy::{forward, ProxyState};
use crate::session::{self, SessionGateway};

/// One listener's worth of HTTP service.
pub struct HttpServer {
    name: &'static str,
    router: Router,
}

impl HttpServer {
    /// The forwarding proxy: every method on every path goes to `forward`.
    pub fn forwarding(config: ForwardConfig) -> Result<Self, reqwest::Error> {
        let max_in_flight = config.max_connections;
        let state = ProxyState::new(config)?;

        let router = Router::new()
            .fallback(forward)
            .with_state(state)
            .layer(GlobalConcurrencyLimitLayer::new(max_in_flight))
            .layer(TraceLayer::new_for_http());

        Ok(Self { name: "proxy", router })
    }

    /// The session endpoint.
    pub fn sessions(config: &SessionConfig, gateway: Arc<SessionGateway>) -> Self {
        let router = session::routes(gateway, &config.endpoint).layer(TraceLayer::new_for_http());
        Self { name: "sessions", router }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The assembled router, for driving the service without a listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Accept connections on `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(server = self.name, address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!(server = self.name, "HTTP server stopped");
        Ok(())
    }
}
