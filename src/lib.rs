//! HTTP gateway: a streaming forwarding proxy and a session-multiplexed
//! JSON-RPC router.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod session;

pub use config::schema::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use session::SessionGateway;
