//! Session-multiplexed JSON-RPC gateway.
//!
//! # Data Flow
//! ```text
//! HTTP (router.rs)
//!     → gateway.rs (route / notify / terminate)
//!     → registry.rs (session ID → Session)
//!     → transport.rs + SessionHandler (per-session protocol logic)
//!
//! Transport closes → SessionEvent → gateway event task → registry.remove
//! reaper.rs → gateway.expire_idle
//! ```

pub mod gateway;
pub mod jsonrpc;
pub mod minimal;
pub mod reaper;
pub mod registry;
pub mod router;
pub mod transport;

pub use gateway::{RouteError, SessionGateway};
pub use reaper::IdleReaper;
pub use router::{routes, MCP_SESSION_ID};
pub use transport::{CloseReason, HandlerFactory, SessionHandler, SessionTransport};
