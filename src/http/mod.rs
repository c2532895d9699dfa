//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, graceful shutdown)
//!     → request.rs (request ID, classification, client IP, header filtering)
//!     → [proxy::forward or session::router]
//!     → response.rs (CORS, relayed header filtering)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestClass, RequestId, X_REQUEST_ID};
pub use server::HttpServer;
