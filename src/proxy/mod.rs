//! Forwarding proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request
//!     → forward.rs (classify, CORS, access log)
//!     → target.rs (extract targetUrl, loopback rewrite)
//!     → upstream call under a Deadline
//!     → streamed or buffered relay
//!     → error.rs (taxonomy → status + JSON body)
//! ```

pub mod error;
pub mod forward;
pub mod target;

pub use error::{ErrorKind, ProxyError};
pub use forward::{forward, ProxyState};
pub use target::ForwardTarget;
