//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to upstream:
//!     → timeouts.rs (start deadline for the request class)
//!     → upstream call selects against the deadline
//!     → guard dropped on every exit path (timer released)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every upstream call has a deadline
//! - No automatic retries: at most one upstream attempt per inbound request

pub mod timeouts;

pub use timeouts::Deadline;
