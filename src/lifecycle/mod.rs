//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//! ```
//!
//! # Design Decisions
//! - One broadcast channel fans the signal out to every task
//! - Draining is cooperative: connections finish their in-flight
//!   request before closing

pub mod shutdown;

pub use shutdown::Shutdown;
