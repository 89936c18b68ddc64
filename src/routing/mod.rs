//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → table.rs (pattern lookup, parameter capture)
//!     → Return: matched chain + params, or NoMatch
//!
//! Table Compilation (at startup):
//!     registered routes
//!     → Parse patterns into segments
//!     → Freeze as immutable RouteTable
//! ```
//!
//! # Design Decisions
//! - Routes compiled before the listener starts, immutable at runtime
//! - No regex in the hot path (segment comparison only)
//! - Literal segments outrank parameters when several patterns match

pub mod table;

pub use table::{MethodFilter, RouteMatch, RouteTable, RouteTableBuilder};
