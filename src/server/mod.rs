//! Application assembly and serving.
//!
//! # Data Flow
//! ```text
//! App (builder: middleware, routes, hooks, parser toggles)
//!     → build() freezes everything into an Engine
//!     → serve.rs (accept loop, graceful shutdown)
//!     → Engine::handle (context assembly → chain → finalizer)
//! ```
//!
//! # Design Decisions
//! - Registration only exists on the builder; the running engine is
//!   immutable and shared behind `Arc`
//! - Parser middlewares run during context assembly, ahead of the
//!   user chain

pub mod app;
pub mod serve;

pub use app::{App, Engine};
