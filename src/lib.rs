//! Javelin request pipeline engine.
//!
//! A request-processing engine sitting between hyper's socket-level
//! HTTP server and application handler code.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌────────────────────────────────────────────────┐
//!                    │                    ENGINE                      │
//!                    │                                                │
//!   Client Request   │  ┌────────┐   ┌─────────┐   ┌──────────────┐  │
//!   ─────────────────┼─▶│ server │──▶│ routing │──▶│ http context │  │
//!                    │  │ accept │   │  table  │   │ + parsers    │  │
//!                    │  └────────┘   └─────────┘   └──────┬───────┘  │
//!                    │                                    │          │
//!                    │                                    ▼          │
//!                    │                            ┌──────────────┐   │
//!                    │                            │  pipeline    │   │
//!                    │                            │ chain + funnel   │
//!                    │                            └──────┬───────┘   │
//!                    │                                   │           │
//!   Client Response  │  ┌──────────────┐                 │           │
//!   ◀────────────────┼──│  finalizer   │◀────────────────┘           │
//!                    │  │ single write │                             │
//!                    │  └──────────────┘                             │
//!                    │                                                │
//!                    │  Cross-cutting: config, lifecycle, logging     │
//!                    └────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod pipeline;
pub mod routing;
pub mod server;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::EngineConfig;
pub use http::context::Context;
pub use http::multipart::{UploadOptions, UploadedFile};
pub use http::response::Responder;
pub use lifecycle::Shutdown;
pub use pipeline::chain::{BoxFuture, FnStage, Payload, Stage, Step};
pub use pipeline::error::EngineError;
pub use server::app::{App, Engine};
