//! Middleware chain executor and error funnel.

pub mod chain;
pub mod error;

pub use chain::{BoxFuture, Chain, ChainOutcome, FnStage, Payload, Stage, Step};
pub use error::{funnel, EngineError, ErrorHook};
