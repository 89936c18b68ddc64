//! Middleware chain execution.
//!
//! # Responsibilities
//! - Define the `Stage` trait every middleware and handler implements
//! - Run a frozen chain of stages in registration order
//! - Translate panics at a stage boundary into the error continuation
//!
//! # Design Decisions
//! - Continuation is a tagged return value, not a callback: a stage
//!   yields `Next`, `Respond(..)` or `Done`, or fails with an error
//! - `Next` from the last stage is an error (there is nothing left to
//!   advance to); the funnel reports it with a fixed message
//! - Chains are immutable after construction and shared across
//!   requests behind `Arc`

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;

use crate::http::context::Context;
use crate::pipeline::error::EngineError;

/// Boxed future tied to the borrow of the context it runs against.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal value a stage hands to the response finalizer.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Complete with an empty body.
    Empty,
    /// Complete as `text/plain`.
    Text(String),
    /// Complete as pretty-printed `application/json`.
    Json(Value),
}

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Advance to the next stage.
    Next,
    /// Stop the chain and finalize with this payload.
    Respond(Payload),
    /// Stop the chain; the stage wrote the response itself.
    Done,
}

/// Outcome of a whole chain run.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    /// A stage produced a payload for the finalizer.
    Respond(Payload),
    /// A stage took manual control of the response.
    Manual,
}

/// A single unit of request-processing work.
///
/// Implementations must be shareable across concurrent requests; all
/// per-request state lives in the `Context`.
pub trait Stage: Send + Sync {
    fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Step, EngineError>>;
}

/// Adapter turning a closure or free function into a `Stage`.
pub struct FnStage<F>(F);

impl<F> FnStage<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Step, EngineError>> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> Stage for FnStage<F>
where
    F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Step, EngineError>> + Send + Sync,
{
    fn run<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, Result<Step, EngineError>> {
        (self.0)(ctx)
    }
}

/// An ordered, immutable sequence of stages.
pub struct Chain {
    stages: Vec<Arc<dyn Stage>>,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the chain to its first terminal outcome.
    ///
    /// An error at stage `i` means stages `i+1..n` never run. A panic
    /// inside a stage is captured and converted into
    /// `EngineError::Handler` so one misbehaving handler cannot take
    /// down the connection task.
    pub async fn execute(&self, ctx: &mut Context) -> Result<ChainOutcome, EngineError> {
        let last = self.stages.len().checked_sub(1);

        for (index, stage) in self.stages.iter().enumerate() {
            let step = match AssertUnwindSafe(stage.run(ctx)).catch_unwind().await {
                Ok(Ok(step)) => step,
                Ok(Err(err)) => return Err(err),
                Err(panic) => return Err(EngineError::Handler(panic_message(&panic))),
            };

            match step {
                Step::Next => {
                    if Some(index) == last {
                        return Err(EngineError::ChainExhausted);
                    }
                }
                Step::Respond(payload) => return Ok(ChainOutcome::Respond(payload)),
                Step::Done => return Ok(ChainOutcome::Manual),
            }
        }

        // Empty chains have nothing to advance to either.
        Err(EngineError::ChainExhausted)
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_ctx() -> Context {
        Context::new(
            Method::GET,
            "/test".parse().unwrap(),
            HashMap::new(),
            None,
        )
    }

    fn stage<F>(f: F) -> Arc<dyn Stage>
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Step, EngineError>>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(FnStage::new(f))
    }

    #[tokio::test]
    async fn runs_stages_in_registration_order() {
        static ORDER: AtomicUsize = AtomicUsize::new(0);

        let chain = Chain::new(vec![
            stage(|_ctx| {
                Box::pin(async {
                    assert_eq!(ORDER.fetch_add(1, Ordering::SeqCst), 0);
                    Ok(Step::Next)
                })
            }),
            stage(|_ctx| {
                Box::pin(async {
                    assert_eq!(ORDER.fetch_add(1, Ordering::SeqCst), 1);
                    Ok(Step::Respond(Payload::Json(json!({ "done": true }))))
                })
            }),
        ]);

        let mut ctx = test_ctx();
        let outcome = chain.execute(&mut ctx).await.unwrap();
        assert_eq!(
            outcome,
            ChainOutcome::Respond(Payload::Json(json!({ "done": true })))
        );
        assert_eq!(ORDER.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn error_short_circuits_remaining_stages() {
        let chain = Chain::new(vec![
            stage(|_ctx| {
                Box::pin(async { Err(EngineError::Handler("boom".to_string())) })
            }),
            stage(|_ctx| {
                Box::pin(async {
                    panic!("this stage must never run");
                })
            }),
        ]);

        let mut ctx = test_ctx();
        let err = chain.execute(&mut ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn next_from_last_stage_is_exhaustion() {
        let chain = Chain::new(vec![stage(|_ctx| Box::pin(async { Ok(Step::Next) }))]);

        let mut ctx = test_ctx();
        let err = chain.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::ChainExhausted));
        assert_eq!(
            err.to_string(),
            "The 'next' function does not have any subsequent function."
        );
    }

    #[tokio::test]
    async fn empty_chain_is_exhaustion() {
        let chain = Chain::new(Vec::new());
        let mut ctx = test_ctx();
        assert!(matches!(
            chain.execute(&mut ctx).await,
            Err(EngineError::ChainExhausted)
        ));
    }

    #[tokio::test]
    async fn panic_becomes_handler_error() {
        let chain = Chain::new(vec![stage(|_ctx| {
            Box::pin(async {
                panic!("stage exploded");
            })
        })]);

        let mut ctx = test_ctx();
        let err = chain.execute(&mut ctx).await.unwrap_err();
        match err {
            EngineError::Handler(msg) => assert_eq!(msg, "stage exploded"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn done_reports_manual_control() {
        fn manual(ctx: &mut Context) -> BoxFuture<'_, Result<Step, EngineError>> {
            Box::pin(async move {
                ctx.res.send("written by hand");
                Ok(Step::Done)
            })
        }

        let chain = Chain::new(vec![Arc::new(FnStage::new(manual)) as Arc<dyn Stage>]);

        let mut ctx = test_ctx();
        assert_eq!(chain.execute(&mut ctx).await.unwrap(), ChainOutcome::Manual);
        assert!(ctx.res.ended());
    }
}
