//! Error taxonomy and the error funnel.
//!
//! # Responsibilities
//! - Define the one error type every stage and parser speaks
//! - Route errors to the registered error hook, or write the default
//!   500 body when no hook is installed
//! - Guarantee the response is resolved after the funnel runs, even
//!   when a hook forgets to write
//!
//! # Design Decisions
//! - Errors are values, not unwound exceptions; stages return
//!   `Result<Step, EngineError>` and the executor short-circuits
//! - Body decode failures are absorbed upstream (empty mapping) and
//!   never reach this module

use std::sync::Arc;

use thiserror::Error;

use crate::http::context::Context;
use crate::pipeline::chain::BoxFuture;

/// Errors that can surface from the request pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A file part exceeded the configured upload ceiling.
    #[error("The file '{field}' is too large to be uploaded. The limit is '{limit}' bytes.")]
    UploadTooLarge { field: String, limit: u64 },

    /// The request byte stream failed mid-flight.
    #[error("{0}")]
    Stream(String),

    /// The multipart payload could not be framed.
    #[error("{0}")]
    Multipart(String),

    /// A stage asked for the next stage when none remained.
    #[error("The 'next' function does not have any subsequent function.")]
    ChainExhausted,

    /// A handler returned an error or panicked.
    #[error("{0}")]
    Handler(String),
}

/// Custom error handler installed via `App::error_handler`.
///
/// The hook owns the response while it runs. If it returns without
/// ending the response, the default write still happens.
pub type ErrorHook =
    dyn for<'a> Fn(&'a EngineError, &'a mut Context) -> BoxFuture<'a, ()> + Send + Sync;

/// Route an error to its final response.
///
/// Every pipeline error passes through here exactly once. The funnel
/// never returns an error itself: its contract is that `ctx.res` is
/// ended afterwards.
pub async fn funnel(err: EngineError, ctx: &mut Context, hook: Option<&Arc<ErrorHook>>) {
    tracing::debug!(error = %err, "routing error to funnel");

    if let Some(hook) = hook {
        hook(&err, ctx).await;
        if !ctx.res.ended() {
            ctx.res.fail(&err.to_string());
        }
        return;
    }

    ctx.res.fail(&err.to_string());
}
