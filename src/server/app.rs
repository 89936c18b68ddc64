//! Application builder and request entry point.
//!
//! # Responsibilities
//! - Collect middleware, routes and hooks before serving
//! - Freeze them into an immutable `Engine`
//! - Drive one request through parsers, chain, funnel and finalizer
//!
//! # Design Decisions
//! - Global middleware is prepended to every route chain at build
//!   time, so lookup hands back one ready-to-run chain
//! - Upload and stream failures route to the error funnel like any
//!   stage error
//! - Body decode failures never fail the request (empty mapping)

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, Bytes};
use http_body_util::Full;
use hyper::{Method, Request, Response};
use serde_json::Value;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::schema::EngineConfig;
use crate::http::body;
use crate::http::context::Context;
use crate::http::cookies::parse_cookie_header;
use crate::http::multipart::{self, UploadOptions};
use crate::http::response::Formatter;
use crate::pipeline::chain::{BoxFuture, Chain, ChainOutcome, Stage};
use crate::pipeline::error::{funnel, EngineError, ErrorHook};
use crate::routing::table::{MethodFilter, RouteTable, RouteTableBuilder};

/// Builder for an [`Engine`].
///
/// Everything registered here is frozen by [`build`](Self::build);
/// there is no registration surface on the running engine.
#[derive(Default)]
pub struct App {
    global: Vec<Arc<dyn Stage>>,
    routes: Vec<(MethodFilter, String, Vec<Arc<dyn Stage>>)>,
    prefix: Option<String>,
    body_parser: bool,
    cookie_parser: bool,
    upload: Option<UploadOptions>,
    access_log: bool,
    formatter: Option<Arc<Formatter>>,
    error_handler: Option<Arc<ErrorHook>>,
    not_found: Option<Arc<dyn Stage>>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        let mut app = Self::new();

        app.prefix = config.server.global_prefix.clone();
        app.access_log = config.logging.access_log;

        if config.upload.enabled {
            app.upload = Some(UploadOptions {
                limit: if config.upload.limit_bytes == 0 {
                    u64::MAX
                } else {
                    config.upload.limit_bytes
                },
                temp_dir: config.upload.temp_dir.clone().into(),
                remove_temp_files: config.upload.remove_temp_files,
                remove_delay: std::time::Duration::from_secs(config.upload.remove_delay_secs),
            });
        }

        app
    }

    /// Register a global middleware, run ahead of every route chain.
    pub fn middleware(mut self, stage: impl Stage + 'static) -> Self {
        self.global.push(Arc::new(stage));
        self
    }

    /// Register a route with an arbitrary stage list.
    pub fn route(
        mut self,
        filter: MethodFilter,
        path: &str,
        stages: Vec<Arc<dyn Stage>>,
    ) -> Self {
        self.routes.push((filter, path.to_string(), stages));
        self
    }

    pub fn get(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(MethodFilter::Only(Method::GET), path, vec![Arc::new(stage)])
    }

    pub fn post(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(MethodFilter::Only(Method::POST), path, vec![Arc::new(stage)])
    }

    pub fn put(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(MethodFilter::Only(Method::PUT), path, vec![Arc::new(stage)])
    }

    pub fn patch(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(
            MethodFilter::Only(Method::PATCH),
            path,
            vec![Arc::new(stage)],
        )
    }

    pub fn delete(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(
            MethodFilter::Only(Method::DELETE),
            path,
            vec![Arc::new(stage)],
        )
    }

    /// Register a route answering every method.
    pub fn all(self, path: &str, stage: impl Stage + 'static) -> Self {
        self.route(MethodFilter::Any, path, vec![Arc::new(stage)])
    }

    /// Prefix every registered route.
    pub fn global_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// Enable the buffered body decoder.
    pub fn body_parser(mut self) -> Self {
        self.body_parser = true;
        self
    }

    /// Enable the cookie parser.
    pub fn cookie_parser(mut self) -> Self {
        self.cookie_parser = true;
        self
    }

    /// Enable the streaming multipart parser.
    pub fn file_upload(mut self, options: UploadOptions) -> Self {
        self.upload = Some(options);
        self
    }

    /// Emit one access-log event per completed request.
    pub fn logger(mut self) -> Self {
        self.access_log = true;
        self
    }

    /// Install the response formatter hook.
    pub fn format_response(
        mut self,
        hook: impl Fn(Value, u16) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.formatter = Some(Arc::new(hook));
        self
    }

    /// Install the custom error handler.
    pub fn error_handler(
        mut self,
        hook: impl for<'a> Fn(&'a EngineError, &'a mut Context) -> BoxFuture<'a, ()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.error_handler = Some(Arc::new(hook));
        self
    }

    /// Install the handler for unmatched paths.
    pub fn not_found(mut self, stage: impl Stage + 'static) -> Self {
        self.not_found = Some(Arc::new(stage));
        self
    }

    /// Freeze the application into an immutable engine.
    pub fn build(self) -> Engine {
        let mut builder = RouteTableBuilder::new();

        for (filter, path, stages) in self.routes {
            let pattern = join_prefix(self.prefix.as_deref(), &path);
            let chain: Vec<Arc<dyn Stage>> =
                self.global.iter().cloned().chain(stages).collect();
            builder.add(filter, &pattern, Chain::new(chain));
        }

        let table = builder.build();
        tracing::debug!(routes = table.len(), "route table frozen");

        Engine {
            table,
            body_parser: self.body_parser,
            cookie_parser: self.cookie_parser,
            upload: self.upload,
            access_log: self.access_log,
            formatter: self.formatter,
            error_handler: self.error_handler,
            not_found: self.not_found.map(|stage| Arc::new(Chain::new(vec![stage]))),
        }
    }
}

fn join_prefix(prefix: Option<&str>, path: &str) -> String {
    match prefix {
        None => path.to_string(),
        Some(prefix) => format!(
            "/{}/{}",
            prefix.trim_matches('/'),
            path.trim_start_matches('/')
        ),
    }
}

/// The frozen request pipeline engine.
pub struct Engine {
    table: RouteTable,
    body_parser: bool,
    cookie_parser: bool,
    upload: Option<UploadOptions>,
    access_log: bool,
    formatter: Option<Arc<Formatter>>,
    error_handler: Option<Arc<ErrorHook>>,
    not_found: Option<Arc<Chain>>,
}

impl Engine {
    /// Drive one request through the pipeline.
    ///
    /// Never fails: every error path resolves to a written response.
    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body + Send,
        B::Data: Buf + Send,
        B::Error: std::fmt::Display,
    {
        let request_id = Uuid::new_v4();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let span = tracing::info_span!(
            "request",
            id = %request_id,
            method = %method,
            path = %path,
        );

        self.process(req).instrument(span).await
    }

    async fn process<B>(&self, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: hyper::body::Body + Send,
        B::Data: Buf + Send,
        B::Error: std::fmt::Display,
    {
        let started = Instant::now();

        let (parts, body) = req.into_parts();
        let headers: HashMap<String, String> = parts
            .headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let mut ctx = Context::new(parts.method, parts.uri, headers, self.formatter.clone());

        if self.cookie_parser {
            let header = ctx.header("cookie").map(str::to_string);
            ctx.cookies = parse_cookie_header(header.as_deref()).unwrap_or_default();
        }

        let matched = self
            .table
            .lookup(&ctx.method, ctx.uri.path())
            .map(|found| (Arc::clone(found.chain), found.params));

        let Some((chain, params)) = matched else {
            self.reject_unmatched(&mut ctx).await;
            self.log_completed(&ctx, started);
            return ctx.res.into_response();
        };
        ctx.params = params;

        if let Err(err) = self.parse_inputs(&mut ctx, body).await {
            funnel(err, &mut ctx, self.error_handler.as_ref()).await;
            self.log_completed(&ctx, started);
            return ctx.res.into_response();
        }

        match chain.execute(&mut ctx).await {
            Ok(ChainOutcome::Respond(payload)) => ctx.res.complete(payload),
            Ok(ChainOutcome::Manual) => {}
            Err(err) => funnel(err, &mut ctx, self.error_handler.as_ref()).await,
        }

        self.log_completed(&ctx, started);
        ctx.res.into_response()
    }

    /// Decode the request body into the context.
    async fn parse_inputs<B>(&self, ctx: &mut Context, raw: B) -> Result<(), EngineError>
    where
        B: hyper::body::Body + Send,
        B::Data: Buf + Send,
        B::Error: std::fmt::Display,
    {
        let content_type = ctx.header("content-type").map(str::to_string);
        let is_multipart = content_type
            .as_deref()
            .map(|value| value.contains("multipart/form-data"))
            .unwrap_or(false);

        let body_method = matches!(
            ctx.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        );

        if is_multipart && body_method {
            if let Some(options) = &self.upload {
                let content_type = content_type.unwrap_or_default();
                let payload = multipart::parse_body(raw, &content_type, options).await?;
                for (name, value) in payload.fields {
                    ctx.body.insert(name, Value::String(value));
                }
                ctx.files = payload.files;
                return Ok(());
            }
        }

        if self.body_parser {
            let buffered = body::collect(raw).await?;
            ctx.body = body::decode(content_type.as_deref(), &buffered);
        }

        Ok(())
    }

    async fn reject_unmatched(&self, ctx: &mut Context) {
        match &self.not_found {
            Some(chain) => match chain.execute(ctx).await {
                Ok(ChainOutcome::Respond(payload)) => ctx.res.complete(payload),
                Ok(ChainOutcome::Manual) => {}
                Err(err) => funnel(err, ctx, self.error_handler.as_ref()).await,
            },
            None => ctx.res.not_found(None),
        }
    }

    fn log_completed(&self, ctx: &Context, started: Instant) {
        if self.access_log {
            tracing::info!(
                status = ctx.res.status_code(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::chain::{FnStage, Payload, Step};
    use serde_json::json;

    type StageResult = Result<Step, EngineError>;

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = body::collect(response.into_body()).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn routes_a_request_to_its_handler() {
        fn hello(_ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async { Ok(Step::Respond(Payload::Json(json!({ "hi": true })))) })
        }

        let engine = App::new().get("/hello", FnStage::new(hello)).build();

        let response = engine.handle(get("/hello")).await;
        assert_eq!(response.status(), 200);
        assert!(body_string(response).await.contains("hi"));
    }

    #[tokio::test]
    async fn unmatched_path_writes_default_404() {
        let engine = App::new().build();
        let response = engine.handle(get("/missing")).await;
        assert_eq!(response.status(), 404);
        let body = body_string(response).await;
        assert!(body.contains(
            "The url '/missing' was not found. Please re-check the your url again"
        ));
    }

    #[tokio::test]
    async fn params_reach_the_handler() {
        fn show_user(ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async move {
                let id = ctx.params.get("id").cloned().unwrap_or_default();
                Ok(Step::Respond(Payload::Json(json!({ "id": id }))))
            })
        }

        let engine = App::new().get("/users/:id", FnStage::new(show_user)).build();

        let response = engine.handle(get("/users/42")).await;
        let body = body_string(response).await;
        assert!(body.contains("42"));
    }

    #[tokio::test]
    async fn global_prefix_applies_to_routes() {
        fn empty(_ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async { Ok(Step::Respond(Payload::Empty)) })
        }

        let engine = App::new()
            .global_prefix("/api/v1")
            .get("/users", FnStage::new(empty))
            .build();

        assert_eq!(engine.handle(get("/api/v1/users")).await.status(), 200);
        assert_eq!(engine.handle(get("/users")).await.status(), 404);
    }

    #[tokio::test]
    async fn chain_exhaustion_reports_the_fixed_message() {
        fn passthrough(_ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async { Ok(Step::Next) })
        }

        let engine = App::new().get("/next", FnStage::new(passthrough)).build();

        let response = engine.handle(get("/next")).await;
        assert_eq!(response.status(), 500);
        let body = body_string(response).await;
        assert!(body.contains("The 'next' function does not have any subsequent function."));
    }

    fn failing(_ctx: &mut Context) -> BoxFuture<'_, StageResult> {
        Box::pin(async { Err(EngineError::Handler("nope".to_string())) })
    }

    #[tokio::test]
    async fn error_handler_owns_the_response() {
        fn custom<'a>(err: &'a EngineError, ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async move {
                let message = err.to_string();
                ctx.res.status(422).json(json!({ "custom": message }));
            })
        }

        let engine = App::new()
            .get("/fail", FnStage::new(failing))
            .error_handler(custom)
            .build();

        let response = engine.handle(get("/fail")).await;
        assert_eq!(response.status(), 422);
        assert!(body_string(response).await.contains("nope"));
    }

    #[tokio::test]
    async fn lazy_error_handler_still_resolves() {
        fn lazy<'a>(_err: &'a EngineError, _ctx: &'a mut Context) -> BoxFuture<'a, ()> {
            Box::pin(async {})
        }

        let engine = App::new()
            .get("/fail", FnStage::new(failing))
            .error_handler(lazy)
            .build();

        let response = engine.handle(get("/fail")).await;
        assert_eq!(response.status(), 500);
        assert!(body_string(response).await.contains("nope"));
    }

    #[tokio::test]
    async fn body_parser_decodes_json() {
        fn echo_name(ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async move {
                Ok(Step::Respond(Payload::Json(json!({
                    "name": ctx.body.get("name").cloned().unwrap_or(Value::Null)
                }))))
            })
        }

        let engine = App::new()
            .body_parser()
            .post("/echo", FnStage::new(echo_name))
            .build();

        let request = Request::builder()
            .method(Method::POST)
            .uri("/echo")
            .header("content-type", "application/json")
            .body(Full::new(Bytes::from_static(br#"{"name":"jane"}"#)))
            .unwrap();

        let body = body_string(engine.handle(request).await).await;
        assert!(body.contains("jane"));
    }

    #[tokio::test]
    async fn cookie_parser_fills_the_context() {
        fn whoami(ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async move {
                let session = ctx.cookies.get("session").cloned().unwrap_or_default();
                Ok(Step::Respond(Payload::Text(session)))
            })
        }

        let engine = App::new()
            .cookie_parser()
            .get("/whoami", FnStage::new(whoami))
            .build();

        let request = Request::builder()
            .method(Method::GET)
            .uri("/whoami")
            .header("cookie", "session=abc123")
            .body(Full::new(Bytes::new()))
            .unwrap();

        assert_eq!(body_string(engine.handle(request).await).await, "abc123");
    }

    #[tokio::test]
    async fn global_middleware_runs_before_route_stage() {
        fn tag(ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async move {
                ctx.res.set_header("X-Seen", "yes");
                Ok(Step::Next)
            })
        }

        fn empty(_ctx: &mut Context) -> BoxFuture<'_, StageResult> {
            Box::pin(async { Ok(Step::Respond(Payload::Empty)) })
        }

        let engine = App::new()
            .middleware(FnStage::new(tag))
            .get("/x", FnStage::new(empty))
            .build();

        let response = engine.handle(get("/x")).await;
        assert_eq!(
            response.headers().get("X-Seen").map(|v| v.to_str().unwrap()),
            Some("yes")
        );
    }
}
