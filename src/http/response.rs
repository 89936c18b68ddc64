//! Response finalization.
//!
//! # Responsibilities
//! - Accumulate status, headers and body for the outgoing response
//! - Enforce the single-write invariant: headers are committed once,
//!   the body is ended once, and every later write is a no-op
//! - Negotiate the body representation (plain text vs pretty JSON)
//!   and run the optional response formatter hook
//!
//! # Design Decisions
//! - The responder never talks to the socket; it converts into a
//!   `hyper::Response` after the pipeline resolves
//! - JSON bodies are pretty-printed with two-space indentation
//! - A formatter hook returning a string switches the write to
//!   verbatim `text/plain`

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde_json::{json, Value};

use crate::http::cookies::{serialize_cookie, CookieValue};
use crate::pipeline::chain::Payload;

/// Response formatter hook: receives the payload and the current
/// status code, returns the value actually written.
pub type Formatter = dyn Fn(Value, u16) -> Value + Send + Sync;

/// Builder for the outgoing response, owned by one request.
pub struct Responder {
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    headers_sent: bool,
    ended: bool,
    formatter: Option<Arc<Formatter>>,
}

impl Responder {
    pub fn new(url: String, formatter: Option<Arc<Formatter>>) -> Self {
        Self {
            url,
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            headers_sent: false,
            ended: false,
            formatter,
        }
    }

    pub fn status_code(&self) -> u16 {
        self.status
    }

    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Commit status and content type. First write wins; later calls
    /// are no-ops.
    fn write_head(&mut self, status: u16, content_type: &str) {
        if self.headers_sent {
            return;
        }
        self.status = status;
        self.headers
            .push(("Content-Type".to_string(), content_type.to_string()));
        self.headers_sent = true;
    }

    fn end_bytes(&mut self, body: Vec<u8>) {
        if self.ended {
            return;
        }
        self.body = body;
        self.headers_sent = true;
        self.ended = true;
    }

    /// Add a header before the response is ended.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.ended {
            return;
        }
        self.headers.push((name.to_string(), value.to_string()));
    }

    /// Emit one `Set-Cookie` header per entry. Structured cookies with
    /// an empty value are skipped.
    pub fn set_cookies(&mut self, cookies: &HashMap<String, CookieValue>) {
        if self.ended {
            return;
        }
        for (name, value) in cookies {
            if let Some(serialized) = serialize_cookie(name, value) {
                self.headers.push(("Set-Cookie".to_string(), serialized));
            }
        }
    }

    fn write_json_value(&mut self, value: Value) {
        let value = match &self.formatter {
            Some(format) => format(value, self.status),
            None => value,
        };

        match value {
            Value::String(text) => {
                self.write_head(200, "text/plain");
                self.end_bytes(text.into_bytes());
            }
            Value::Null => {
                self.write_head(200, "application/json");
                self.end_bytes(Vec::new());
            }
            other => {
                self.write_head(200, "application/json");
                self.end_bytes(pretty(&other));
            }
        }
    }

    /// Write a JSON payload. String results (raw or produced by the
    /// formatter) are written verbatim as `text/plain`.
    pub fn json(&mut self, results: Value) {
        if self.ended {
            return;
        }
        self.write_json_value(results);
    }

    /// Write plain text with the current status.
    pub fn send(&mut self, text: &str) {
        if self.ended {
            return;
        }
        self.write_head(self.status, "text/plain");
        self.end_bytes(text.as_bytes().to_vec());
    }

    /// Write HTML with the current status.
    pub fn html(&mut self, markup: &str) {
        if self.ended {
            return;
        }
        self.write_head(self.status, "text/html");
        self.end_bytes(markup.as_bytes().to_vec());
    }

    /// Commit a status code and narrow to the body writers.
    pub fn status(&mut self, code: u16) -> StatusWriter<'_> {
        self.write_head(code, "application/json");
        StatusWriter { res: self }
    }

    /// Finalize a terminal payload returned by the chain.
    pub fn complete(&mut self, payload: Payload) {
        if self.ended {
            return;
        }
        match payload {
            Payload::Text(text) => {
                self.write_head(200, "text/plain");
                self.end_bytes(text.into_bytes());
            }
            Payload::Json(value) => self.write_json_value(value),
            Payload::Empty => self.write_json_value(Value::Null),
        }
    }

    fn end_message(&mut self, message: String) {
        let body = json!({ "message": message });
        let body = match &self.formatter {
            Some(format) => format(body, self.status),
            None => body,
        };
        match body {
            Value::String(text) => self.end_bytes(text.into_bytes()),
            other => self.end_bytes(pretty(&other)),
        }
    }

    /// Default 500 write used by the error funnel.
    pub fn fail(&mut self, message: &str) {
        if self.ended {
            return;
        }
        self.write_head(500, "application/json");
        self.end_message(message.to_string());
    }

    pub fn ok(&mut self, results: impl Into<Option<Value>>) {
        self.json(results.into().unwrap_or_else(|| json!({})));
    }

    pub fn created(&mut self, results: impl Into<Option<Value>>) {
        self.status(201);
        self.json(results.into().unwrap_or_else(|| json!({})));
    }

    pub fn accepted(&mut self, results: impl Into<Option<Value>>) {
        self.status(202);
        self.json(results.into().unwrap_or_else(|| json!({})));
    }

    pub fn no_content(&mut self) {
        self.write_head(204, "application/json");
        self.end_bytes(Vec::new());
    }

    fn reject(&mut self, code: u16, message: Option<&str>, default: String) {
        if self.ended {
            return;
        }
        self.write_head(code, "application/json");
        let message = message.map(str::to_string).unwrap_or(default);
        self.end_message(message);
    }

    pub fn bad_request(&mut self, message: Option<&str>) {
        let default = format!(
            "The url '{}' resulted in a bad request. Please review the data and try again.",
            self.url
        );
        self.reject(400, message, default);
    }

    pub fn unauthorized(&mut self, message: Option<&str>) {
        let default = format!("The url '{}' is unauthorized. Please verify.", self.url);
        self.reject(401, message, default);
    }

    pub fn payment_required(&mut self, message: Option<&str>) {
        let default = format!(
            "The url '{}' requires payment. Please proceed with payment.",
            self.url
        );
        self.reject(402, message, default);
    }

    pub fn forbidden(&mut self, message: Option<&str>) {
        let default = format!(
            "The url '{}' is forbidden. Please check the permissions or access rights.",
            self.url
        );
        self.reject(403, message, default);
    }

    pub fn not_found(&mut self, message: Option<&str>) {
        let default = format!(
            "The url '{}' was not found. Please re-check the your url again",
            self.url
        );
        self.reject(404, message, default);
    }

    pub fn server_error(&mut self, message: Option<&str>) {
        let default = format!(
            "The url '{}' resulted in a server error. Please investigate.",
            self.url
        );
        self.reject(500, message, default);
    }

    /// Convert into the wire response.
    pub fn into_response(self) -> Response<Full<Bytes>> {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut builder = Response::builder().status(status);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }

        match builder.body(Full::new(Bytes::from(self.body))) {
            Ok(response) => response,
            Err(err) => {
                // A header failed validation; the response must still go out.
                tracing::error!(error = %err, "failed to assemble response");
                let mut fallback = Response::new(Full::new(Bytes::new()));
                *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                fallback
            }
        }
    }
}

/// Narrowed writer returned by `Responder::status`.
pub struct StatusWriter<'r> {
    res: &'r mut Responder,
}

impl StatusWriter<'_> {
    pub fn json(self, results: Value) {
        self.res.json(results);
    }

    pub fn send(self, text: &str) {
        self.res.send(text);
    }
}

fn pretty(value: &Value) -> Vec<u8> {
    serde_json::to_string_pretty(value)
        .unwrap_or_default()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder() -> Responder {
        Responder::new("/orders".to_string(), None)
    }

    fn body_str(res: Responder) -> (u16, String) {
        let status = res.status_code();
        (status, String::from_utf8(res.body).unwrap())
    }

    #[test]
    fn ok_writes_pretty_json() {
        let mut res = responder();
        res.ok(json!({ "id": 1 }));
        let (status, body) = body_str(res);
        assert_eq!(status, 200);
        assert_eq!(body, "{\n  \"id\": 1\n}");
    }

    #[test]
    fn second_write_is_a_no_op() {
        let mut res = responder();
        res.ok(json!({ "first": true }));
        res.not_found(None);
        let (status, body) = body_str(res);
        assert_eq!(status, 200);
        assert!(body.contains("first"));
    }

    #[test]
    fn status_survives_later_json_write() {
        let mut res = responder();
        res.created(json!({ "id": 7 }));
        assert_eq!(res.status_code(), 201);
    }

    #[test]
    fn no_content_is_204_with_empty_body() {
        let mut res = responder();
        res.no_content();
        let (status, body) = body_str(res);
        assert_eq!(status, 204);
        assert!(body.is_empty());
    }

    #[test]
    fn not_found_uses_default_template() {
        let mut res = responder();
        res.not_found(None);
        let (status, body) = body_str(res);
        assert_eq!(status, 404);
        assert!(
            body.contains("The url '/orders' was not found. Please re-check the your url again")
        );
    }

    #[test]
    fn reject_accepts_custom_message() {
        let mut res = responder();
        res.bad_request(Some("missing field"));
        let (status, body) = body_str(res);
        assert_eq!(status, 400);
        assert!(body.contains("missing field"));
    }

    #[test]
    fn string_payload_is_plain_text() {
        let mut res = responder();
        res.json(json!("hello"));
        assert_eq!(res.body, b"hello");
        assert!(res
            .headers
            .iter()
            .any(|(n, v)| n == "Content-Type" && v == "text/plain"));
    }

    #[test]
    fn formatter_reshapes_payload() {
        let format: Arc<Formatter> =
            Arc::new(|value, status| json!({ "data": value, "status": status }));
        let mut res = Responder::new("/x".to_string(), Some(format));
        res.ok(json!({ "id": 1 }));
        let (_, body) = body_str(res);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], json!(200));
        assert_eq!(parsed["data"]["id"], json!(1));
    }

    #[test]
    fn formatter_string_result_is_plain_text() {
        let format: Arc<Formatter> = Arc::new(|_, _| json!("flattened"));
        let mut res = Responder::new("/x".to_string(), Some(format));
        res.ok(json!({ "ignored": true }));
        assert_eq!(res.body, b"flattened");
        assert!(res
            .headers
            .iter()
            .any(|(n, v)| n == "Content-Type" && v == "text/plain"));
    }

    #[test]
    fn status_writer_narrows_to_body_writers() {
        let mut res = responder();
        res.status(418).send("teapot");
        let (status, body) = body_str(res);
        assert_eq!(status, 418);
        assert_eq!(body, "teapot");
    }

    #[test]
    fn set_cookies_emits_one_header_per_entry() {
        let mut res = responder();
        let mut cookies = HashMap::new();
        cookies.insert("a".to_string(), CookieValue::Plain("1".to_string()));
        cookies.insert("b".to_string(), CookieValue::Plain("2".to_string()));
        res.set_cookies(&cookies);
        let count = res
            .headers
            .iter()
            .filter(|(name, _)| name == "Set-Cookie")
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn complete_empty_payload_has_empty_body() {
        let mut res = responder();
        res.complete(Payload::Empty);
        let (status, body) = body_str(res);
        assert_eq!(status, 200);
        assert!(body.is_empty());
    }

    #[test]
    fn complete_text_payload_bypasses_formatter() {
        let format: Arc<Formatter> = Arc::new(|_, _| json!({ "wrapped": true }));
        let mut res = Responder::new("/x".to_string(), Some(format));
        res.complete(Payload::Text("raw".to_string()));
        assert_eq!(res.body, b"raw");
    }

    #[test]
    fn fail_is_skipped_after_end() {
        let mut res = responder();
        res.ok(json!({}));
        res.fail("too late");
        assert_eq!(res.status_code(), 200);
    }
}
