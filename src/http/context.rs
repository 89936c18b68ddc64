//! Per-request execution context.
//!
//! # Responsibilities
//! - Carry everything a stage can read or write for one request
//! - Normalize every derived view to the empty mapping when absent,
//!   so handlers never null-check
//!
//! # Design Decisions
//! - The context is owned by exactly one in-flight request and moves
//!   through the chain by mutable borrow, never by lock

use std::collections::HashMap;
use std::sync::Arc;

use hyper::{Method, Uri};

use crate::http::body::ParsedBody;
use crate::http::multipart::UploadedFile;
use crate::http::response::{Formatter, Responder};

/// Typed view over one request, plus the response under construction.
pub struct Context {
    pub method: Method,
    pub uri: Uri,
    /// Request headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// Path parameters captured by the route pattern.
    pub params: HashMap<String, String>,
    /// Decoded query string pairs.
    pub query: HashMap<String, String>,
    /// Decoded request body. Empty when absent or unparsable.
    pub body: ParsedBody,
    /// Uploaded files keyed by field name.
    pub files: HashMap<String, Vec<UploadedFile>>,
    /// Request cookies. Empty when the header is absent.
    pub cookies: HashMap<String, String>,
    pub res: Responder,
}

impl Context {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HashMap<String, String>,
        formatter: Option<Arc<Formatter>>,
    ) -> Self {
        let url = uri
            .path_and_query()
            .map(|pq| pq.to_string())
            .unwrap_or_else(|| uri.path().to_string());

        let query = uri
            .query()
            .map(|raw| {
                url::form_urlencoded::parse(raw.as_bytes())
                    .map(|(name, value)| (name.into_owned(), value.into_owned()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            method,
            uri,
            headers,
            params: HashMap::new(),
            query,
            body: ParsedBody::new(),
            files: HashMap::new(),
            cookies: HashMap::new(),
            res: Responder::new(url, formatter),
        }
    }

    /// Case-insensitive header lookup (names are stored lowercase).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}
