//! Buffered request body decoding.
//!
//! # Responsibilities
//! - Collect a bounded request body into memory
//! - Decode it by declared content type: url-encoded form pairs or JSON
//!
//! # Design Decisions
//! - Decoding never rejects a request: parse failures and non-object
//!   JSON resolve to the empty mapping
//! - Stream I/O failure is a real error and goes to the funnel

use bytes::Bytes;
use http_body_util::BodyExt;
use serde_json::{Map, Value};

use crate::pipeline::error::EngineError;

/// A decoded request body. Always a mapping, possibly empty.
pub type ParsedBody = Map<String, Value>;

/// Collect a request body into one buffer.
pub async fn collect<B>(body: B) -> Result<Bytes, EngineError>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    match body.collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => Err(EngineError::Stream(format!(
            "Failed to read request body: {}",
            err
        ))),
    }
}

/// Decode a buffered body by its declared content type.
pub fn decode(content_type: Option<&str>, payload: &[u8]) -> ParsedBody {
    let url_encoded = content_type
        .map(|value| value.contains("x-www-form-urlencoded"))
        .unwrap_or(false);

    if url_encoded {
        return url::form_urlencoded::parse(payload)
            .map(|(name, value)| (name.into_owned(), Value::String(value.into_owned())))
            .collect();
    }

    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_json_object() {
        let body = decode(Some("application/json"), br#"{"name":"jane","age":30}"#);
        assert_eq!(body.get("name"), Some(&json!("jane")));
        assert_eq!(body.get("age"), Some(&json!(30)));
    }

    #[test]
    fn decodes_url_encoded_pairs() {
        let body = decode(
            Some("application/x-www-form-urlencoded"),
            b"name=jane+doe&city=berlin",
        );
        assert_eq!(body.get("name"), Some(&json!("jane doe")));
        assert_eq!(body.get("city"), Some(&json!("berlin")));
    }

    #[test]
    fn invalid_json_resolves_to_empty_mapping() {
        assert!(decode(Some("application/json"), b"{not json").is_empty());
    }

    #[test]
    fn non_object_json_resolves_to_empty_mapping() {
        assert!(decode(Some("application/json"), b"5").is_empty());
        assert!(decode(Some("application/json"), b"[1,2,3]").is_empty());
        assert!(decode(Some("application/json"), b"\"plain\"").is_empty());
    }

    #[test]
    fn missing_content_type_falls_back_to_json() {
        let body = decode(None, br#"{"ok":true}"#);
        assert_eq!(body.get("ok"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn collects_full_body() {
        let body = http_body_util::Full::new(Bytes::from_static(b"hello"));
        let collected = collect(body).await.unwrap();
        assert_eq!(&collected[..], b"hello");
    }
}
