//! Cookie header parsing and Set-Cookie serialization.
//!
//! # Responsibilities
//! - Parse the request `Cookie` header into a name/value mapping
//! - Serialize outgoing cookies, plain or with attributes
//!
//! # Design Decisions
//! - An absent header parses to `None`, never an empty mapping, so
//!   callers can tell "no cookies sent" from "header present but empty"
//! - Malformed pairs are skipped, never rejected
//! - Values whose text begins with `Expires=` are treated as carrying
//!   their own expiry and are dropped when stale or unparsable

use std::collections::HashMap;
use std::time::SystemTime;

/// Parse a `Cookie` request header.
///
/// Pairs are split on `;`, names and values on the first `=`, both
/// trimmed, values URL-decoded. Pairs without an `=` or with an empty
/// name are skipped.
pub fn parse_cookie_header(header: Option<&str>) -> Option<HashMap<String, String>> {
    let header = header?;

    let mut cookies = HashMap::new();

    for pair in header.split(';') {
        let mut parts = pair.splitn(2, '=');
        let name = parts.next().unwrap_or("").trim();
        let value = match parts.next() {
            Some(value) => value.trim(),
            None => continue,
        };
        if name.is_empty() {
            continue;
        }

        let decoded = urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string());

        cookies.insert(name.to_string(), decoded);
    }

    // Entries carrying an inline expiry are evicted once stale.
    cookies.retain(|_, value| match value.strip_prefix("Expires=") {
        None => true,
        Some(stamp) => httpdate::parse_http_date(stamp)
            .map(|at| at > SystemTime::now())
            .unwrap_or(false),
    });

    Some(cookies)
}

/// `SameSite` attribute values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// A structured outgoing cookie.
#[derive(Debug, Clone, Default)]
pub struct SetCookie {
    pub value: String,
    pub same_site: Option<SameSite>,
    pub domain: Option<String>,
    pub http_only: bool,
    pub secure: bool,
    pub expires: Option<SystemTime>,
}

/// An outgoing cookie value, plain or with attributes.
#[derive(Debug, Clone)]
pub enum CookieValue {
    Plain(String),
    Full(SetCookie),
}

/// Serialize one cookie into a `Set-Cookie` header value.
///
/// Structured cookies with an empty value yield `None` and must not
/// be emitted at all.
pub fn serialize_cookie(name: &str, value: &CookieValue) -> Option<String> {
    match value {
        CookieValue::Plain(v) => Some(format!("{}={}", name, v)),
        CookieValue::Full(cookie) => {
            if cookie.value.is_empty() {
                return None;
            }

            let mut out = format!("{}={}", name, cookie.value);

            if let Some(same_site) = cookie.same_site {
                out.push_str(&format!(" ;SameSite={}", same_site.as_str()));
            }
            if let Some(domain) = &cookie.domain {
                out.push_str(&format!(" ;Domain={}", domain));
            }
            if cookie.http_only {
                out.push_str(" ;HttpOnly");
            }
            if cookie.secure {
                out.push_str(" ;Secure");
            }
            if let Some(expires) = cookie.expires {
                out.push_str(&format!(" ;Expires={}", httpdate::fmt_http_date(expires)));
            }

            Some(out)
        }
    }
}
