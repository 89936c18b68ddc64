//! HTTP-facing subsystem: request views and response construction.
//!
//! # Data Flow
//! ```text
//! hyper request
//!     → cookies.rs / body.rs / multipart.rs (parse request inputs)
//!     → context.rs (assemble the typed execution context)
//!     → [pipeline runs the middleware chain]
//!     → response.rs (finalize exactly one write)
//!     → hyper response
//! ```

pub mod body;
pub mod context;
pub mod cookies;
pub mod multipart;
pub mod response;

pub use context::Context;
pub use cookies::{parse_cookie_header, CookieValue, SameSite, SetCookie};
pub use multipart::{MultipartPayload, UploadOptions, UploadedFile};
pub use response::{Formatter, Responder, StatusWriter};
