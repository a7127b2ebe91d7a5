//! HTTP client abstraction.
//!
//! Remote clients describe requests as plain values and hand them to an
//! [`HttpClient`]. The actual HTTP library (reqwest, ureq, a test double)
//! lives behind the trait, so this crate carries no network stack of its own.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// HTTP methods the remote clients use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET.
    Get,
    /// PUT.
    Put,
    /// POST.
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Method::Get => "GET",
            Method::Put => "PUT",
            Method::Post => "POST",
        })
    }
}

/// A request with a JSON body and a hard deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, query included.
    pub url: String,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
    /// The whole exchange must finish within this time.
    pub timeout: Duration,
}

/// A response: status code plus body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body text.
    pub body: String,
}

impl HttpResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A request that produced no response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HttpFailure {
    /// The deadline passed.
    #[error("request timed out")]
    Timeout,
    /// No connection could be made.
    #[error("connection failed: {0}")]
    Connect(String),
    /// Anything else below HTTP (TLS, body read, ...).
    #[error("transport error: {0}")]
    Transport(String),
}

/// Sends HTTP requests.
///
/// Implementations must honour `HttpRequest::timeout` and must not retry on
/// their own; retry policy belongs to the sync coordinator.
pub trait HttpClient: Send + Sync {
    /// Sends one request.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, HttpFailure> {
        (**self).send(request)
    }
}
