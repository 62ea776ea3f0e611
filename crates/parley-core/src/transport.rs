//! Transport abstraction for HTTP exchanges.
//!
//! BOSH needs exactly one primitive from the network: POST a body to the
//! connection manager and wait for the response. The engine never calls the
//! transport itself. A driver executes
//! [`ConnectionAction::Transmit`](crate::connection::ConnectionAction) by
//! calling [`HttpTransport::post`] in its own task and feeds the result back
//! through [`Connection::handle_response`](crate::connection::Connection::handle_response).
//!
//! # Implementations
//!
//! - **`SimServer`** (testing): an in-memory connection manager with
//!   scripted XMPP behaviour and fault injection
//! - A production driver wraps an HTTP client
//!
//! # Abort
//!
//! There is no cancel operation on the trait. Aborting a request means
//! dropping (or aborting the task polling) its future; the engine already
//! treats a late completion of an aborted request as a no-op.
//!
//! # Failures
//!
//! A transport-level failure (connection refused, reset, DNS) is reported to
//! the engine as [`HttpResponse::transport_failure`], i.e. HTTP status 0.
//! It counts towards the consecutive error limit and the request is retried.

use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use parley_proto::body::CONTENT_TYPE;

/// Headers sent with every request
pub const REQUEST_HEADERS: &[(&str, &str)] = &[("Content-Type", CONTENT_TYPE)];

/// Completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code; 0 for transport-level failures
    pub status: u16,
    /// Raw response body
    pub body: Bytes,
}

impl HttpResponse {
    /// Response with a status and body
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    /// Status-0 response standing in for a failed exchange
    #[must_use]
    pub fn transport_failure() -> Self {
        Self { status: 0, body: Bytes::new() }
    }

    /// True for 2xx and 304
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) || self.status == 304
    }
}

impl From<io::Result<HttpResponse>> for HttpResponse {
    fn from(result: io::Result<HttpResponse>) -> Self {
        result.unwrap_or_else(|_| Self::transport_failure())
    }
}

/// Abstract HTTP POST primitive.
///
/// # Behavior
///
/// - **Sends** `body` to `url` with the given headers
/// - **Waits** for the complete response
/// - **Returns** any HTTP status, including 4xx/5xx, as `Ok`
///
/// # Errors
///
/// Returns `std::io::Error` only when no HTTP response was received.
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// POST `body` and wait for the response.
    async fn post(&self, url: &str, headers: &[(&str, &str)], body: String)
    -> io::Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_become_status_zero() {
        let failed: io::Result<HttpResponse> =
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let response = HttpResponse::from(failed);
        assert_eq!(response.status, 0);
        assert!(response.body.is_empty());
        assert!(!response.is_success());
    }

    #[test]
    fn success_codes() {
        assert!(HttpResponse::new(200, "<body/>").is_success());
        assert!(HttpResponse::new(304, "").is_success());
        assert!(!HttpResponse::new(404, "").is_success());
        assert!(!HttpResponse::new(503, "").is_success());
    }
}
