//! Status responder: turns a status code and payload into a response.
//!
//! - Below 300 the reason phrase is written as the body (omitted for `HEAD`).
//! - 3xx redirects to the payload via `Location`. A payload that is not a
//!   valid header value is logged and answered with the masked 500.
//! - 400 and above write only the reason phrase. The payload is an internal
//!   diagnostic; it is logged, truncated, and never sent to the client.

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderValue, Method, Response, StatusCode};
use tracing::{error, warn};

use crate::body::ResponseBody;
use crate::handler::{BoxFuture, Handler, RequestBody};

/// Longest diagnostic prefix included in logs.
pub const DIAGNOSTIC_LEN: usize = 20;

/// Body of every masked server error.
pub const INTERNAL_ERROR_MESSAGE: &str =
    "The server was unable to complete your request. Please try again later.";

/// A status code paired with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    code: StatusCode,
    payload: String,
}

impl Status {
    /// Pair `code` with `payload`.
    #[must_use]
    pub fn new(code: StatusCode, payload: impl Into<String>) -> Self {
        Self {
            code,
            payload: payload.into(),
        }
    }

    /// The status code.
    #[must_use]
    pub fn code(&self) -> StatusCode {
        self.code
    }

    /// The payload, truncated for logging.
    ///
    /// Keeps at most [`DIAGNOSTIC_LEN`] bytes, shortened further to the
    /// nearest UTF-8 character boundary.
    #[must_use]
    pub fn diagnostic(&self) -> &str {
        truncate(&self.payload, DIAGNOSTIC_LEN)
    }

    /// A one-line summary for codes of 400 and above, `None` otherwise.
    #[must_use]
    pub fn error_summary(&self) -> Option<String> {
        (self.code.as_u16() >= 400)
            .then(|| format!("{} {}: {}", self.code.as_u16(), reason(self.code), self.diagnostic()))
    }

    /// Render this status as a response to a request with `method`.
    #[must_use]
    pub fn respond(&self, method: &Method) -> Response<ResponseBody> {
        if let Some(summary) = self.error_summary() {
            if self.code.is_server_error() {
                error!(status = self.code.as_u16(), "{summary}");
            } else {
                warn!(status = self.code.as_u16(), "{summary}");
            }
            return plain_text(self.code, reason(self.code));
        }

        if self.code.is_redirection() {
            let Ok(location) = HeaderValue::from_str(&self.payload) else {
                warn!(
                    status = self.code.as_u16(),
                    location = self.diagnostic(),
                    "redirect target is not a valid header value"
                );
                return plain_text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE);
            };
            return Response::builder()
                .status(self.code)
                .header(LOCATION, location)
                .body(ResponseBody::empty())
                .expect("redirect response should be valid");
        }

        if *method == Method::HEAD {
            return Response::builder()
                .status(self.code)
                .body(ResponseBody::empty())
                .expect("status response should be valid");
        }
        plain_text(self.code, reason(self.code))
    }
}

impl Handler for Status {
    fn call(&self, req: http::Request<RequestBody>) -> BoxFuture {
        let response = self.respond(req.method());
        Box::pin(async move { response })
    }
}

/// The single masked 500 response used for every backend failure.
///
/// `err` is logged with its full source chain and never sent to the client.
#[must_use]
pub fn internal_error(err: &dyn std::error::Error, request_id: &str) -> Response<ResponseBody> {
    let mut chain = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    error!(request_id, error = %chain, "request failed");
    plain_text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
}

fn plain_text(code: StatusCode, text: &str) -> Response<ResponseBody> {
    Response::builder()
        .status(code)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .header("X-Content-Type-Options", "nosniff")
        .body(ResponseBody::from_string(format!("{text}\n")))
        .expect("plain text response should be valid")
}

fn reason(code: StatusCode) -> &'static str {
    code.canonical_reason().unwrap_or("Unknown Status")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
