//! Request handler abstraction.
//!
//! Handlers receive the request with its body still unread, so pipelines can
//! stream it. The service inserts the matched
//! [`PathParams`](crate::router::PathParams) and a
//! [`TransferContext`](blobgate_core::TransferContext) into the request
//! extensions before calling a handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};

use crate::body::ResponseBody;

/// Boxed error produced by request bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased request body.
pub type RequestBody = UnsyncBoxBody<Bytes, BoxError>;

/// Future returned by [`Handler::call`].
pub type BoxFuture = Pin<Box<dyn Future<Output = Response<ResponseBody>> + Send>>;

/// Produces a response for a routed request.
///
/// Implemented for any `Fn(Request<RequestBody>) -> impl Future` closure.
pub trait Handler: Send + Sync + 'static {
    /// Handle one request.
    fn call(&self, req: Request<RequestBody>) -> BoxFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request<RequestBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<ResponseBody>> + Send + 'static,
{
    fn call(&self, req: Request<RequestBody>) -> BoxFuture {
        Box::pin(self(req))
    }
}

/// A shareable, type-erased [`Handler`] as stored in the route table.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn Handler>);

impl BoxedHandler {
    /// Erase the type of `handler`.
    pub fn new(handler: impl Handler) -> Self {
        Self(Arc::new(handler))
    }

    /// Handle one request.
    pub fn call(&self, req: Request<RequestBody>) -> BoxFuture {
        self.0.call(req)
    }
}

impl std::fmt::Debug for BoxedHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxedHandler")
    }
}

/// Wrap fully buffered bytes as a [`RequestBody`].
#[must_use]
pub fn full_body(data: impl Into<Bytes>) -> RequestBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}
