//! The gateway HTTP service implementing hyper's `Service` trait.
//!
//! [`BlobHttpService`] ties the route table and handlers together:
//!
//! 1. Canonical-path redirect for non-`CONNECT` requests
//! 2. Route lookup by method, host, and path, redirecting `/dir` to `/dir/`
//!    when only a trailing-slash pattern matches
//! 3. Per-request [`TransferContext`] cancelled if the handler is dropped
//! 4. 404 / 405 + `Allow` for unmatched requests
//! 5. Common response headers (`x-request-id`, `Server`)

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use blobgate_core::{Downloader, TransferContext, Uploader};
use http::header::{ALLOW, HOST, HeaderValue};
use http::{Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::service::Service;
use tracing::{debug, info};
use uuid::Uuid;

use crate::body::ResponseBody;
use crate::download::handle_download;
use crate::handler::{BoxError, BoxedHandler, RequestBody};
use crate::pattern::clean_path;
use crate::router::{Lookup, RouteError, Router};
use crate::status::Status;
use crate::upload::handle_upload;

/// Value of the `Server` response header.
pub const SERVER_NAME: &str = "BlobGate";

/// The gateway HTTP service.
///
/// Cheap to clone: the route table is shared and read-only.
#[derive(Debug, Clone)]
pub struct BlobHttpService {
    router: Arc<Router<BoxedHandler>>,
}

impl BlobHttpService {
    /// Serve requests from `router`.
    #[must_use]
    pub fn new(router: Router<BoxedHandler>) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    /// Route and handle one request.
    pub async fn handle(&self, mut req: Request<RequestBody>) -> Response<ResponseBody> {
        let request_id = Uuid::new_v4().to_string();
        let method = req.method().clone();
        let uri = req.uri().clone();
        debug!(%method, %uri, %request_id, "processing request");

        let response = 'resp: {
            if method != Method::CONNECT {
                let cleaned = clean_path(uri.path());
                if cleaned != uri.path() {
                    break 'resp Status::new(
                        StatusCode::MOVED_PERMANENTLY,
                        with_query(cleaned, uri.query()),
                    )
                    .respond(&method);
                }
            }

            let host = request_host(&req);
            match self.router.lookup(&method, &host, uri.path()) {
                Lookup::Found {
                    handler,
                    pattern,
                    params,
                } => {
                    debug!(%pattern, %request_id, "routed request");
                    let ctx = TransferContext::new(request_id.as_str());
                    let guard = ctx.drop_guard();
                    req.extensions_mut().insert(params);
                    req.extensions_mut().insert(ctx);
                    let response = handler.call(req).await;
                    guard.disarm();
                    response
                }
                Lookup::MethodNotAllowed(allowed) => {
                    let mut response = Status::new(
                        StatusCode::METHOD_NOT_ALLOWED,
                        format!("{method} {}", uri.path()),
                    )
                    .respond(&method);
                    if let Ok(value) = HeaderValue::from_str(&allowed.join(", ")) {
                        response.headers_mut().insert(ALLOW, value);
                    }
                    response
                }
                Lookup::Redirect(path) => {
                    Status::new(StatusCode::MOVED_PERMANENTLY, with_query(path, uri.query()))
                        .respond(&method)
                }
                Lookup::NotFound => {
                    Status::new(StatusCode::NOT_FOUND, uri.path()).respond(&method)
                }
            }
        };

        info!(
            %method,
            %uri,
            status = response.status().as_u16(),
            %request_id,
            "request completed"
        );
        add_common_headers(response, &request_id)
    }
}

impl Service<Request<Incoming>> for BlobHttpService {
    type Response = Response<ResponseBody>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move {
            let req = req.map(|body| body.map_err(Into::<BoxError>::into).boxed_unsync());
            Ok(service.handle(req).await)
        })
    }
}

/// Build the gateway route table over `store`.
///
/// | Route | Handler |
/// |---|---|
/// | `GET /ready` | 200 status |
/// | `POST /cloud-storage/files` | [`handle_upload`] |
/// | `GET /cloud-storage/files/{file}` | [`handle_download`] (also serves `HEAD`) |
pub fn gateway_router<S>(store: Arc<S>) -> Result<Router<BoxedHandler>, RouteError>
where
    S: Uploader + Downloader,
{
    let mut router = Router::new();
    router.register("GET /ready", BoxedHandler::new(Status::new(StatusCode::OK, "")))?;
    router.register(
        "POST /cloud-storage/files",
        BoxedHandler::new(handle_upload(Arc::clone(&store))),
    )?;
    router.register(
        "GET /cloud-storage/files/{file}",
        BoxedHandler::new(handle_download(store)),
    )?;
    Ok(router)
}

fn with_query(path: String, query: Option<&str>) -> String {
    match query {
        Some(query) => format!("{path}?{query}"),
        None => path,
    }
}

/// The request host without port, from the URI authority or `Host` header.
fn request_host<B>(req: &Request<B>) -> String {
    let raw = req
        .uri()
        .authority()
        .map(|authority| authority.as_str().to_owned())
        .or_else(|| {
            req.headers()
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned)
        })
        .unwrap_or_default();
    strip_port(&raw).to_owned()
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.find(']').map_or(host, |end| &host[..end + 2]);
    }
    host.rsplit_once(':').map_or(host, |(name, _)| name)
}

fn add_common_headers(
    mut response: Response<ResponseBody>,
    request_id: &str,
) -> Response<ResponseBody> {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert("x-request-id", value);
    }
    headers.insert("Server", HeaderValue::from_static(SERVER_NAME));
    response
}
