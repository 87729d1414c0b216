//! Download pipeline: relay a stored object from a [`Downloader`].

use std::str::FromStr;
use std::sync::Arc;

use blobgate_core::{Downloader, StoreError, TransferContext};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use tracing::debug;
use uuid::Uuid;

use crate::body::ResponseBody;
use crate::handler::{Handler, RequestBody};
use crate::router::PathParams;
use crate::status::{Status, internal_error};

/// Path parameter holding the object identifier.
pub const FILE_PARAM: &str = "file";

/// Build the download handler for `downloader`.
///
/// The identifier is read from the `{file}` path parameter. `HEAD` responds
/// with headers only and releases the store stream without reading it.
pub fn handle_download<D: Downloader>(downloader: Arc<D>) -> impl Handler {
    move |req: Request<RequestBody>| {
        let downloader = Arc::clone(&downloader);
        async move { download(downloader.as_ref(), req).await }
    }
}

async fn download<D: Downloader>(
    downloader: &D,
    req: Request<RequestBody>,
) -> Response<ResponseBody> {
    let method = req.method().clone();
    let ctx = req
        .extensions()
        .get::<TransferContext>()
        .cloned()
        .unwrap_or_else(|| TransferContext::new(Uuid::new_v4().to_string()));

    let id = req
        .extensions()
        .get::<PathParams>()
        .and_then(|params| params.get(FILE_PARAM))
        .and_then(|raw| D::Id::from_str(raw).ok());
    let Some(id) = id else {
        return Status::new(StatusCode::BAD_REQUEST, "path parameter has invalid format")
            .respond(&method);
    };

    let stream = match downloader.download(&ctx, &id).await {
        Ok(stream) => stream,
        Err(StoreError::NotFound { id }) => {
            return Status::new(StatusCode::NOT_FOUND, format!("no object {id}")).respond(&method);
        }
        Err(err) => return internal_error(&err, ctx.request_id()),
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/octet-stream");
    if let Some(size) = stream.size() {
        builder = builder.header(CONTENT_LENGTH, size);
    }

    let body = if method == Method::HEAD {
        stream.release();
        ResponseBody::empty()
    } else {
        debug!(request_id = ctx.request_id(), size = ?stream.size(), "streaming object");
        ResponseBody::streaming(stream)
    };
    builder.body(body).expect("download response should be valid")
}
