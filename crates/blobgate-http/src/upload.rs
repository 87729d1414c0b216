//! Upload pipeline: `POST` a single-part multipart form into an [`Uploader`].
//!
//! The first part's bytes are pumped through a [`pipe`] into the uploader
//! while the request body is still arriving, so nothing is buffered in full.

use std::sync::Arc;
use std::time::Instant;

use blobgate_core::{TransferContext, TransferResult, Uploader, pipe, pump};
use http::header::CONTENT_TYPE;
use http::{Request, Response, StatusCode};
use tracing::{debug, info};
use uuid::Uuid;

use crate::body::ResponseBody;
use crate::handler::{Handler, RequestBody};
use crate::multipart::Multipart;
use crate::status::{Status, internal_error};

/// Build the upload handler for `uploader`.
///
/// - Not `multipart/form-data` with a boundary: 415.
/// - No decodable first part: 422.
/// - Store failure: masked 500.
/// - Otherwise 200 with a JSON [`TransferResult`].
pub fn handle_upload<U: Uploader>(uploader: Arc<U>) -> impl Handler {
    move |req: Request<RequestBody>| {
        let uploader = Arc::clone(&uploader);
        async move { upload(uploader.as_ref(), req).await }
    }
}

async fn upload<U: Uploader>(uploader: &U, req: Request<RequestBody>) -> Response<ResponseBody> {
    let start = Instant::now();
    let method = req.method().clone();
    let ctx = req
        .extensions()
        .get::<TransferContext>()
        .cloned()
        .unwrap_or_else(|| TransferContext::new(Uuid::new_v4().to_string()));

    let mut multipart = match Multipart::from_request(req) {
        Ok(multipart) => multipart,
        Err(err) => {
            return Status::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, err.to_string())
                .respond(&method);
        }
    };
    let part = match multipart.next_part().await {
        Ok(Some(part)) => part,
        Ok(None) => {
            return Status::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "failed to decode part: no parts in form",
            )
            .respond(&method);
        }
        Err(err) => {
            return Status::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                format!("failed to decode part: {err}"),
            )
            .respond(&method);
        }
    };
    debug!(
        request_id = ctx.request_id(),
        name = part.name().as_deref(),
        file_name = part.file_name().as_deref(),
        "streaming part to store"
    );

    let (writer, reader) = pipe();
    let (pumped, stored) = tokio::join!(
        pump(&ctx, part.into_stream(), writer),
        uploader.upload(&ctx, Box::pin(reader)),
    );
    let uploaded = match stored {
        Ok(uploaded) => uploaded,
        Err(err) => return internal_error(&err, ctx.request_id()),
    };
    if let Err(err) = pumped {
        return internal_error(&err, ctx.request_id());
    }

    let result = TransferResult::new(&uploaded.id, uploaded.size, start.elapsed());
    info!(
        request_id = ctx.request_id(),
        resource_id = %result.id,
        bytes = result.bytes_transferred,
        elapsed = ?result.elapsed,
        "upload completed"
    );
    match serde_json::to_vec(&result) {
        Ok(mut json) => {
            json.push(b'\n');
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(ResponseBody::from_bytes(json))
                .expect("upload response should be valid")
        }
        Err(err) => internal_error(&err, ctx.request_id()),
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use async_trait::async_trait;
    use blobgate_core::{ByteStream, StoreError, Uploaded};
    use blobgate_store::InMemoryStore;
    use futures::StreamExt;
    use http_body_util::BodyExt;

    use super::*;
    use crate::handler::full_body;

    const BOUNDARY: &str = "upload-test";

    fn multipart_request(content: &str) -> Request<RequestBody> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"f.txt\"\r\n\r\n{content}\r\n--{BOUNDARY}--\r\n"
        );
        Request::post("/cloud-storage/files")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(full_body(body))
            .unwrap()
    }

    async fn json_body(resp: Response<ResponseBody>) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[derive(Debug)]
    struct FailingStore;

    #[async_trait]
    impl Uploader for FailingStore {
        type Id = String;

        async fn upload(
            &self,
            _ctx: &TransferContext,
            mut body: ByteStream,
        ) -> Result<Uploaded<String>, StoreError> {
            while body.next().await.is_some() {}
            Err(StoreError::Io(io::Error::other("bucket unavailable")))
        }
    }

    #[tokio::test]
    async fn test_should_upload_part_to_store() {
        let store = Arc::new(InMemoryStore::new(1024));
        let handler = handle_upload(Arc::clone(&store));

        let resp = handler.call(multipart_request("0123456789")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        let json = json_body(resp).await;
        assert_eq!(json["bytesWritten"], 10);
        assert!(json["timeElapsed"].is_string());
        let id = json["resourceId"].as_str().unwrap();
        assert!(store.contains(&id.parse().unwrap()));
    }

    #[tokio::test]
    async fn test_should_reject_non_multipart_body() {
        let handler = handle_upload(Arc::new(InMemoryStore::new(1024)));
        let req = Request::post("/cloud-storage/files")
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(full_body("raw bytes"))
            .unwrap();
        let resp = handler.call(req).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[tokio::test]
    async fn test_should_reject_form_without_parts() {
        let store = Arc::new(InMemoryStore::new(1024));
        let handler = handle_upload(Arc::clone(&store));
        let req = Request::post("/cloud-storage/files")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(full_body(format!("--{BOUNDARY}--\r\n")))
            .unwrap();
        let resp = handler.call(req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_should_reject_truncated_form() {
        let handler = handle_upload(Arc::new(InMemoryStore::new(1024)));
        let req = Request::post("/cloud-storage/files")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(full_body("not a form at all"))
            .unwrap();
        let resp = handler.call(req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_should_mask_store_failure() {
        let handler = handle_upload(Arc::new(FailingStore));
        let resp = handler.call(multipart_request("data")).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_should_fail_when_part_is_truncated() {
        let store = Arc::new(InMemoryStore::new(1024));
        let handler = handle_upload(Arc::clone(&store));
        let body = format!("--{BOUNDARY}\r\n\r\nhalf a file");
        let req = Request::post("/cloud-storage/files")
            .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(full_body(body))
            .unwrap();
        let resp = handler.call(req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(store.is_empty());
    }
}
