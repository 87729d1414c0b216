use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;

use crate::{TestGateway, client, payload, upload};

#[tokio::test]
async fn test_should_report_bytes_written() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let json = upload(&gateway, b"0123456789".to_vec()).await;

    assert_eq!(json["bytesWritten"], 10);
    let id: uuid::Uuid = json["resourceId"].as_str().unwrap().parse().unwrap();
    assert!(!id.is_nil());
    assert!(json["timeElapsed"].as_str().is_some_and(|s| !s.is_empty()));
    assert_eq!(gateway.store().len(), 1);
}

#[tokio::test]
async fn test_should_upload_object_larger_than_memory_limit() {
    let gateway = TestGateway::with_limits(4 * 1024, 1024).await;

    let json = upload(&gateway, payload(256 * 1024)).await;

    assert_eq!(json["bytesWritten"], 256 * 1024);
}

#[tokio::test]
async fn test_should_upload_empty_file() {
    let gateway = TestGateway::with_limits(1024, 64).await;
    let json = upload(&gateway, Vec::new()).await;
    assert_eq!(json["bytesWritten"], 0);
}

#[tokio::test]
async fn test_should_reject_non_multipart_upload() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .post(gateway.url("/cloud-storage/files"))
        .header(CONTENT_TYPE, "application/octet-stream")
        .body("raw bytes")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert_eq!(resp.text().await.unwrap(), "Unsupported Media Type\n");
    assert!(gateway.store().is_empty());
}

#[tokio::test]
async fn test_should_reject_undecodable_form() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .post(gateway.url("/cloud-storage/files"))
        .header(CONTENT_TYPE, "multipart/form-data; boundary=xyz")
        .body("this is not a multipart body")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let text = resp.text().await.unwrap();
    assert_eq!(text, "Unprocessable Entity\n");
    assert!(gateway.store().is_empty());
}
