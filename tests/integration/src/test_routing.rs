use reqwest::StatusCode;
use reqwest::header::{ALLOW, LOCATION, SERVER};

use crate::{TestGateway, client};

#[tokio::test]
async fn test_should_report_ready() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client().get(gateway.url("/ready")).send().await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(SERVER).unwrap(), "BlobGate");
    assert!(resp.headers().contains_key("x-request-id"));
    assert_eq!(resp.text().await.unwrap(), "OK\n");
}

#[tokio::test]
async fn test_should_use_distinct_request_ids() {
    let gateway = TestGateway::with_limits(1024, 64).await;
    let client = client();

    let a = client.get(gateway.url("/ready")).send().await.unwrap();
    let b = client.get(gateway.url("/ready")).send().await.unwrap();

    assert_ne!(
        a.headers().get("x-request-id"),
        b.headers().get("x-request-id")
    );
}

#[tokio::test]
async fn test_should_return_not_found_for_unknown_route() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client().get(gateway.url("/nope")).send().await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        resp.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
}

#[tokio::test]
async fn test_should_list_allowed_methods() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .put(gateway.url("/cloud-storage/files"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(resp.headers().get(ALLOW).unwrap(), "POST");
}

#[tokio::test]
async fn test_should_redirect_to_clean_path() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .get(gateway.url("//ready"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(resp.headers().get(LOCATION).unwrap(), "/ready");
}
