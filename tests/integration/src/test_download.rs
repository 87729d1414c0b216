use futures::future::join_all;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};

use crate::{TestGateway, client, payload, upload};

async fn stored(gateway: &TestGateway, content: Vec<u8>) -> String {
    let json = upload(gateway, content).await;
    json["resourceId"].as_str().unwrap().to_owned()
}

#[tokio::test]
async fn test_should_round_trip_small_object() {
    let gateway = TestGateway::with_limits(1024, 64).await;
    let id = stored(&gateway, b"hello, gateway".to_vec()).await;

    let resp = client()
        .get(gateway.url(&format!("/cloud-storage/files/{id}")))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(CONTENT_TYPE).unwrap(),
        "application/octet-stream"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"hello, gateway");
}

#[tokio::test]
async fn test_should_round_trip_spilled_multi_part_object() {
    let gateway = TestGateway::with_limits(8 * 1024, 3000).await;
    let content = payload(100_000);
    let id = stored(&gateway, content.clone()).await;

    let resp = client()
        .get(gateway.url(&format!("/cloud-storage/files/{id}")))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_LENGTH).unwrap(), "100000");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), content.as_slice());
}

#[tokio::test]
async fn test_should_answer_head_without_body() {
    let gateway = TestGateway::with_limits(1024, 64).await;
    let id = stored(&gateway, payload(300)).await;

    let resp = client()
        .head(gateway.url(&format!("/cloud-storage/files/{id}")))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(CONTENT_LENGTH).unwrap(), "300");
    assert!(resp.bytes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_should_serve_concurrent_downloads_independently() {
    let gateway = TestGateway::with_limits(4 * 1024, 1000).await;
    let first = payload(20_000);
    let second: Vec<u8> = payload(30_000).into_iter().rev().collect();
    let first_id = stored(&gateway, first.clone()).await;
    let second_id = stored(&gateway, second.clone()).await;

    let client = client();
    let requests = (0..8).map(|i| {
        let (id, expected) = if i % 2 == 0 {
            (&first_id, &first)
        } else {
            (&second_id, &second)
        };
        let request = client
            .get(gateway.url(&format!("/cloud-storage/files/{id}")))
            .send();
        async move {
            let body = request.await.unwrap().bytes().await.unwrap();
            assert_eq!(body.as_ref(), expected.as_slice());
        }
    });
    join_all(requests).await;
}

#[tokio::test]
async fn test_should_keep_serving_after_abandoned_download() {
    let gateway = TestGateway::with_limits(4 * 1024, 1024).await;
    let content = payload(512 * 1024);
    let id = stored(&gateway, content.clone()).await;
    let url = gateway.url(&format!("/cloud-storage/files/{id}"));

    let mut abandoned = client().get(&url).send().await.unwrap();
    assert!(abandoned.chunk().await.unwrap().is_some());
    drop(abandoned);

    let body = client().get(&url).send().await.unwrap().bytes().await.unwrap();
    assert_eq!(body.as_ref(), content.as_slice());
}

#[tokio::test]
async fn test_should_reject_malformed_id() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .get(gateway.url("/cloud-storage/files/not-a-uuid"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(resp.text().await.unwrap(), "Bad Request\n");
}

#[tokio::test]
async fn test_should_report_unknown_id() {
    let gateway = TestGateway::with_limits(1024, 64).await;

    let resp = client()
        .get(gateway.url(&format!("/cloud-storage/files/{}", uuid::Uuid::new_v4())))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
