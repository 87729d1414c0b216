//! End-to-end tests for the BlobGate gateway.
//!
//! Each test starts its own gateway on `127.0.0.1:0` backed by a fresh
//! in-memory store and talks to it over real HTTP with `reqwest`.
//!
//! ```text
//! cargo test -p blobgate-integration
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Once};

use blobgate_http::{BlobHttpService, gateway_router};
use blobgate_store::InMemoryStore;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::debug;

static INIT: Once = Once::new();

/// Initialize tracing (once).
fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

/// A gateway running in the current test's runtime.
#[derive(Debug)]
pub struct TestGateway {
    addr: SocketAddr,
    store: Arc<InMemoryStore>,
    server: JoinHandle<()>,
}

impl TestGateway {
    /// Start a gateway over `store`.
    pub async fn start(store: InMemoryStore) -> Self {
        init_tracing();

        let store = Arc::new(store);
        let router = gateway_router(Arc::clone(&store)).expect("gateway routes should register");
        let service = BlobHttpService::new(router);
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("loopback bind should succeed");
        let addr = listener.local_addr().expect("bound listener has an address");

        let server = tokio::spawn(async move {
            let http = HttpConnBuilder::new(TokioExecutor::new());
            while let Ok((stream, peer)) = listener.accept().await {
                let conn = http
                    .serve_connection(TokioIo::new(stream), service.clone())
                    .into_owned();
                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(%peer, error = %e, "test connection closed with error");
                    }
                });
            }
        });

        Self {
            addr,
            store,
            server,
        }
    }

    /// Start a gateway whose store spills objects above `max_memory` bytes to
    /// disk and produces downloads in `part_size` parts.
    pub async fn with_limits(max_memory: usize, part_size: usize) -> Self {
        Self::start(InMemoryStore::new(max_memory).with_part_size(part_size)).await
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// The backing store.
    #[must_use]
    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// A client that does not follow redirects.
#[must_use]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client should build")
}

/// Upload `content` as the single part of a form and return the response JSON.
pub async fn upload(gateway: &TestGateway, content: Vec<u8>) -> serde_json::Value {
    let part = reqwest::multipart::Part::bytes(content).file_name("upload.bin");
    let form = reqwest::multipart::Form::new().part("file", part);
    let resp = client()
        .post(gateway.url("/cloud-storage/files"))
        .multipart(form)
        .send()
        .await
        .expect("upload request should complete");
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    resp.json().await.expect("upload response should be JSON")
}

/// Deterministic test payload of `len` bytes.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[cfg(test)]
mod test_download;
#[cfg(test)]
mod test_routing;
#[cfg(test)]
mod test_upload;
