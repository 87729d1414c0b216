//! BlobGate Server - streaming blob storage gateway.
//!
//! Accepts single-part multipart uploads at `POST /cloud-storage/files` and
//! streams objects back from `GET /cloud-storage/files/{file}`, backed by the
//! in-memory store with disk spill-over.
//!
//! # Usage
//!
//! ```text
//! GATEWAY_LISTEN=0.0.0.0:8080 blobgate-server
//! blobgate-server --health-check
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `GATEWAY_LISTEN` | `0.0.0.0:8080` | Bind address |
//! | `LOG_LEVEL` | `info` | Log level filter |
//! | `RUST_LOG` | *(unset)* | Fine-grained tracing filter (overrides `LOG_LEVEL`) |
//! | `BLOB_MAX_MEMORY_OBJECT_SIZE` | `524288` | Objects above this spill to disk |
//! | `BLOB_DOWNLOAD_PART_SIZE` | `16777216` | Bytes produced per download part |
//! | `BLOB_READ_CHUNK_SIZE` | `65536` | Largest chunk handed to a response body |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use blobgate_core::BlobGateConfig;
use blobgate_http::{BlobHttpService, gateway_router};
use blobgate_store::InMemoryStore;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as HttpConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server version logged at startup.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber.
///
/// Uses `RUST_LOG` if set, otherwise falls back to the `LOG_LEVEL` config value.
fn init_tracing(log_level: &str) -> Result<()> {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(log_level)
            .with_context(|| format!("invalid log level filter: {log_level}"))?
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}

/// Run the accept loop until `shutdown` resolves, then drain connections.
async fn serve(
    listener: TcpListener,
    service: BlobHttpService,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();
    let http = HttpConnBuilder::new(TokioExecutor::new());

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };

                let conn = http.serve_connection(TokioIo::new(stream), service.clone());
                let conn = graceful.watch(conn.into_owned());

                tokio::spawn(async move {
                    if let Err(e) = conn.await {
                        error!(peer_addr = %peer_addr, error = %e, "connection error");
                    }
                });
            }

            () = &mut shutdown => {
                info!("shutting down gracefully");
                break;
            }
        }
    }

    graceful.shutdown().await;
    info!("all connections drained, exiting");

    Ok(())
}

/// Request `GET /ready` from a running gateway.
async fn run_health_check(addr: &str) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("cannot connect to {addr}"))?;
    let (mut reader, mut writer) = stream.into_split();

    let request = format!("GET /ready HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    writer.write_all(request.as_bytes()).await?;

    // `writer` stays open until the response is read: hyper drops
    // half-closed HTTP/1 connections without replying.
    let mut response = String::new();
    reader.read_to_string(&mut response).await?;
    drop(writer);

    if response.starts_with("HTTP/1.1 200") {
        Ok(())
    } else {
        let status_line = response.lines().next().unwrap_or_default();
        anyhow::bail!("unhealthy response from {addr}: {status_line:?}")
    }
}

/// The address a local health check should dial for `listen`.
fn health_check_addr(listen: &str) -> String {
    listen.replace("0.0.0.0", "127.0.0.1")
}

fn build_service(config: &BlobGateConfig) -> Result<BlobHttpService> {
    let store = Arc::new(InMemoryStore::from_config(config));
    let router = gateway_router(store).context("failed to build route table")?;
    Ok(BlobHttpService::new(router))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --health-check flag for container HEALTHCHECK.
    if std::env::args().any(|a| a == "--health-check") {
        let config = BlobGateConfig::from_env();
        let healthy = run_health_check(&health_check_addr(&config.gateway_listen))
            .await
            .is_ok();
        std::process::exit(i32::from(!healthy));
    }

    let config = BlobGateConfig::from_env();

    init_tracing(&config.log_level)?;

    info!(
        gateway_listen = %config.gateway_listen,
        max_memory_object_size = config.max_memory_object_size,
        download_part_size = config.download_part_size,
        read_chunk_size = config.read_chunk_size,
        version = VERSION,
        "starting BlobGate server",
    );

    let service = build_service(&config)?;

    let addr: SocketAddr = config
        .gateway_listen
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.gateway_listen))?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(%addr, "listening for connections");

    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal, draining connections");
    };
    serve(listener, service, shutdown).await
}
