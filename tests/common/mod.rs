//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use relay_balancer::{CoreContext, EngineConfig, EngineResult};

/// Engine configuration suited to tests: ephemeral port, small arena,
/// two workers, no active health checks.
pub fn test_config(algorithm: &str) -> EngineConfig {
    let mut config = EngineConfig::new(0, algorithm);
    config.listener.bind_address = "127.0.0.1".into();
    config.arena.size_bytes = 256 * 1024;
    config.arena.slot_size = 4 * 1024;
    config.workers.threads = 2;
    config.workers.queue_capacity = 64;
    config.health_check.enabled = false;
    config.timeouts.connect_ms = 1_000;
    config.timeouts.read_ms = 5_000;
    config.timeouts.write_ms = 5_000;
    config
}

/// Start a backend that echoes every byte back.
pub async fn start_echo_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let (mut rd, mut wr) = socket.split();
                        let _ = tokio::io::copy(&mut rd, &mut wr).await;
                        let _ = wr.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a backend that writes `tag` and closes the connection.
pub async fn start_tagged_backend(tag: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let _ = socket.write_all(tag.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Run the engine on an ephemeral loopback listener.
pub async fn spawn_engine(ctx: Arc<CoreContext>) -> (SocketAddr, JoinHandle<EngineResult<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move { ctx.run_with_listener(listener).await });
    (addr, handle)
}

/// Connect, optionally send `payload`, half-close, and read until EOF.
pub async fn exchange(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    if !payload.is_empty() {
        stream.write_all(payload).await.unwrap();
    }
    stream.shutdown().await.unwrap();
    let mut out = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("exchange timed out");
    // A closed-without-reply connection may surface as a reset.
    if read.is_err() {
        out.clear();
    }
    out
}

/// Stop the event loop and tear the context down.
pub async fn stop(ctx: &CoreContext, engine: JoinHandle<EngineResult<()>>) {
    ctx.shutdown_handle().trigger();
    let result = tokio::time::timeout(Duration::from_secs(5), engine)
        .await
        .expect("event loop did not stop")
        .unwrap();
    assert!(result.is_ok(), "event loop failed: {result:?}");
    tokio::time::timeout(Duration::from_secs(5), ctx.destroy())
        .await
        .expect("destroy did not complete");
}
