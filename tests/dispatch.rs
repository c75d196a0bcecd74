//! End-to-end dispatch through the event loop, workers and relay.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use relay_balancer::{BackendState, CoreContext};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_echo_relay() {
    let backend = common::start_echo_backend().await;
    let ctx = Arc::new(CoreContext::create(common::test_config("roundrobin")).unwrap());
    let idx = ctx.add_backend("127.0.0.1", backend.port(), 1).unwrap();
    ctx.mark_state(idx, BackendState::Up).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    let reply = common::exchange(addr, b"hello through the balancer").await;
    assert_eq!(reply, b"hello through the balancer");

    // The lease is released once the relay finishes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let b = ctx.registry().get(idx).unwrap();
    assert_eq!(b.active_connections(), 0);
    assert_eq!(b.total_dispatched(), 1);
    assert_eq!(ctx.stats().dispatched, 1);

    common::stop(&ctx, engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_open_relays_outnumber_workers() {
    let backend = common::start_echo_backend().await;
    let ctx = Arc::new(CoreContext::create(common::test_config("roundrobin")).unwrap());
    assert_eq!(ctx.worker_count(), 2);
    let idx = ctx.add_backend("127.0.0.1", backend.port(), 1).unwrap();
    ctx.mark_state(idx, BackendState::Up).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    let mut held = Vec::new();
    for byte in b"abcdef" {
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&[*byte]).await.unwrap();
        let mut echoed = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(3), client.read_exact(&mut echoed))
            .await
            .expect("connection starved while other relays are open")
            .unwrap();
        assert_eq!(echoed[0], *byte);
        held.push(client);
    }
    assert_eq!(ctx.registry().get(idx).unwrap().active_connections(), 6);
    assert_eq!(ctx.open_sessions(), 6);

    drop(held);
    common::stop(&ctx, engine).await;
    assert_eq!(ctx.registry().get(idx).unwrap().active_connections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_round_robin_rotates_over_backends() {
    let ctx = Arc::new(CoreContext::create(common::test_config("roundrobin")).unwrap());
    for tag in ["a", "b", "c"] {
        let backend = common::start_tagged_backend(tag).await;
        let idx = ctx.add_backend("127.0.0.1", backend.port(), 1).unwrap();
        ctx.mark_state(idx, BackendState::Up).unwrap();
    }

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    let mut seen = String::new();
    for _ in 0..6 {
        let reply = common::exchange(addr, b"").await;
        seen.push_str(std::str::from_utf8(&reply).unwrap());
    }
    assert_eq!(seen, "abcabc");

    common::stop(&ctx, engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_draining_backend_gets_no_new_work() {
    let ctx = Arc::new(CoreContext::create(common::test_config("roundrobin")).unwrap());
    let a = common::start_tagged_backend("a").await;
    let b = common::start_tagged_backend("b").await;
    let ia = ctx.add_backend("127.0.0.1", a.port(), 1).unwrap();
    let ib = ctx.add_backend("127.0.0.1", b.port(), 1).unwrap();
    ctx.mark_state(ia, BackendState::Up).unwrap();
    ctx.mark_state(ib, BackendState::Draining).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    for _ in 0..4 {
        assert_eq!(common::exchange(addr, b"").await, b"a");
    }

    common::stop(&ctx, engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_backend_closes_connection() {
    let ctx = Arc::new(CoreContext::create(common::test_config("leastconn")).unwrap());
    ctx.add_backend("127.0.0.1", 1, 1).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    let reply = common::exchange(addr, b"anyone there?").await;
    assert!(reply.is_empty());
    assert_eq!(ctx.stats().selection_failures, 1);
    assert_eq!(ctx.stats().dispatched, 0);

    common::stop(&ctx, engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connection_limit_rejects_excess() {
    let backend = common::start_echo_backend().await;
    let mut config = common::test_config("roundrobin");
    config.listener.max_connections = 1;
    let ctx = Arc::new(CoreContext::create(config).unwrap());
    let idx = ctx.add_backend("127.0.0.1", backend.port(), 1).unwrap();
    ctx.mark_state(idx, BackendState::Up).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;

    let mut held = TcpStream::connect(addr).await.unwrap();
    held.write_all(b"x").await.unwrap();
    let mut one = [0u8; 1];
    held.read_exact(&mut one).await.unwrap();

    let reply = common::exchange(addr, b"").await;
    assert!(reply.is_empty());
    assert_eq!(ctx.stats().rejected, 1);

    drop(held);
    common::stop(&ctx, engine).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_degraded_context_still_dispatches() {
    let backend = common::start_echo_backend().await;
    let mut config = common::test_config("leastconn");
    config.workers.queue_capacity = 0;
    config.arena.enabled = false;
    let ctx = Arc::new(CoreContext::create(config).unwrap());
    assert_eq!(ctx.worker_count(), 0);
    assert!(!ctx.has_arena());

    let idx = ctx.add_backend("127.0.0.1", backend.port(), 1).unwrap();
    ctx.mark_state(idx, BackendState::Up).unwrap();

    let (addr, engine) = common::spawn_engine(Arc::clone(&ctx)).await;
    assert_eq!(common::exchange(addr, b"degraded").await, b"degraded");

    common::stop(&ctx, engine).await;
}
