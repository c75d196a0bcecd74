//! Selection under concurrent state changes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use relay_balancer::{BackendState, CoreContext, SelectionKey};

mod common;

const TOGGLES: usize = 20_000;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_toggle_while_selecting() {
    for algorithm in ["roundrobin", "leastconn", "weighted", "random"] {
        let ctx = Arc::new(CoreContext::create(common::test_config(algorithm)).unwrap());
        for port in 9000..9003 {
            let idx = ctx.add_backend("127.0.0.1", port, 1).unwrap();
            ctx.mark_state(idx, BackendState::Up).unwrap();
        }
        let toggled = 1;

        let done = Arc::new(AtomicBool::new(false));
        let selected = Arc::new(AtomicUsize::new(0));
        let selectors: Vec<_> = (0..4)
            .map(|_| {
                let ctx = Arc::clone(&ctx);
                let done = Arc::clone(&done);
                let selected = Arc::clone(&selected);
                std::thread::spawn(move || {
                    while !done.load(Ordering::Acquire) {
                        if let Some(backend) = ctx.select_backend(SelectionKey::default()) {
                            assert!(backend.index() < 3);
                            let _lease = backend.lease();
                            selected.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        let toggler = {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                for i in 0..TOGGLES {
                    let state = if i % 2 == 0 { BackendState::Down } else { BackendState::Up };
                    ctx.mark_state(toggled, state).unwrap();
                }
                ctx.mark_state(toggled, BackendState::Down).unwrap();
            })
        };
        toggler.join().unwrap();

        // The final Down transition has completed; no later selection may see it.
        for _ in 0..1_000 {
            let picked = ctx.select_backend(SelectionKey::default()).unwrap();
            assert_ne!(picked.index(), toggled, "{algorithm} returned a down backend");
        }

        done.store(true, Ordering::Release);
        for selector in selectors {
            selector.join().unwrap();
        }
        assert!(selected.load(Ordering::Relaxed) > 0);

        // Every lease was paired with a release.
        for backend in ctx.registry().iter() {
            assert_eq!(backend.active_connections(), 0);
        }
        ctx.destroy().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_round_robin_spreads_concurrent_selections() {
    let ctx = Arc::new(CoreContext::create(common::test_config("roundrobin")).unwrap());
    for port in 9000..9004 {
        let idx = ctx.add_backend("127.0.0.1", port, 1).unwrap();
        ctx.mark_state(idx, BackendState::Up).unwrap();
    }

    let threads: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            std::thread::spawn(move || {
                let mut counts = [0usize; 4];
                for _ in 0..1_000 {
                    let b = ctx.select_backend(SelectionKey::default()).unwrap();
                    counts[b.index()] += 1;
                }
                counts
            })
        })
        .collect();

    let mut totals = [0usize; 4];
    for t in threads {
        for (i, c) in t.join().unwrap().iter().enumerate() {
            totals[i] += c;
        }
    }
    // Cursor values never repeat, so the split is exact.
    assert_eq!(totals, [1_000; 4]);
    ctx.destroy().await;
}
