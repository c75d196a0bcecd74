//! Metrics feed.
//!
//! # Metrics
//! - `lb_dispatched_total` (counter): work items handed a backend, by backend
//! - `lb_selection_failures_total` (counter): selections that found no backend
//! - `lb_connections_rejected_total` (counter): accepted sockets closed early, by reason
//! - `lb_worker_failures_total` (counter): work items or relays that errored or panicked
//! - `lb_queue_wait_seconds` (histogram): time from accept to a worker picking the item up
//! - `lb_backend_active_connections` (gauge): in-flight connections per backend
//! - `lb_backend_up` (gauge): 1 = up, 0 = down or draining
//! - `lb_backends_up` (gauge): number of eligible backends

use std::time::Duration;

use crate::load_balancer::registry::Registry;
use crate::load_balancer::BackendState;

pub fn record_dispatch(backend: &str) {
    metrics::counter!("lb_dispatched_total", "backend" => backend.to_string()).increment(1);
}

pub fn record_selection_failure() {
    metrics::counter!("lb_selection_failures_total").increment(1);
}

/// `reason` is one of `max_connections`, `queue_full`, `shutting_down`.
pub fn record_rejected(reason: &'static str) {
    metrics::counter!("lb_connections_rejected_total", "reason" => reason).increment(1);
}

pub fn record_worker_failure(kind: &'static str) {
    metrics::counter!("lb_worker_failures_total", "kind" => kind).increment(1);
}

pub fn record_queue_wait(waited: Duration) {
    metrics::histogram!("lb_queue_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_backend_state(backend: &str, state: BackendState) {
    let up = if state == BackendState::Up { 1.0 } else { 0.0 };
    metrics::gauge!("lb_backend_up", "backend" => backend.to_string()).set(up);
}

/// Periodic bookkeeping: per-backend gauges for the whole registry.
pub fn emit_snapshot(registry: &Registry) {
    let mut up = 0usize;
    for backend in registry.iter() {
        let label = backend.authority();
        metrics::gauge!("lb_backend_active_connections", "backend" => label.clone())
            .set(backend.active_connections() as f64);
        record_backend_state(&label, backend.state());
        if backend.is_up() {
            up += 1;
        }
    }
    metrics::gauge!("lb_backends_up").set(up as f64);
}
