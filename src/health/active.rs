//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe backends with a TCP connect
//! - Feed results into the core context's health hysteresis

use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::HealthCheckConfig;
use crate::engine::CoreContext;
use crate::lifecycle::ShutdownSignal;
use crate::load_balancer::BackendState;

pub struct HealthMonitor {
    context: Arc<CoreContext>,
    config: HealthCheckConfig,
}

impl HealthMonitor {
    pub fn new(context: Arc<CoreContext>) -> Self {
        let config = context.config().health_check.clone();
        Self { context, config }
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms.max(1)));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Probe every non-draining backend once. Returns the number of transitions.
    pub async fn check_all(&self) -> usize {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        let probes = self
            .context
            .registry()
            .iter()
            .filter(|b| b.state() != BackendState::Draining)
            .map(|backend| {
                let index = backend.index();
                let addr = backend.authority();
                async move {
                    let healthy = probe(&addr, timeout).await;
                    (index, addr, healthy)
                }
            })
            .collect::<Vec<_>>();

        let mut transitions = 0;
        for (index, addr, healthy) in join_all(probes).await {
            match self.context.record_probe(index, healthy) {
                Ok(Some(_)) => transitions += 1,
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(backend = %addr, error = %e, "Probe result discarded");
                }
            }
        }
        transitions
    }
}

async fn probe(addr: &str, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::debug!(backend = %addr, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::debug!(backend = %addr, "Health check failed: timeout");
            false
        }
    }
}
