//! OS signal handling.
//!
//! # Responsibilities
//! - Translate SIGTERM/SIGINT into a graceful stop
//! - Log SIGHUP without acting on it
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)

use std::io;

/// Signal that ended the wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    Interrupt,
    Terminate,
}

/// Wait until the process is asked to stop.
#[cfg(unix)]
pub async fn wait_for_stop() -> io::Result<StopSignal> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    loop {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
                return Ok(StopSignal::Interrupt);
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
                return Ok(StopSignal::Terminate);
            }
            _ = hangup.recv() => {
                tracing::info!("Received SIGHUP; configuration reload is not supported, ignoring");
            }
        }
    }
}

/// Wait until the process is asked to stop.
#[cfg(not(unix))]
pub async fn wait_for_stop() -> io::Result<StopSignal> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
    Ok(StopSignal::Interrupt)
}
