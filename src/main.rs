//! relay-balancer
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ event loop ──▶ worker queue ──▶ worker ──▶ strategy.select
//!              (accept,        (bounded,                   │
//!               limits)         try_send)                  ▼
//!   Client ◀──────────────── TCP relay ◀────────────── backend lease
//!
//!   health monitor ──▶ record_probe ──▶ backend state (Down/Up/Draining)
//!   signals ──▶ shutdown ──▶ destroy (drain workers, teardown, release)
//! ```

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use relay_balancer::config::loader::{load_config, ConfigError};
use relay_balancer::config::validation::validate_config;
use relay_balancer::config::{BackendConfig, EngineConfig};
use relay_balancer::health::HealthMonitor;
use relay_balancer::lifecycle::signals::wait_for_stop;
use relay_balancer::observability::logging::init_logging;
use relay_balancer::{BackendState, CoreContext};

#[derive(Parser)]
#[command(name = "relay-balancer")]
#[command(about = "TCP connection load balancer", version, long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listening port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Selection algorithm (roundrobin, leastconn, weighted, iphash, urihash, random)
    #[arg(short, long)]
    algorithm: Option<String>,

    /// Backend to add, repeatable
    #[arg(short, long = "backend", value_name = "HOST:PORT[:WEIGHT]")]
    backends: Vec<BackendConfig>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn build_config(cli: &Cli) -> Result<EngineConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    if let Some(port) = cli.port {
        config.listener.port = port;
    }
    if let Some(algorithm) = &cli.algorithm {
        config.algorithm = algorithm.clone();
    }
    config.backends.extend(cli.backends.iter().cloned());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    if cli.check {
        println!(
            "configuration ok: port {}, algorithm {}, {} backend(s)",
            config.listener.port,
            config.algorithm,
            config.backends.len()
        );
        return Ok(());
    }

    init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "relay-balancer starting");

    let health_enabled = config.health_check.enabled;
    let context = Arc::new(CoreContext::create(config)?);
    let shutdown = context.shutdown_handle();

    if health_enabled {
        tokio::spawn(HealthMonitor::new(Arc::clone(&context)).run(shutdown.subscribe()));
    } else {
        for index in 0..context.registry().snapshot_count() {
            context.mark_state(index, BackendState::Up)?;
        }
        tracing::info!("Health checks disabled, all backends marked up");
    }

    let result = tokio::select! {
        res = context.run() => res,
        signal = wait_for_stop() => {
            match signal {
                Ok(signal) => tracing::info!(?signal, "Stop requested"),
                Err(e) => tracing::error!(error = %e, "Signal handling failed, stopping"),
            }
            Ok(())
        }
    };

    shutdown.trigger();
    context.destroy().await;
    result?;

    tracing::info!("Shutdown complete");
    Ok(())
}
