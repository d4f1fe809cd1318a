//! DNS endpoint supervisor.
//!
//! Serves DNS on one address over TCP and UDP, and only reports the service
//! as up once both transports answer a real query.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ config ──▶ lifecycle::startup
//!                                   │
//!                                   ▼
//!                        ┌──────────────────────┐
//!   SIGINT/SIGTERM ────▶ │ lifecycle::supervisor │
//!                        └──┬───────────────┬───┘
//!                           │ start/stop    │ probe
//!                           ▼               ▼
//!                  net::DnsListener   health::HealthCheck
//!                  (tcp + udp)        (udp + tcp self-probes)
//!                           │
//!                           ▼
//!                  protocol::RequestHandler
//! ```
//!
//! Exit status is 0 after a requested shutdown and 1 on any startup,
//! readiness or runtime failure.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use dns_server::config::load_config;
use dns_server::lifecycle::{build_supervisor, signals};
use dns_server::observability::{logging, metrics};
use dns_server::protocol::EchoHandler;

#[derive(Parser)]
#[command(name = "dns-server", version)]
#[command(about = "DNS server with readiness-gated TCP and UDP listeners", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, value_parser = existing_file)]
    config: PathBuf,
}

fn existing_file(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_file() {
        Ok(path)
    } else {
        Err(format!("config file `{value}` does not exist"))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            return ExitCode::FAILURE;
        }
        Err(e) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&cli.config)?;
    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "dns-server starting"
    );
    tracing::info!(
        address = %config.address,
        port = config.port,
        timeout_ms = config.timeout_ms,
        poll_interval_ms = config.health.poll_interval_ms,
        reply_policy = ?config.health.reply_policy,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let supervisor = build_supervisor(&config, Arc::new(EchoHandler))?;
    let signal_task = signals::spawn_signal_listener(supervisor.shutdown());

    let result = supervisor.run().await;
    signal_task.abort();

    let report = result.inspect_err(|e| {
        tracing::error!(kind = e.kind(), error = %e, "Supervisor failed");
    })?;

    if report.is_clean() {
        tracing::info!("Shutdown complete");
    } else {
        tracing::warn!(faults = report.faults.len(), "Shutdown complete with faults");
    }
    Ok(())
}
