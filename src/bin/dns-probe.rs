//! Run one health check against a DNS endpoint.
//!
//! Exits 0 when the probe passes and 1 otherwise, so it can back container
//! health checks and readiness scripts.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};

use dns_server::config::{LogFormat, ObservabilityConfig};
use dns_server::health::{HealthCheck, ProbeSettings, ReplyPolicy};
use dns_server::observability::logging;
use dns_server::protocol::message;

#[derive(Clone, Copy, ValueEnum)]
enum TransportArg {
    Udp,
    Tcp,
}

#[derive(Parser)]
#[command(name = "dns-probe", version)]
#[command(about = "Probe a DNS endpoint the way the server probes itself", long_about = None)]
struct Cli {
    /// Endpoint to probe
    #[arg(short, long, default_value = "127.0.0.1:53")]
    target: SocketAddr,

    #[arg(long, value_enum, default_value_t = TransportArg::Udp)]
    transport: TransportArg,

    /// Probe timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Count any reply as healthy, even one that is not a valid response
    #[arg(long)]
    any_reply: bool,

    /// For TCP, only check that a connection is accepted
    #[arg(long)]
    connect_only: bool,

    /// Name to query
    #[arg(long)]
    query_name: Option<String>,

    /// Log probe details to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let observability = ObservabilityConfig {
        log_level: (if cli.verbose { "debug" } else { "warn" }).to_string(),
        log_format: LogFormat::Pretty,
        ..ObservabilityConfig::default()
    };
    if let Err(e) = logging::init_logging(&observability) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let mut settings = ProbeSettings {
        attempt_timeout: Duration::from_millis(cli.timeout_ms),
        reply_policy: if cli.any_reply { ReplyPolicy::AnyReply } else { ReplyPolicy::Strict },
        stream_exchange: !cli.connect_only,
        ..ProbeSettings::default()
    };
    if let Some(name) = cli.query_name {
        if let Err(e) = message::validate_name(&name) {
            eprintln!("Error: invalid query name `{name}`: {e}");
            return ExitCode::FAILURE;
        }
        settings.query_name = name;
    }

    let check = match cli.transport {
        TransportArg::Udp => HealthCheck::datagram(cli.target, settings),
        TransportArg::Tcp => HealthCheck::stream(cli.target, settings),
    };

    let started = Instant::now();
    match check.probe().await {
        Ok(()) => {
            println!("{}: healthy ({:?})", check.name(), started.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: unhealthy: {}", check.name(), e);
            ExitCode::FAILURE
        }
    }
}
