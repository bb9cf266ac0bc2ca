//! Tickrelay binary.
//!
//! # Usage
//!
//! ```bash
//! # Physics engine connects over TCP, flight controllers over local sockets
//! tickrelay --upstream tcpl:9000 --downstream uds:/tmp/fabric uav1,uav2
//!
//! # Different names on each fabric, with a sync service for observers
//! tickrelay --upstream tcpc:10.0.0.2:9000 --downstream tcpl:9001 \
//!     --external-sync-server 9999 gz1:fc1 gz2:fc2
//! ```

use std::process::ExitCode;

use clap::Parser;
use tickrelay_server::{
    ParticipantNames, Relay, RelayConfig, RelayError, StatusWriter, TransportSpec,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lockstep relay between two transport fabrics
#[derive(Parser, Debug)]
#[command(name = "tickrelay")]
#[command(about = "Relay one message per participant per tick between two transport fabrics")]
#[command(version)]
struct Args {
    /// Upstream fabric: tcpl:PORT, tcpc:HOST:PORT or uds:PATH
    #[arg(long, value_name = "SPEC")]
    upstream: TransportSpec,

    /// Downstream fabric: tcpl:PORT, tcpc:HOST:PORT or uds:PATH
    #[arg(long, value_name = "SPEC")]
    downstream: TransportSpec,

    /// Initialize the downstream fabric before the upstream one
    #[arg(long)]
    invert_order: bool,

    /// Serve barrier/telemetry subscribers on this TCP port
    #[arg(long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    external_sync_server: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Participant names, comma-separated; NAME or UPSTREAM:DOWNSTREAM
    #[arg(required = true, value_name = "NAMES")]
    names: Vec<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_handshake_violation() => {
            tracing::error!(error = %e, "handshake violation, aborting session");
            ExitCode::FAILURE
        },
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        },
    }
}

fn run(args: Args) -> Result<(), RelayError> {
    let config = RelayConfig {
        names: ParticipantNames::parse(&args.names)?,
        upstream: args.upstream,
        downstream: args.downstream,
        invert_order: args.invert_order,
        sync_port: args.external_sync_server,
    };

    tracing::info!(participants = config.names.len(), "tickrelay starting");

    let mut relay = Relay::start(&config, &mut StatusWriter::stdout())?;
    relay.run()?;

    Ok(())
}
