//! Diode sender — reads standard input and streams it to the receiver
//! over a unidirectional UDP link.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use diode_transport::{config, wire, Config};

/// Reliably send data over a unidirectional network.
#[derive(Parser, Debug)]
#[command(name = "diode-sender")]
struct Cli {
    /// Destination IP address or hostname.
    dest: String,

    /// Destination port.
    #[arg(short = 'p', long, default_value_t = wire::DEFAULT_PORT)]
    port: u16,

    /// Redundancy ratio (1.2 sends 1.2 times more data than the original).
    #[arg(short = 'r', long, default_value_t = config::DEFAULT_REDUND)]
    redundancy: f64,

    /// Rate limit in MB/s (0 disables).
    #[arg(short = 'b', long, default_value_t = 0.0)]
    byterate: f64,

    /// Number of UDP packets in an error-correction chunk. The default
    /// is also the sweet spot; larger values tolerate bigger loss
    /// bursts at the price of slower encoding.
    #[arg(short = 'N', long, default_value_t = config::DEFAULT_N_PKT)]
    n_pkt: u32,

    /// Size in bytes of the UDP packets to send, headers included.
    #[arg(short = 'M', long, default_value_t = config::DEFAULT_PKT_SIZE)]
    mtu: usize,

    /// Keepalive period in ms; 0 disables keepalives.
    #[arg(short = 'k', long, default_value_t = config::DEFAULT_KEEPALIVE_MS)]
    keepalive: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.dest);
    config.port = cli.port;
    config.redund = cli.redundancy;
    config.byterate = cli.byterate * 1024.0 * 1024.0;
    config.n_pkt = cli.n_pkt;
    config.pkt_size = cli.mtu;
    config.keepalive_ms = cli.keepalive;
    config.dump();

    if let Err(err) = diode_transport::send(&config, std::io::stdin()) {
        tracing::error!(%err, code = err.code(), "transfer failed");
        std::process::exit(err.code());
    }
}
