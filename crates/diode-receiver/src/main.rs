//! Diode receiver — reassembles a stream received over a unidirectional
//! UDP link and writes it to standard output.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use diode_transport::{wire, Config};

/// Reliably receive data over a unidirectional network.
#[derive(Parser, Debug)]
#[command(name = "diode-receiver")]
struct Cli {
    /// Bind IP address.
    bind: String,

    /// Bind port.
    #[arg(short = 'p', long, default_value_t = wire::DEFAULT_PORT)]
    port: u16,

    /// Timeout in seconds: if no packets arrive for this long during a
    /// transfer, the transfer is considered interrupted.
    #[arg(short = 't', long, default_value_t = 1)]
    timeout: u64,

    /// Rough memory limit in megabytes for in-flight buffering.
    #[arg(short = 'm', long, default_value_t = 100)]
    mem_limit: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::new(cli.bind);
    config.port = cli.port;
    config.timeout = Duration::from_secs(cli.timeout);
    config.mem_limit = cli.mem_limit * 1024 * 1024;
    config.dump();

    let mut stdout = std::io::stdout();
    if let Err(err) = diode_transport::receive(&config, &mut stdout) {
        tracing::error!(%err, code = err.code(), "reception failed");
        std::process::exit(err.code());
    }
}
