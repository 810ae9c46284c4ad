//! ticketbox console client
//!
//! Reads commands from standard input and sends them to the server.

use std::io;
use ticketbox::client::console::Console;
use ticketbox::client::Client;
use ticketbox::config::ClientConfig;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load()?;

    // Log to stderr so diagnostics stay out of command output.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        max_reconnect_attempts = config.reconnect.max_attempts,
        "Starting ticketbox client"
    );

    let mut client = Client::new(&config);
    if let Err(e) = client.open() {
        // The first command retries through the reconnect policy.
        warn!(error = %e, "Server not reachable yet");
    }

    let mut console = Console::new(client, io::stdout(), io::stderr());
    console.run(&mut io::stdin().lock())?;
    Ok(())
}
