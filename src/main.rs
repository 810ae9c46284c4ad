//! ticketbox server
//!
//! Loads the ticket collection, serves it over TCP until interrupted, then
//! writes it back to the data file.
//!
//! Configuration via CLI arguments or TOML file.

use ticketbox::commands::register_all;
use ticketbox::config::ServerConfig;
use ticketbox::dispatch::Dispatcher;
use ticketbox::persistence::JsonFileStore;
use ticketbox::runtime::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = ServerConfig::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        data_file = %config.data_file.display(),
        max_connections = config.max_connections,
        "Starting ticketbox server"
    );

    let file = JsonFileStore::new(&config.data_file);
    let mut dispatcher = Dispatcher::new(file.load_initial()?);
    register_all(&mut dispatcher)?;

    let mut server = Server::new(&config, dispatcher)?;
    server.bind()?;

    let handle = server.handle();
    ctrlc::set_handler(move || handle.stop())?;

    let result = server.start();
    if let Err(e) = &result {
        error!(error = %e, "Event loop failed");
    }

    // Save even when the loop failed, so accepted changes are not lost.
    let dispatcher = server.into_dispatcher();
    file.persist(dispatcher.state())?;

    result.map_err(Into::into)
}
