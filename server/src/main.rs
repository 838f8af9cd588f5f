use clap::Parser;
use env_logger::Env;
use log::info;
use server::{BoxError, Server, ServerConfig};
use shared::{DEFAULT_PORT, STATUS_PATH};
use std::time::Duration;

/// Relays player positions between WebSocket clients
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Seconds to wait for the next client message
    #[clap(long, default_value = "120")]
    read_timeout_secs: u64,
    /// Seconds allowed for each broadcast delivery
    #[clap(long, default_value = "5")]
    write_timeout_secs: u64,
    /// Seconds allowed for each initial-sync write
    #[clap(long, default_value = "10")]
    sync_timeout_secs: u64,
    /// Seconds between idle sweeps
    #[clap(long, default_value = "10")]
    sweep_interval_secs: u64,
    /// Seconds of silence before a player is evicted
    #[clap(long, default_value = "30")]
    stale_timeout_secs: u64,
    /// Capacity of the broadcast queue
    #[clap(long, default_value = "1")]
    dispatch_queue: usize,
    /// Capacity of each connection's outbound queue
    #[clap(long, default_value = "64")]
    outbound_queue: usize,
    /// Random bytes per player identity
    #[clap(long, default_value = "8")]
    id_bytes: usize,
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            read_timeout: Duration::from_secs(args.read_timeout_secs),
            write_timeout: Duration::from_secs(args.write_timeout_secs),
            sync_timeout: Duration::from_secs(args.sync_timeout_secs),
            sweep_interval: Duration::from_secs(args.sweep_interval_secs),
            stale_timeout: Duration::from_secs(args.stale_timeout_secs),
            dispatch_queue: args.dispatch_queue,
            outbound_queue: args.outbound_queue,
            id_bytes: args.id_bytes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from(Args::parse());

    // Bind failures are fatal
    let server = Server::bind(config).await?;
    let addr = server.local_addr()?;
    info!("View status at http://{}{}", addr, STATUS_PATH);
    info!("Press Ctrl+C to stop the server");

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
