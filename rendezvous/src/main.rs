use clap::Parser;
use log::info;
use rendezvous::network::Server;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// UDP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Drop registrations whose owner has been silent this long
    #[arg(long, default_value = "10")]
    registration_ttl_secs: u64,

    /// Maximum number of simultaneously registered names
    #[arg(long, default_value = "4096")]
    max_registrations: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);

    info!(
        "Starting rendezvous on {} (ttl {}s, capacity {})",
        address, args.registration_ttl_secs, args.max_registrations
    );

    let mut server = Server::new(
        &address,
        args.max_registrations,
        Duration::from_secs(args.registration_ttl_secs),
    )
    .await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
