use clap::Parser;
use log::{error, info};
use server::network::Server;
use server::simulation::SimulationConfig;
use std::time::Duration;

/// Development server: serves a private local simulation to each WebSocket client.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Tick rate (updates per second)
    #[clap(short, long, default_value = "20")]
    tick_rate: u32,
    /// Channel generated for new connections
    #[clap(short, long, default_value = shared::DEFAULT_CHANNEL)]
    channel: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        println!("Tip: Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = SimulationConfig {
        tick_period: Duration::from_secs_f64(1.0 / args.tick_rate.max(1) as f64),
        ..SimulationConfig::default()
    };

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, config, args.channel).await?;
    info!(
        "Serving {} Hz simulations, press Ctrl+C to stop",
        args.tick_rate.max(1)
    );

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
