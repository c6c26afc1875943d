use clap::Parser;
use client::config::{ProxyConfig, DEFAULT_SERVER_URL};
use client::game::{ClientGameState, RenderSink};
use client::proxy::ConnectionProxy;
use log::{debug, info, warn};
use rand::Rng;
use server::SimulationConfig;
use shared::now_secs;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WebSocket URL of the world server
    #[arg(short = 's', long, default_value = DEFAULT_SERVER_URL)]
    server: String,

    /// Channel to use if the server cannot be reached
    #[arg(short = 'c', long, default_value = shared::DEFAULT_CHANNEL)]
    channel: String,

    /// Connection handshake bound in milliseconds
    #[arg(long, default_value = "3000")]
    connect_timeout_ms: u64,

    /// Offline simulation tick period in milliseconds
    #[arg(long, default_value = "50")]
    tick_ms: u64,

    /// Issue a random move request this often
    #[arg(short = 'w', long)]
    wander_secs: Option<f64>,

    /// Frames per second of the headless loop
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Exit after this many seconds instead of waiting for Ctrl+C
    #[arg(long)]
    run_secs: Option<f64>,
}

/// Stand-in for a renderer: logs the layers it is told to retire.
#[derive(Default)]
struct LogRenderSink {
    removed: usize,
}

impl RenderSink for LogRenderSink {
    fn remove_object_layer_animation(&mut self, obj_id: &str, layer_id: &str) {
        self.removed += 1;
        debug!("Retire layer {} of {}", layer_id, obj_id);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = ProxyConfig {
        server_url: args.server.clone(),
        channel_id: args.channel.clone(),
        connect_timeout: Duration::from_millis(args.connect_timeout_ms),
        simulation: SimulationConfig {
            tick_period: Duration::from_millis(args.tick_ms.max(1)),
            ..SimulationConfig::default()
        },
    };

    info!("Starting client...");
    let mut proxy = ConnectionProxy::spawn(config.clone());
    let mode = proxy
        .wait_until_ready(config.connect_timeout + Duration::from_secs(1))
        .await?;
    info!("Proxy ready in {:?} mode", mode);

    let mut state = ClientGameState::new();
    let mut sink = LogRenderSink::default();
    let mut rng = rand::thread_rng();

    let mut frame = interval(Duration::from_secs_f64(1.0 / args.fps.max(1) as f64));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let started = Instant::now();
    let mut last_frame = Instant::now();
    let mut last_status = Instant::now();
    let mut last_wander = Instant::now();

    loop {
        tokio::select! {
            _ = frame.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }

        let now = now_secs();
        let dt = last_frame.elapsed().as_secs_f32();
        last_frame = Instant::now();

        for event in proxy.drain_events() {
            state.apply_server_message(event, now, &mut sink);
        }
        state.update(dt, now, &mut sink);

        if let Some(secs) = args.wander_secs {
            if last_wander.elapsed().as_secs_f64() >= secs {
                last_wander = Instant::now();
                let dims = state.world().dims();
                let x = rng.gen_range(0.0..dims.width);
                let y = rng.gen_range(0.0..dims.height);
                let request = state.request_move(x, y, now);
                if let Err(e) = proxy.send_client_message(request) {
                    warn!("Could not send move request: {}", e);
                    break;
                }
            }
        }

        if last_status.elapsed() >= Duration::from_secs(2) {
            last_status = Instant::now();
            let position = state.local_player().map(|p| p.position);
            info!(
                "mode={:?} channel={} objects={} removed_layers={} player={:?}",
                proxy.mode(),
                state.channel_id().unwrap_or("-"),
                state.world().len(),
                sink.removed,
                position
            );
        }

        if let Some(limit) = args.run_secs {
            if started.elapsed().as_secs_f64() >= limit {
                break;
            }
        }
    }

    proxy.shutdown().await;
    Ok(())
}
