//! Development WebSocket server.
//!
//! Every accepted socket gets its own [`Simulation`]: the client receives
//! `player_assigned` and a snapshot, then periodic snapshots and path updates.
//! There is no shared world between connections.

use crate::simulation::{Simulation, SimulationConfig, MAX_TICK_DT};
use futures_util::sink::Sink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{now_secs, ClientMessage, ServerMessage};
use std::io;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub struct Server {
    listener: TcpListener,
    config: SimulationConfig,
    channel_id: String,
}

impl Server {
    pub async fn bind(
        addr: &str,
        config: SimulationConfig,
        channel_id: impl Into<String>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on ws://{}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            channel_id: channel_id.into(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            info!("New connection from {}", addr);

            let config = self.config;
            let channel_id = self.channel_id.clone();
            tokio::spawn(async move {
                match run_session(stream, config, &channel_id).await {
                    Ok(()) => info!("Client {} disconnected", addr),
                    Err(e) => warn!("Session with {} ended: {}", addr, e),
                }
            });
        }
    }
}

async fn run_session(
    stream: TcpStream,
    config: SimulationConfig,
    channel_id: &str,
) -> Result<(), WsError> {
    let ws_stream = accept_async(stream).await?;
    let (mut sink, mut source) = ws_stream.split();

    let mut sim = Simulation::new(config);
    send_all(&mut sink, sim.bootstrap(channel_id)).await?;

    let mut ticker = interval(config.tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match ClientMessage::from_json(&text) {
                    Ok(msg) => {
                        debug!("Received {}", msg.type_name());
                        send_all(&mut sink, sim.handle_client_message(&msg)).await?;
                    }
                    Err(e) => warn!("Dropping client frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
            },
            _ = ticker.tick() => {
                let dt = last_tick.elapsed().as_secs_f32().min(MAX_TICK_DT);
                last_tick = Instant::now();
                send_all(&mut sink, sim.tick(now_secs(), dt)).await?;
            }
        }
    }
}

async fn send_all<S>(sink: &mut S, messages: Vec<ServerMessage>) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    for msg in messages {
        match msg.to_json() {
            Ok(text) => sink.send(Message::Text(text)).await?,
            Err(e) => error!("Failed to encode {}: {}", msg.type_name(), e),
        }
    }
    Ok(())
}
