//! Online/offline arbitration between a remote server and a local simulation.
//!
//! The proxy runs as one task. It starts in `Connecting`, becomes `Online`
//! once the WebSocket handshake succeeds and drops to `Offline` on the first
//! transport fault: connect failure, socket error, close or failed send.
//! Offline is final for the session. On entering it the proxy bootstraps a
//! [`Simulation`] and emits `player_assigned` plus a snapshot, so consumers
//! see the same event stream they would get from a fresh server connection.

use crate::config::ProxyConfig;
use crate::network::{Transport, TransportError, TransportEvent};
use log::{debug, error, info, warn};
use server::{Simulation, MAX_TICK_DT};
use shared::{now_secs, ClientMessage, ServerMessage};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Connecting,
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy task has stopped")]
    Stopped,
    #[error("proxy not ready after {0:?}")]
    NotReady(Duration),
}

pub struct ConnectionProxy {
    config: ProxyConfig,
    mode: ConnectionMode,
    mode_tx: watch::Sender<ConnectionMode>,
    events: mpsc::UnboundedSender<ServerMessage>,
    transport: Option<Transport>,
    simulation: Option<Simulation>,
    /// Last channel named by the server, reused for the offline world.
    channel_id: String,
    last_tick: Instant,
}

impl ConnectionProxy {
    /// Connects to `config.server_url` in the background.
    pub fn spawn(config: ProxyConfig) -> ProxyHandle {
        let url = config.server_url.clone();
        let timeout = config.connect_timeout;
        info!("Connecting to {}", url);
        Self::start(config, async move { Transport::connect(&url, timeout).await })
    }

    /// Starts online over an already established transport.
    pub fn spawn_with_transport(config: ProxyConfig, transport: Transport) -> ProxyHandle {
        Self::start(config, async move { Ok(transport) })
    }

    fn start<F>(config: ProxyConfig, connect: F) -> ProxyHandle
    where
        F: Future<Output = Result<Transport, TransportError>> + Send + 'static,
    {
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (mode_tx, mode_rx) = watch::channel(ConnectionMode::Connecting);

        let proxy = ConnectionProxy {
            channel_id: config.channel_id.clone(),
            config,
            mode: ConnectionMode::Connecting,
            mode_tx,
            events: events_tx,
            transport: None,
            simulation: None,
            last_tick: Instant::now(),
        };
        let task = tokio::spawn(proxy.run(connect, requests_rx));

        ProxyHandle {
            requests: requests_tx,
            events: events_rx,
            mode: mode_rx,
            task,
        }
    }

    async fn run<F>(mut self, connect: F, mut requests: mpsc::UnboundedReceiver<ClientMessage>)
    where
        F: Future<Output = Result<Transport, TransportError>>,
    {
        match connect.await {
            Ok(transport) => {
                info!("Connected, running online");
                self.transport = Some(transport);
                self.set_mode(ConnectionMode::Online);
            }
            Err(e) => {
                warn!("{}, switching to offline mode", e);
                self.go_offline();
            }
        }

        let mut ticker = interval(self.config.simulation.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(msg) => self.handle_request(msg),
                    None => {
                        debug!("All proxy handles dropped, stopping");
                        break;
                    }
                },
                event = next_transport_event(&mut self.transport) => {
                    self.handle_transport_event(event);
                }
                _ = ticker.tick(), if self.mode == ConnectionMode::Offline => {
                    self.tick_offline();
                }
            }
        }
    }

    fn handle_request(&mut self, msg: ClientMessage) {
        let Some(transport) = self.transport.as_ref() else {
            self.handle_offline(&msg);
            return;
        };

        let frame = match msg.to_json() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Failed to encode {}: {}", msg.type_name(), e);
                return;
            }
        };

        if let Err(e) = transport.send(frame) {
            warn!("Send failed ({}), switching to offline mode", e);
            self.go_offline();
            self.handle_offline(&msg);
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => match ServerMessage::from_json(&text) {
                Ok(msg) => {
                    if let ServerMessage::NetworkStateUpdate(update) = &msg {
                        if let Some(channel) = &update.channel_id {
                            self.channel_id = channel.clone();
                        }
                    }
                    self.emit(msg);
                }
                Err(e) => warn!("Dropping server frame: {}", e),
            },
            TransportEvent::Closed => {
                warn!("Server closed the connection, switching to offline mode");
                self.go_offline();
            }
            TransportEvent::Error(reason) => {
                warn!("Transport error ({}), switching to offline mode", reason);
                self.go_offline();
            }
            TransportEvent::SendFailed { frames, reason } => {
                warn!(
                    "Send failed ({}), switching to offline mode with {} unsent frame(s)",
                    reason,
                    frames.len()
                );
                self.go_offline();
                for frame in frames {
                    match ClientMessage::from_json(&frame) {
                        Ok(msg) => self.handle_offline(&msg),
                        Err(e) => debug!("Not replaying unsent frame: {}", e),
                    }
                }
            }
        }
    }

    fn go_offline(&mut self) {
        if self.mode == ConnectionMode::Offline {
            return;
        }
        self.transport = None;

        let mut simulation = Simulation::new(self.config.simulation);
        let events = simulation.bootstrap(&self.channel_id);
        self.simulation = Some(simulation);
        self.last_tick = Instant::now();

        self.set_mode(ConnectionMode::Offline);
        for msg in events {
            self.emit(msg);
        }
    }

    fn handle_offline(&mut self, msg: &ClientMessage) {
        let events = match self.simulation.as_mut() {
            Some(simulation) => simulation.handle_client_message(msg),
            None => {
                warn!("No local simulation for {}", msg.type_name());
                return;
            }
        };
        for event in events {
            self.emit(event);
        }
    }

    fn tick_offline(&mut self) {
        let dt = self.last_tick.elapsed().as_secs_f32().min(MAX_TICK_DT);
        self.last_tick = Instant::now();

        let events = match self.simulation.as_mut() {
            Some(simulation) => simulation.tick(now_secs(), dt),
            None => return,
        };
        for event in events {
            self.emit(event);
        }
    }

    fn set_mode(&mut self, mode: ConnectionMode) {
        self.mode = mode;
        self.mode_tx.send_replace(mode);
    }

    fn emit(&self, msg: ServerMessage) {
        if self.events.send(msg).is_err() {
            debug!("Event consumer gone");
        }
    }
}

async fn next_transport_event(transport: &mut Option<Transport>) -> TransportEvent {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

/// The consumer's side of a running proxy.
pub struct ProxyHandle {
    requests: mpsc::UnboundedSender<ClientMessage>,
    events: mpsc::UnboundedReceiver<ServerMessage>,
    mode: watch::Receiver<ConnectionMode>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub fn send_client_message(&self, msg: ClientMessage) -> Result<(), ProxyError> {
        self.requests.send(msg).map_err(|_| ProxyError::Stopped)
    }

    /// Non-blocking; meant to be drained once per frame.
    pub fn try_next_event(&mut self) -> Option<ServerMessage> {
        self.events.try_recv().ok()
    }

    pub fn drain_events(&mut self) -> Vec<ServerMessage> {
        std::iter::from_fn(|| self.try_next_event()).collect()
    }

    pub async fn next_event(&mut self) -> Option<ServerMessage> {
        self.events.recv().await
    }

    pub fn mode(&self) -> ConnectionMode {
        *self.mode.borrow()
    }

    /// Waits until the proxy has left `Connecting`, at most `bound`.
    pub async fn wait_until_ready(&mut self, bound: Duration) -> Result<ConnectionMode, ProxyError> {
        let mode = &mut self.mode;
        let ready = async {
            loop {
                let current = *mode.borrow_and_update();
                if current != ConnectionMode::Connecting {
                    return Ok(current);
                }
                if mode.changed().await.is_err() {
                    return Err(ProxyError::Stopped);
                }
            }
        };
        tokio::time::timeout(bound, ready)
            .await
            .unwrap_or(Err(ProxyError::NotReady(bound)))
    }

    /// Stops the proxy task and waits for it to finish.
    pub async fn shutdown(self) {
        let ProxyHandle { requests, task, .. } = self;
        drop(requests);
        if let Err(e) = task.await {
            error!("Proxy task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared::protocol::{ChatMessage, PlayerAssigned, StateUpdate};
    use std::collections::BTreeMap;
    use tokio_test::assert_ok;

    const READY: Duration = Duration::from_secs(2);

    struct Wire {
        sent: mpsc::UnboundedReceiver<String>,
        inject: mpsc::UnboundedSender<TransportEvent>,
    }

    fn online_proxy() -> (ProxyHandle, Wire) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let handle = ConnectionProxy::spawn_with_transport(
            ProxyConfig::default(),
            Transport::from_channels(out_tx, in_rx),
        );
        (
            handle,
            Wire {
                sent: out_rx,
                inject: in_tx,
            },
        )
    }

    fn inject(wire: &Wire, msg: &ServerMessage) {
        let text = msg.to_json().unwrap();
        wire.inject.send(TransportEvent::Message(text)).unwrap();
    }

    fn player_dict(id: &str) -> serde_json::Value {
        json!({
            "objId": id,
            "x": 64.0,
            "y": 64.0,
            "networkObjectType": "PLAYER",
            "isPersistent": true
        })
    }

    async fn next(handle: &mut ProxyHandle) -> ServerMessage {
        tokio::time::timeout(READY, handle.next_event())
            .await
            .expect("event in time")
            .expect("proxy alive")
    }

    #[tokio::test]
    async fn test_online_forwards_requests_and_events() {
        let (mut handle, mut wire) = online_proxy();
        assert_eq!(
            handle.wait_until_ready(READY).await,
            Ok(ConnectionMode::Online)
        );

        assert_ok!(handle.send_client_message(ClientMessage::move_to(32.0, 48.0)));
        let frame = wire.sent.recv().await.unwrap();
        assert_eq!(
            ClientMessage::from_json(&frame).unwrap(),
            ClientMessage::move_to(32.0, 48.0)
        );

        let assigned = ServerMessage::PlayerAssigned(PlayerAssigned {
            player_id: "remote-1".to_string(),
        });
        inject(&wire, &assigned);
        assert_eq!(next(&mut handle).await, assigned);
        assert_eq!(handle.mode(), ConnectionMode::Online);
    }

    #[tokio::test]
    async fn test_malformed_frames_are_dropped() {
        let (mut handle, wire) = online_proxy();
        handle.wait_until_ready(READY).await.unwrap();

        wire.inject
            .send(TransportEvent::Message("{oops".to_string()))
            .unwrap();
        wire.inject
            .send(TransportEvent::Message(
                r#"{"type":"teleport","data":{}}"#.to_string(),
            ))
            .unwrap();
        let ok = ServerMessage::Message(json!("still here"));
        inject(&wire, &ok);

        assert_eq!(next(&mut handle).await, ok);
        assert_eq!(handle.mode(), ConnectionMode::Online);
    }

    #[tokio::test]
    async fn test_transport_error_switches_to_offline() {
        let (mut handle, wire) = online_proxy();
        handle.wait_until_ready(READY).await.unwrap();

        let mut objects = BTreeMap::new();
        objects.insert("remote-1".to_string(), player_dict("remote-1"));
        inject(
            &wire,
            &ServerMessage::PlayerAssigned(PlayerAssigned {
                player_id: "remote-1".to_string(),
            }),
        );
        inject(
            &wire,
            &ServerMessage::NetworkStateUpdate(StateUpdate {
                network_objects: objects,
                channel_id: Some("channel-beta".to_string()),
            }),
        );
        next(&mut handle).await;
        next(&mut handle).await;

        wire.inject
            .send(TransportEvent::Error("connection reset".to_string()))
            .unwrap();

        let ServerMessage::PlayerAssigned(assigned) = next(&mut handle).await else {
            panic!("expected a fresh player assignment");
        };
        assert_ne!(assigned.player_id, "remote-1");

        let ServerMessage::NetworkStateUpdate(update) = next(&mut handle).await else {
            panic!("expected the offline snapshot");
        };
        assert_eq!(update.channel_id.as_deref(), Some("channel-beta"));
        assert!(update.network_objects.contains_key(&assigned.player_id));
        assert!(update
            .network_objects
            .values()
            .all(|v| v["isPersistent"] == true));
        assert_eq!(handle.mode(), ConnectionMode::Offline);
    }

    #[tokio::test]
    async fn test_failed_send_is_replayed_offline() {
        let (mut handle, wire) = online_proxy();
        handle.wait_until_ready(READY).await.unwrap();
        drop(wire.sent);

        assert_ok!(
            handle.send_client_message(ClientMessage::ClientChatMessage(ChatMessage {
                room_id: "lobby".to_string(),
                text: "anyone?".to_string(),
            }))
        );

        let ServerMessage::PlayerAssigned(assigned) = next(&mut handle).await else {
            panic!("expected bootstrap first");
        };
        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::NetworkStateUpdate(_)
        ));
        let ServerMessage::ServerChatMessage(echo) = next(&mut handle).await else {
            panic!("expected the replayed chat echo");
        };
        assert_eq!(echo["playerId"], json!(assigned.player_id));
        assert_eq!(echo["text"], "anyone?");
    }

    #[tokio::test]
    async fn test_unsent_frames_are_all_replayed_offline() {
        let (mut handle, wire) = online_proxy();
        handle.wait_until_ready(READY).await.unwrap();

        let chat = |text: &str| {
            ClientMessage::ClientChatMessage(ChatMessage {
                room_id: "lobby".to_string(),
                text: text.to_string(),
            })
        };
        let frames = vec![
            chat("one").to_json().unwrap(),
            "{garbled".to_string(),
            chat("two").to_json().unwrap(),
        ];
        wire.inject
            .send(TransportEvent::SendFailed {
                frames,
                reason: "broken pipe".to_string(),
            })
            .unwrap();

        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::PlayerAssigned(_)
        ));
        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::NetworkStateUpdate(_)
        ));
        let mut echoed = Vec::new();
        while echoed.len() < 2 {
            if let ServerMessage::ServerChatMessage(echo) = next(&mut handle).await {
                echoed.push(echo["text"].clone());
            }
        }
        assert_eq!(echoed, vec![json!("one"), json!("two")]);
        assert_eq!(handle.mode(), ConnectionMode::Offline);
    }

    #[tokio::test]
    async fn test_close_switches_to_offline_and_ticks() {
        let (mut handle, wire) = online_proxy();
        handle.wait_until_ready(READY).await.unwrap();
        wire.inject.send(TransportEvent::Closed).unwrap();

        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::PlayerAssigned(_)
        ));
        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::NetworkStateUpdate(_)
        ));

        // Offline ticks keep producing snapshots on their own.
        let mut snapshots = 0;
        while snapshots < 3 {
            if let ServerMessage::NetworkStateUpdate(_) = next(&mut handle).await {
                snapshots += 1;
            }
        }
        assert_eq!(handle.mode(), ConnectionMode::Offline);
    }

    #[tokio::test]
    async fn test_connect_failure_bootstraps_offline() {
        let handle = ConnectionProxy::start(ProxyConfig::default(), async {
            Err(TransportError::Timeout("ws://nowhere".to_string()))
        });
        let mut handle = handle;
        assert_eq!(
            handle.wait_until_ready(READY).await,
            Ok(ConnectionMode::Offline)
        );
        assert!(matches!(
            next(&mut handle).await,
            ServerMessage::PlayerAssigned(_)
        ));
    }

    #[tokio::test]
    async fn test_wait_until_ready_is_bounded() {
        let mut handle =
            ConnectionProxy::start(ProxyConfig::default(), std::future::pending());
        let bound = Duration::from_millis(50);
        assert_eq!(
            handle.wait_until_ready(bound).await,
            Err(ProxyError::NotReady(bound))
        );
        assert_eq!(handle.mode(), ConnectionMode::Connecting);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let (handle, _wire) = online_proxy();
        tokio::time::timeout(READY, handle.shutdown())
            .await
            .expect("proxy stops once its handle is gone");
    }
}
