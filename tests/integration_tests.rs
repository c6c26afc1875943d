//! Integration tests for the world sync engine
//!
//! These tests run the proxy against real sockets: the development server,
//! a hand-driven WebSocket peer and an address nobody listens on.

use client::{ClientGameState, ConnectionMode, ConnectionProxy, ProxyConfig, ProxyHandle, RenderSink};
use server::network::Server;
use server::SimulationConfig;
use shared::protocol::{PlayerAssigned, StateUpdate};
use shared::{ClientMessage, ServerMessage};
use std::time::Duration;
use tokio::net::TcpListener;

const READY: Duration = Duration::from_secs(5);

async fn next_event(handle: &mut ProxyHandle) -> ServerMessage {
    tokio::time::timeout(READY, handle.next_event())
        .await
        .expect("proxy event in time")
        .expect("proxy still running")
}

/// Address that refuses connections.
async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

async fn start_dev_server(channel: &str) -> String {
    let server = Server::bind("127.0.0.1:0", SimulationConfig::default(), channel)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    format!("ws://{}", addr)
}

fn config(url: String, channel: &str) -> ProxyConfig {
    ProxyConfig {
        connect_timeout: Duration::from_secs(2),
        ..ProxyConfig::new(url, channel)
    }
}

/// Reads the bootstrap pair and returns the player id and snapshot.
async fn expect_bootstrap(handle: &mut ProxyHandle) -> (String, StateUpdate) {
    let player_id = match next_event(handle).await {
        ServerMessage::PlayerAssigned(assigned) => assigned.player_id,
        other => panic!("expected player_assigned, got {:?}", other),
    };
    match next_event(handle).await {
        ServerMessage::NetworkStateUpdate(update) => (player_id, update),
        other => panic!("expected a snapshot, got {:?}", other),
    }
}

/// ONLINE TESTS
mod online_tests {
    use super::*;

    /// Tests that the dev server bootstrap reaches the consumer untouched
    #[tokio::test]
    async fn proxy_relays_dev_server_bootstrap() {
        let url = start_dev_server("channel-beta").await;
        let mut proxy = ConnectionProxy::spawn(config(url, "channel-alpha"));

        assert_eq!(
            proxy.wait_until_ready(READY).await,
            Ok(ConnectionMode::Online)
        );
        let (player_id, update) = expect_bootstrap(&mut proxy).await;
        assert_eq!(update.channel_id.as_deref(), Some("channel-beta"));
        assert!(update.network_objects.contains_key(&player_id));

        proxy.shutdown().await;
    }

    /// Tests a move request round trip through the socket
    #[tokio::test]
    async fn move_request_round_trip() {
        let url = start_dev_server("channel-alpha").await;
        let mut proxy = ConnectionProxy::spawn(config(url, "channel-alpha"));
        proxy.wait_until_ready(READY).await.unwrap();

        let (player_id, update) = expect_bootstrap(&mut proxy).await;
        let player = &update.network_objects[&player_id];
        let x = player["x"].as_f64().unwrap() as f32;
        let y = player["y"].as_f64().unwrap() as f32;

        proxy
            .send_client_message(ClientMessage::move_to(x + 64.0, y))
            .unwrap();

        loop {
            if let ServerMessage::PlayerPathUpdate(path) = next_event(&mut proxy).await {
                if path.player_id == player_id {
                    let last = path.path.last().unwrap();
                    assert_eq!((last.x, last.y), (x + 64.0, y));
                    break;
                }
            }
        }
        assert_eq!(proxy.mode(), ConnectionMode::Online);
    }
}

/// FAILOVER TESTS
mod failover_tests {
    use super::*;
    use futures_util::SinkExt;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::oneshot;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    /// Tests the offline bootstrap when nothing listens at the server URL
    #[tokio::test]
    async fn offline_when_server_unreachable() {
        let mut proxy = ConnectionProxy::spawn(config(unreachable_url().await, "channel-beta"));

        assert_eq!(
            proxy.wait_until_ready(READY).await,
            Ok(ConnectionMode::Offline)
        );
        let (player_id, update) = expect_bootstrap(&mut proxy).await;
        assert_eq!(update.channel_id.as_deref(), Some("channel-beta"));
        assert!(update.network_objects.contains_key(&player_id));
        assert!(update.network_objects.contains_key("wall-16-16"));
    }

    /// Tests that a server hang-up is replaced by a local bootstrap
    #[tokio::test]
    async fn failover_after_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (hang_up_tx, hang_up_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let assigned = ServerMessage::PlayerAssigned(PlayerAssigned {
                player_id: "remote-1".to_string(),
            });
            let mut objects = BTreeMap::new();
            objects.insert(
                "remote-1".to_string(),
                json!({
                    "objId": "remote-1",
                    "x": 64.0,
                    "y": 64.0,
                    "networkObjectType": "PLAYER",
                    "isPersistent": true
                }),
            );
            let snapshot = ServerMessage::NetworkStateUpdate(StateUpdate {
                network_objects: objects,
                channel_id: Some("channel-beta".to_string()),
            });

            for msg in [assigned, snapshot] {
                ws.send(Message::Text(msg.to_json().unwrap())).await.unwrap();
            }
            let _ = hang_up_rx.await;
            let _ = ws.close(None).await;
        });

        let mut proxy = ConnectionProxy::spawn(config(url, "channel-alpha"));
        assert_eq!(
            proxy.wait_until_ready(READY).await,
            Ok(ConnectionMode::Online)
        );

        let (remote_id, _) = expect_bootstrap(&mut proxy).await;
        assert_eq!(remote_id, "remote-1");
        assert_eq!(proxy.mode(), ConnectionMode::Online);

        hang_up_tx.send(()).unwrap();

        let (local_id, update) = expect_bootstrap(&mut proxy).await;
        assert_ne!(local_id, remote_id);
        assert_eq!(proxy.mode(), ConnectionMode::Offline);
        // The channel named by the server survives the failover.
        assert_eq!(update.channel_id.as_deref(), Some("channel-beta"));
        assert!(update
            .network_objects
            .values()
            .all(|v| v["isPersistent"] == true));
    }
}

/// CONSUMER TESTS
mod consumer_tests {
    use super::*;

    #[derive(Default)]
    struct CountingSink {
        removed: usize,
    }

    impl RenderSink for CountingSink {
        fn remove_object_layer_animation(&mut self, _obj_id: &str, _layer_id: &str) {
            self.removed += 1;
        }
    }

    /// Tests a consumer world driven by the offline proxy end to end
    #[tokio::test]
    async fn client_state_follows_offline_world() {
        let mut proxy = ConnectionProxy::spawn(config(unreachable_url().await, "channel-alpha"));
        proxy.wait_until_ready(READY).await.unwrap();

        let mut state = ClientGameState::new();
        let mut sink = CountingSink::default();
        let mut now = shared::now_secs();

        while state.local_player().is_none() {
            let event = next_event(&mut proxy).await;
            state.apply_server_message(event, now, &mut sink);
        }
        let start = state.local_player().unwrap().position;
        let player_id = state.player_id().unwrap().to_string();

        let request = state.request_move(start.0, start.1 + 64.0, now);
        proxy.send_client_message(request).unwrap();

        loop {
            let event = next_event(&mut proxy).await;
            let is_ours =
                matches!(&event, ServerMessage::PlayerPathUpdate(u) if u.player_id == player_id);
            state.apply_server_message(event, now, &mut sink);
            if is_ours {
                break;
            }
        }

        let player = state.local_player().unwrap();
        assert!(player.has_active_path());
        let markers = state
            .world()
            .objects()
            .into_iter()
            .filter(|o| o.id.starts_with("gfx-"))
            .count();
        assert_eq!(markers, player.path().len() + 1);

        // Let every marker decay.
        now += 5.0;
        state.update(0.05, now, &mut sink);
        assert!(state
            .world()
            .objects()
            .iter()
            .all(|o| !o.id.starts_with("gfx-")));
        assert_eq!(sink.removed, markers);
    }
}
