//! # World Client Library
//!
//! The client half of the world sync engine. It keeps a local copy of the
//! server's world up to date and keeps producing the same event stream when
//! the server goes away.
//!
//! ## Architecture Overview
//!
//! ### Connection Proxy
//! A single task owns either a WebSocket transport (online) or a local
//! `server::Simulation` (offline). Client requests go in through a channel,
//! server-shaped events come out through another. The first transport fault
//! flips the proxy offline for the rest of the session; the local simulation
//! then announces a fresh player and a full snapshot, exactly as a server does
//! on connect.
//!
//! ### Consumer World
//! `ClientGameState` applies proxy events in order to its own `WorldState`,
//! integrates motion every frame and predicts click and path markers that only
//! the render layer cares about. Removals reach the renderer through the
//! `RenderSink` trait.
//!
//! ## Module Organization
//!
//! ### Config Module (`config`)
//! Server URL, fallback channel, connect bound and offline tick tuning.
//!
//! ### Game Module (`game`)
//! `ClientGameState` and the `RenderSink` callback trait.
//!
//! ### Network Module (`network`)
//! WebSocket transport split into reader and writer tasks.
//!
//! ### Proxy Module (`proxy`)
//! The `Connecting`/`Online`/`Offline` state machine and its handle.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ProxyConfig;
//! use client::game::{ClientGameState, RenderSink};
//! use client::proxy::ConnectionProxy;
//! use std::time::Duration;
//!
//! struct NoRender;
//!
//! impl RenderSink for NoRender {
//!     fn remove_object_layer_animation(&mut self, _obj_id: &str, _layer_id: &str) {}
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut proxy = ConnectionProxy::spawn(ProxyConfig::default());
//!     proxy.wait_until_ready(Duration::from_secs(5)).await?;
//!
//!     let mut state = ClientGameState::new();
//!     let now = shared::now_secs();
//!     for event in proxy.drain_events() {
//!         state.apply_server_message(event, now, &mut NoRender);
//!     }
//!     let request = state.request_move(256.0, 256.0, now);
//!     proxy.send_client_message(request)?;
//!
//!     proxy.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod network;
pub mod proxy;

pub use config::ProxyConfig;
pub use game::{ClientGameState, RenderSink};
pub use network::{Transport, TransportError, TransportEvent};
pub use proxy::{ConnectionMode, ConnectionProxy, ProxyError, ProxyHandle};
