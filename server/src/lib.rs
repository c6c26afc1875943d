//! # World Server Emulation
//!
//! Everything needed to stand in for the authoritative world server.
//!
//! ## Modules
//!
//! ### Factory (`factory`)
//! Per-channel initial worlds: fixed obstacle mounds, a player spawn chosen
//! from channel candidates, and autonomous agents placed by a bounded random
//! search around a preferred cell.
//!
//! ### Simulation (`simulation`)
//! A private `WorldState` driven by a fixed-period tick. Each tick integrates
//! motion, sends idle agents to a random walkable target within their wander
//! radius, sweeps decayed objects and emits a snapshot of persistent objects.
//! Client requests (move, chat, item activation, channel change) are answered
//! with the same messages a remote server would send.
//!
//! The client proxy switches to a `Simulation` when its connection drops, so
//! the consuming application keeps seeing the same event stream.
//!
//! ### Network (`network`)
//! A development WebSocket server that runs one `Simulation` per connection.
//! It is a test double for the real server, not a replacement: there is no
//! shared world, persistence or authentication.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Server;
//! use server::simulation::SimulationConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind("127.0.0.1:8080", SimulationConfig::default(), "channel-alpha").await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod factory;
pub mod network;
pub mod simulation;

pub use factory::{find_valid_spawn, InitialWorld, Mound, SpawnConfig, WorldFactory};
pub use simulation::{Simulation, SimulationConfig, MAX_TICK_DT};
