//! World model shared by the client proxy and the server emulation: objects,
//! the locked world store with its grid and maze, A* and the JSON wire protocol.

pub mod grid;
pub mod object;
pub mod pathfinding;
pub mod protocol;
pub mod world_state;

pub use grid::{Cell, Maze, Tile, WorldDims};
pub use object::{AgentParams, ObjectError, ObjectType, Rgba, Waypoint, WorldObject};
pub use pathfinding::{cells_to_waypoints, find_path};
pub use protocol::{ClientMessage, ObjectDict, ProtocolError, ServerMessage};
pub use world_state::{Motion, RemovalNotice, WorldGuard, WorldState};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const WORLD_WIDTH: f32 = 2048.0;
pub const WORLD_HEIGHT: f32 = 2048.0;
/// Object grid resolution. Every object occupies one cell of this size.
pub const CELL_SIZE: f32 = 32.0;
/// Maze resolution, never coarser than `CELL_SIZE`.
pub const MAZE_CELL_SIZE: f32 = 16.0;

pub const PLAYER_SPEED: f32 = 160.0;
pub const AGENT_SPEED: f32 = 90.0;

pub const AGENT_WANDER_RADIUS: f32 = 256.0;
pub const AGENT_PATH_COOLDOWN: f64 = 3.0;

/// Lifetime of client-side click markers and path markers, in seconds.
pub const CLICK_POINTER_DECAY: f64 = 0.8;
pub const PATH_POINT_DECAY: f64 = 2.5;

pub const DEFAULT_CHANNEL: &str = "channel-alpha";

/// Wall-clock seconds since the unix epoch. Decay times on the wire use this clock.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}
