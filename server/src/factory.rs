//! Initial world generation per channel.
//!
//! Obstacle shapes are fixed per channel; spawn choices are randomized and
//! validated against a maze built from the generated walls only.

use log::{debug, warn};
use rand::Rng;
use shared::{
    AgentParams, Cell, Maze, WorldDims, WorldObject, AGENT_PATH_COOLDOWN, AGENT_WANDER_RADIUS,
};
use std::collections::HashSet;

/// A rectangle of walls in grid units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mound {
    pub grid_x: usize,
    pub grid_y: usize,
    pub width: usize,
    pub height: usize,
}

const fn mound(grid_x: usize, grid_y: usize, width: usize, height: usize) -> Mound {
    Mound {
        grid_x,
        grid_y,
        width,
        height,
    }
}

const ALPHA_MOUNDS: &[Mound] = &[
    mound(10, 10, 4, 4),
    mound(20, 8, 2, 12),
    mound(30, 30, 6, 3),
    mound(45, 15, 3, 10),
    mound(8, 40, 12, 2),
    mound(50, 50, 5, 5),
    mound(12, 12, 3, 3),
];

const BETA_MOUNDS: &[Mound] = &[
    mound(16, 16, 32, 2),
    mound(16, 46, 32, 2),
    mound(16, 18, 2, 10),
    mound(46, 36, 2, 10),
    mound(30, 26, 4, 12),
];

const DEFAULT_MOUNDS: &[Mound] = &[mound(12, 12, 3, 3), mound(40, 20, 4, 4), mound(24, 44, 6, 2)];

const DEFAULT_PLAYER_SPAWN: (usize, usize) = (2, 2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnConfig {
    /// Search radius around a blocked preferred cell, in maze cells.
    pub search_radius: usize,
    pub attempts: u32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            search_radius: 6,
            attempts: 24,
        }
    }
}

/// Plain data ready to be inserted into a `WorldState`.
#[derive(Debug, Clone)]
pub struct InitialWorld {
    pub walls: Vec<WorldObject>,
    pub player: WorldObject,
    pub agents: Vec<WorldObject>,
}

impl InitialWorld {
    pub fn into_objects(self) -> Vec<WorldObject> {
        let mut objects = self.walls;
        objects.push(self.player);
        objects.extend(self.agents);
        objects
    }
}

#[derive(Debug, Clone)]
pub struct WorldFactory {
    dims: WorldDims,
    spawn: SpawnConfig,
}

impl WorldFactory {
    pub fn new(dims: WorldDims, spawn: SpawnConfig) -> Self {
        Self { dims, spawn }
    }

    pub fn dims(&self) -> WorldDims {
        self.dims
    }

    pub fn obstacle_layout(channel_id: &str) -> Vec<Mound> {
        match channel_id {
            "channel-alpha" => ALPHA_MOUNDS.to_vec(),
            "channel-beta" => BETA_MOUNDS.to_vec(),
            _ => DEFAULT_MOUNDS.to_vec(),
        }
    }

    /// Grid `(col, row)` candidates for the player spawn.
    pub fn player_spawn_candidates(channel_id: &str) -> Vec<(usize, usize)> {
        match channel_id {
            "channel-alpha" => vec![(2, 2), (60, 2), (2, 60)],
            "channel-beta" => vec![(32, 4), (32, 60)],
            _ => vec![DEFAULT_PLAYER_SPAWN],
        }
    }

    /// Preferred grid `(col, row)` for each autonomous agent.
    pub fn agent_spawn_points(channel_id: &str) -> Vec<(usize, usize)> {
        match channel_id {
            "channel-alpha" => vec![(12, 12), (32, 20)],
            "channel-beta" => vec![(31, 30), (8, 8)],
            _ => vec![(20, 20)],
        }
    }

    pub fn generate_initial_state<R: Rng>(
        &self,
        channel_id: &str,
        player_id: &str,
        rng: &mut R,
    ) -> InitialWorld {
        let walls = self.generate_walls(channel_id);
        let maze = Maze::from_obstacles(&self.dims, walls.iter().map(|w| w.position));

        let candidates = Self::player_spawn_candidates(channel_id);
        let choice = candidates[rng.gen_range(0..candidates.len())];
        let (px, py) = if self.grid_cell_walkable(&maze, choice) {
            self.dims.grid_to_world(choice.0, choice.1)
        } else {
            warn!(
                "Player spawn {:?} on {} is blocked, using default",
                choice, channel_id
            );
            self.dims
                .grid_to_world(DEFAULT_PLAYER_SPAWN.0, DEFAULT_PLAYER_SPAWN.1)
        };
        let player = WorldObject::player(player_id, px, py);

        let agents = Self::agent_spawn_points(channel_id)
            .into_iter()
            .enumerate()
            .map(|(i, preferred)| {
                let (x, y) = self.place_agent(&maze, preferred, rng);
                let params = AgentParams {
                    initial_pos: (x, y),
                    wander_radius: AGENT_WANDER_RADIUS,
                    path_cooldown: AGENT_PATH_COOLDOWN,
                    last_path_time: 0.0,
                };
                WorldObject::agent(format!("bot-quest-provider-{}", i), x, y, params)
            })
            .collect();

        debug!(
            "Generated {} with {} walls, player at ({}, {})",
            channel_id,
            walls.len(),
            px,
            py
        );

        InitialWorld {
            walls,
            player,
            agents,
        }
    }

    /// Rasterizes the channel's mounds into walls, once per world coordinate.
    pub fn generate_walls(&self, channel_id: &str) -> Vec<WorldObject> {
        let mut seen = HashSet::new();
        let mut walls = Vec::new();

        for m in Self::obstacle_layout(channel_id) {
            for gy in m.grid_y..m.grid_y + m.height {
                for gx in m.grid_x..m.grid_x + m.width {
                    if gx >= self.dims.grid_cols() || gy >= self.dims.grid_rows() {
                        continue;
                    }
                    let (x, y) = self.dims.grid_to_world(gx, gy);
                    if !seen.insert((x.to_bits(), y.to_bits())) {
                        continue;
                    }
                    walls.push(WorldObject::wall(format!("wall-{}-{}", gx, gy), x, y));
                }
            }
        }
        walls
    }

    /// Agent position near `preferred`; falls back to the clamped preferred
    /// position, which may sit on an obstacle.
    fn place_agent<R: Rng>(&self, maze: &Maze, preferred: (usize, usize), rng: &mut R) -> (f32, f32) {
        let (wx, wy) = self.dims.grid_to_world(preferred.0, preferred.1);
        let (wx, wy) = self.dims.clamp_to_world(wx, wy);

        let found = self.dims.world_to_maze(wx, wy).and_then(|cell| {
            find_valid_spawn(maze, cell, self.spawn.search_radius, self.spawn.attempts, rng)
        });

        match found {
            Some(cell) => self.dims.maze_to_world(cell),
            None => {
                warn!(
                    "No free spawn near {:?}, placing agent at ({}, {})",
                    preferred, wx, wy
                );
                (wx, wy)
            }
        }
    }

    fn grid_cell_walkable(&self, maze: &Maze, (col, row): (usize, usize)) -> bool {
        if col >= self.dims.grid_cols() || row >= self.dims.grid_rows() {
            return false;
        }
        let (x, y) = self.dims.grid_to_world(col, row);
        self.dims
            .world_to_maze(x, y)
            .map_or(false, |cell| maze.is_walkable(cell))
    }
}

/// Tries `preferred`, then up to `attempts` random cells within `radius`.
///
/// Random sampling can miss a lone free cell; callers treat `None` as "use
/// the preferred position anyway".
pub fn find_valid_spawn<R: Rng>(
    maze: &Maze,
    preferred: Cell,
    radius: usize,
    attempts: u32,
    rng: &mut R,
) -> Option<Cell> {
    if maze.is_walkable(preferred) {
        return Some(preferred);
    }
    let r = radius as i64;
    for _ in 0..attempts {
        let row = preferred.row as i64 + rng.gen_range(-r..=r);
        let col = preferred.col as i64 + rng.gen_range(-r..=r);
        if row < 0 || col < 0 {
            continue;
        }
        let cell = Cell::new(row as usize, col as usize);
        if maze.is_walkable(cell) {
            return Some(cell);
        }
    }
    None
}
