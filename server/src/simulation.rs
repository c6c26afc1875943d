//! Local stand-in for the authoritative server.
//!
//! A `Simulation` owns one private [`WorldState`] and turns client requests
//! and clock ticks into the same [`ServerMessage`]s a remote server would
//! send. It is used by the client proxy when the connection is lost and by
//! the development server for every accepted socket.

use crate::factory::{SpawnConfig, WorldFactory};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use shared::protocol::{
    ChangeChannelRequest, ChatMessage, ItemActivation, MoveRequest, ObjectRemoved, PathUpdate,
    PlayerAssigned, StateUpdate,
};
use shared::{
    cells_to_waypoints, find_path, AgentParams, ClientMessage, ServerMessage, Waypoint, WorldDims,
    WorldGuard, WorldState,
};
use std::f32::consts::TAU;
use std::time::Duration;
use uuid::Uuid;

/// Upper bound on one tick's `dt` so a stalled loop does not teleport objects.
pub const MAX_TICK_DT: f32 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationConfig {
    /// Fixed period of the offline tick, independent of any frame rate.
    pub tick_period: Duration,
    /// Random wander targets tried per agent before waiting out another cooldown.
    pub agent_target_attempts: u32,
    pub spawn: SpawnConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(50),
            agent_target_attempts: 16,
            spawn: SpawnConfig::default(),
        }
    }
}

pub struct Simulation {
    world: WorldState,
    factory: WorldFactory,
    config: SimulationConfig,
    channel_id: String,
    player_id: Option<String>,
    rng: StdRng,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Reproducible placement and wandering, for tests.
    pub fn with_seed(config: SimulationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulationConfig, rng: StdRng) -> Self {
        let dims = WorldDims::default();
        Self {
            world: WorldState::new(dims),
            factory: WorldFactory::new(dims, config.spawn),
            config,
            channel_id: shared::DEFAULT_CHANNEL.to_string(),
            player_id: None,
            rng,
        }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Generates a fresh world for `channel_id` under a fresh player id.
    ///
    /// Emits `player_assigned` followed by a persistent snapshot, the same
    /// pair a server sends to a newly connected client.
    pub fn bootstrap(&mut self, channel_id: &str) -> Vec<ServerMessage> {
        let player_id = format!("player-{}", Uuid::new_v4());
        info!(
            "Bootstrapping local world for {} as {}",
            channel_id, player_id
        );

        self.channel_id = channel_id.to_string();
        self.player_id = Some(player_id.clone());
        self.populate(&player_id);

        let world = self.world.lock();
        vec![
            ServerMessage::PlayerAssigned(PlayerAssigned { player_id }),
            snapshot(&world, &self.channel_id),
        ]
    }

    /// One fixed-period step: motion, agent re-pathing, decay, then a
    /// snapshot of the persistent objects.
    pub fn tick(&mut self, now: f64, dt: f32) -> Vec<ServerMessage> {
        let mut events = Vec::new();
        let mut world = self.world.lock();

        world.integrate(dt, now);

        let idle: Vec<(String, (f32, f32), AgentParams)> = world
            .iter()
            .filter_map(|o| {
                let params = o.agent?;
                (!o.has_active_path() && params.cooldown_elapsed(now))
                    .then(|| (o.id.clone(), o.position, params))
            })
            .collect();

        for (id, position, params) in idle {
            match plan_wander(
                &world,
                &mut self.rng,
                position,
                &params,
                self.config.agent_target_attempts,
            ) {
                Some(path) => {
                    world.modify(&id, |o| o.set_path(path.clone()));
                    events.push(ServerMessage::PlayerPathUpdate(PathUpdate {
                        player_id: id,
                        path,
                    }));
                }
                None => {
                    debug!("Agent {} found no route, retrying after cooldown", id);
                    world.modify(&id, |o| {
                        if let Some(agent) = o.agent.as_mut() {
                            agent.last_path_time = now;
                        }
                    });
                }
            }
        }

        for notice in world.cleanup_expired(now) {
            events.push(ServerMessage::ObjectRemovedFromRendering(ObjectRemoved {
                obj_id: notice.obj_id,
                object_layer_id: notice.layer_id,
            }));
        }

        events.push(snapshot(&world, &self.channel_id));
        events
    }

    /// Handles a request the way the remote server would.
    pub fn handle_client_message(&mut self, msg: &ClientMessage) -> Vec<ServerMessage> {
        let Some(player_id) = self.player_id.clone() else {
            warn!("Dropping {} before bootstrap", msg.type_name());
            return Vec::new();
        };

        match msg {
            ClientMessage::ClientMoveRequest(req) => self.move_player(&player_id, req),
            ClientMessage::ClientChatMessage(chat) => vec![echo_chat(&player_id, chat)],
            ClientMessage::ItemActivation(item) => self.activate_item(&player_id, item),
            ClientMessage::ClientChangeChannelRequest(req) => {
                self.change_channel(&player_id, req)
            }
        }
    }

    fn move_player(&mut self, player_id: &str, req: &MoveRequest) -> Vec<ServerMessage> {
        let mut world = self.world.lock();
        let dims = world.dims();

        let Some(position) = world.get(player_id).map(|p| p.position) else {
            warn!("Move request for missing player {}", player_id);
            return Vec::new();
        };
        let (tx, ty) = dims.clamp_to_world(req.target_x, req.target_y);

        let start = dims.world_to_maze(position.0, position.1);
        let goal = dims.world_to_maze(tx, ty);
        let cells = match (start, goal) {
            (Some(start), Some(goal)) => find_path(world.maze(), start, goal),
            _ => None,
        };

        let Some(cells) = cells else {
            debug!("No path for {} to ({}, {})", player_id, tx, ty);
            return Vec::new();
        };

        let path = cells_to_waypoints(&dims, &cells);
        world.modify(player_id, |p| p.set_path(path.clone()));
        vec![ServerMessage::PlayerPathUpdate(PathUpdate {
            player_id: player_id.to_string(),
            path,
        })]
    }

    fn activate_item(&mut self, player_id: &str, item: &ItemActivation) -> Vec<ServerMessage> {
        let mut world = self.world.lock();
        let changed = world.modify(player_id, |p| {
            let present = p.layer_ids.iter().any(|l| *l == item.item_id);
            match (item.active, present) {
                (true, false) => p.layer_ids.push(item.item_id.clone()),
                (false, true) => p.layer_ids.retain(|l| *l != item.item_id),
                _ => {}
            }
        });
        if changed.is_none() {
            warn!("Item activation for missing player {}", player_id);
            return Vec::new();
        }
        vec![snapshot(&world, &self.channel_id)]
    }

    fn change_channel(
        &mut self,
        player_id: &str,
        req: &ChangeChannelRequest,
    ) -> Vec<ServerMessage> {
        info!("Switching local world to {}", req.channel_id);
        self.channel_id = req.channel_id.clone();
        self.populate(player_id);

        let world = self.world.lock();
        vec![snapshot(&world, &self.channel_id)]
    }

    /// Replaces the whole world with a freshly generated one, as one batch.
    fn populate(&mut self, player_id: &str) {
        let initial =
            self.factory
                .generate_initial_state(&self.channel_id, player_id, &mut self.rng);

        let mut world = self.world.lock();
        world.retain(|_| false);
        for obj in initial.into_objects() {
            world.upsert(obj);
        }
        world.rebuild_maze();
    }
}

/// Picks a random walkable target within the agent's wander radius and
/// routes to it. A failed route is not retried with another target.
fn plan_wander(
    world: &WorldGuard<'_>,
    rng: &mut StdRng,
    position: (f32, f32),
    params: &AgentParams,
    attempts: u32,
) -> Option<Vec<Waypoint>> {
    let dims = world.dims();
    let start = dims.world_to_maze(position.0, position.1)?;

    for _ in 0..attempts {
        let angle = rng.gen::<f32>() * TAU;
        let radius = rng.gen::<f32>() * params.wander_radius;
        let (tx, ty) = dims.clamp_to_world(
            params.initial_pos.0 + radius * angle.cos(),
            params.initial_pos.1 + radius * angle.sin(),
        );
        let Some(goal) = dims.world_to_maze(tx, ty) else {
            continue;
        };
        if !world.maze().is_walkable(goal) {
            continue;
        }
        return find_path(world.maze(), start, goal).map(|cells| cells_to_waypoints(&dims, &cells));
    }
    None
}

fn snapshot(world: &WorldGuard<'_>, channel_id: &str) -> ServerMessage {
    ServerMessage::NetworkStateUpdate(StateUpdate {
        network_objects: world.persistent_dicts(),
        channel_id: Some(channel_id.to_string()),
    })
}

fn echo_chat(player_id: &str, chat: &ChatMessage) -> ServerMessage {
    ServerMessage::ServerChatMessage(json!({
        "roomId": chat.room_id,
        "playerId": player_id,
        "text": chat.text,
    }))
}
