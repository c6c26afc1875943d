use log::{debug, info};
use shared::{
    ClientMessage, Motion, ObjectType, ServerMessage, Waypoint, WorldObject, WorldState,
    CLICK_POINTER_DECAY, PATH_POINT_DECAY,
};

/// The one callback the world makes into the render layer.
pub trait RenderSink {
    fn remove_object_layer_animation(&mut self, obj_id: &str, layer_id: &str);
}

/// Consumer-side copy of the world, fed by proxy events in arrival order.
///
/// Besides mirroring authoritative state it predicts purely visual ephemera:
/// a click marker when the local player asks to move and path markers when
/// the local player's route arrives. Their ids start with `gfx-` so they can
/// never shadow an authoritative object.
pub struct ClientGameState {
    world: WorldState,
    player_id: Option<String>,
    channel_id: Option<String>,
    next_gfx_id: u64,
}

impl Default for ClientGameState {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientGameState {
    pub fn new() -> Self {
        Self {
            world: WorldState::default(),
            player_id: None,
            channel_id: None,
            next_gfx_id: 0,
        }
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player_id.as_deref()
    }

    pub fn channel_id(&self) -> Option<&str> {
        self.channel_id.as_deref()
    }

    pub fn local_player(&self) -> Option<WorldObject> {
        self.player_id.as_deref().and_then(|id| self.world.get(id))
    }

    pub fn apply_server_message(
        &mut self,
        msg: ServerMessage,
        now: f64,
        sink: &mut dyn RenderSink,
    ) {
        match msg {
            ServerMessage::NetworkStateUpdate(update) => {
                if let Some(channel) = update.channel_id {
                    if self.channel_id.as_deref() != Some(channel.as_str()) {
                        info!("Now in channel {}", channel);
                    }
                    self.channel_id = Some(channel);
                }
                for notice in self.world.apply_snapshot(&update.network_objects) {
                    sink.remove_object_layer_animation(&notice.obj_id, &notice.layer_id);
                }
            }
            ServerMessage::PlayerAssigned(assigned) => {
                info!("Assigned player {}", assigned.player_id);
                self.player_id = Some(assigned.player_id);
            }
            ServerMessage::PlayerPathUpdate(update) => {
                let applied = self
                    .world
                    .lock()
                    .modify(&update.player_id, |o| o.set_path(update.path.clone()));
                if applied.is_none() {
                    debug!("Path for unknown object {}", update.player_id);
                    return;
                }
                if self.player_id.as_deref() == Some(update.player_id.as_str()) {
                    self.spawn_path_markers(&update.path, now);
                }
            }
            ServerMessage::ObjectRemovedFromRendering(removed) => {
                sink.remove_object_layer_animation(&removed.obj_id, &removed.object_layer_id);
            }
            ServerMessage::Message(body) => info!("Server: {}", body),
            ServerMessage::ServerChatMessage(body) => info!("Chat: {}", body),
        }
    }

    /// Drops a click marker at the target and returns the request to send.
    pub fn request_move(&mut self, target_x: f32, target_y: f32, now: f64) -> ClientMessage {
        let (x, y) = self.world.dims().clamp_to_world(target_x, target_y);
        let id = self.gfx_id("click");
        if let Ok(marker) = WorldObject::ephemeral(
            id,
            ObjectType::ClickPointer,
            x,
            y,
            now + CLICK_POINTER_DECAY,
        ) {
            self.world.upsert(marker);
        }
        ClientMessage::move_to(target_x, target_y)
    }

    /// Advances every moving object and retires decayed ephemera.
    pub fn update(&mut self, dt: f32, now: f64, sink: &mut dyn RenderSink) -> Vec<Motion> {
        let mut world = self.world.lock();
        let motions = world.integrate(dt, now);
        for notice in world.cleanup_expired(now) {
            sink.remove_object_layer_animation(&notice.obj_id, &notice.layer_id);
        }
        motions
    }

    fn spawn_path_markers(&mut self, path: &[Waypoint], now: f64) {
        let markers: Vec<WorldObject> = path
            .iter()
            .filter_map(|wp| {
                let id = self.gfx_id("path");
                WorldObject::ephemeral(
                    id,
                    ObjectType::PointPath,
                    wp.x,
                    wp.y,
                    now + PATH_POINT_DECAY,
                )
                .ok()
            })
            .collect();

        let mut world = self.world.lock();
        for marker in markers {
            world.upsert(marker);
        }
    }

    fn gfx_id(&mut self, kind: &str) -> String {
        self.next_gfx_id += 1;
        format!("gfx-{}-{}", kind, self.next_gfx_id)
    }
}
