//! The world entity record and its path integration.

use crate::protocol::ObjectDict;
use crate::{AGENT_SPEED, PLAYER_SPEED};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Snap tolerance when a waypoint is exactly one step away, absorbs float error.
const SNAP_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ObjectError {
    #[error("obstacle {0} must be persistent")]
    NonPersistentObstacle(String),
    #[error("unknown object type {0:?}")]
    UnknownType(String),
    #[error("path index {index} out of range for path of length {len}")]
    PathIndexOutOfRange { index: usize, len: usize },
    #[error("malformed object: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Player,
    Wall,
    BotQuestProvider,
    PointPath,
    ClickPointer,
}

impl ObjectType {
    pub const ALL: [ObjectType; 5] = [
        ObjectType::Player,
        ObjectType::Wall,
        ObjectType::BotQuestProvider,
        ObjectType::PointPath,
        ObjectType::ClickPointer,
    ];

    pub fn wire_name(&self) -> &'static str {
        match self {
            ObjectType::Player => "PLAYER",
            ObjectType::Wall => "WALL",
            ObjectType::BotQuestProvider => "BOT-QUEST-PROVIDER",
            ObjectType::PointPath => "POINT_PATH",
            ObjectType::ClickPointer => "CLICK_POINTER",
        }
    }

    /// Layer ids an object of this type gets when none are supplied.
    pub fn default_layer_ids(&self) -> &'static [&'static str] {
        match self {
            ObjectType::Player => &["anon", "tunic-basic"],
            ObjectType::Wall => &["wall-stone"],
            ObjectType::BotQuestProvider => &["quest-giver", "lantern"],
            ObjectType::PointPath => &["path-point"],
            ObjectType::ClickPointer => &["click-pointer"],
        }
    }

    pub fn default_speed(&self) -> f32 {
        match self {
            ObjectType::Player => PLAYER_SPEED,
            ObjectType::BotQuestProvider => AGENT_SPEED,
            _ => 0.0,
        }
    }

    pub fn default_color(&self) -> Rgba {
        match self {
            ObjectType::Player => Rgba::new(70, 200, 90, 255),
            ObjectType::Wall => Rgba::new(110, 110, 120, 255),
            ObjectType::BotQuestProvider => Rgba::new(230, 180, 40, 255),
            ObjectType::PointPath => Rgba::new(255, 255, 255, 160),
            ObjectType::ClickPointer => Rgba::new(255, 80, 80, 200),
        }
    }

    /// Visual effects that live only until their decay time.
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, ObjectType::PointPath | ObjectType::ClickPointer)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl FromStr for ObjectType {
    type Err = ObjectError;

    /// Case-insensitive; `-` and `_` are interchangeable.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ObjectType::ALL
            .into_iter()
            .find(|t| t.wire_name().replace('-', "_") == normalized)
            .ok_or_else(|| ObjectError::UnknownType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    #[serde(rename = "X")]
    pub x: f32,
    #[serde(rename = "Y")]
    pub y: f32,
}

impl Waypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Wandering parameters carried only by autonomous agents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentParams {
    pub initial_pos: (f32, f32),
    pub wander_radius: f32,
    /// Seconds an agent idles between paths.
    pub path_cooldown: f64,
    pub last_path_time: f64,
}

impl AgentParams {
    pub fn cooldown_elapsed(&self, now: f64) -> bool {
        now - self.last_path_time >= self.path_cooldown
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorldObject {
    pub id: String,
    pub position: (f32, f32),
    pub color: Rgba,
    pub object_type: ObjectType,
    pub speed: f32,
    pub layer_ids: Vec<String>,
    pub decay_time: Option<f64>,
    pub agent: Option<AgentParams>,
    path: Vec<Waypoint>,
    path_index: usize,
    is_obstacle: bool,
    is_persistent: bool,
}

impl WorldObject {
    /// Builds an object with every default taken from its type.
    ///
    /// Walls become persistent obstacles and ephemeral types become
    /// non-persistent; everything else is persistent and walkable.
    pub fn new(id: impl Into<String>, object_type: ObjectType, x: f32, y: f32) -> Self {
        Self {
            id: id.into(),
            position: (x, y),
            color: object_type.default_color(),
            object_type,
            speed: object_type.default_speed(),
            layer_ids: default_layers(object_type),
            decay_time: None,
            agent: None,
            path: Vec::new(),
            path_index: 0,
            is_obstacle: object_type == ObjectType::Wall,
            is_persistent: !object_type.is_ephemeral(),
        }
    }

    pub fn wall(id: impl Into<String>, x: f32, y: f32) -> Self {
        Self::new(id, ObjectType::Wall, x, y)
    }

    pub fn player(id: impl Into<String>, x: f32, y: f32) -> Self {
        Self::new(id, ObjectType::Player, x, y)
    }

    pub fn agent(id: impl Into<String>, x: f32, y: f32, params: AgentParams) -> Self {
        let mut obj = Self::new(id, ObjectType::BotQuestProvider, x, y);
        obj.agent = Some(params);
        obj
    }

    /// A non-persistent object removed by the decay sweep once `decay_time` passes.
    pub fn ephemeral(
        id: impl Into<String>,
        object_type: ObjectType,
        x: f32,
        y: f32,
        decay_time: f64,
    ) -> Result<Self, ObjectError> {
        let mut obj = Self::new(id, object_type, x, y);
        if obj.is_obstacle {
            return Err(ObjectError::NonPersistentObstacle(obj.id));
        }
        obj.is_persistent = false;
        obj.decay_time = Some(decay_time);
        Ok(obj)
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn is_obstacle(&self) -> bool {
        self.is_obstacle
    }

    pub fn is_persistent(&self) -> bool {
        self.is_persistent
    }

    pub fn path(&self) -> &[Waypoint] {
        &self.path
    }

    pub fn path_index(&self) -> usize {
        self.path_index
    }

    pub fn has_active_path(&self) -> bool {
        self.path_index < self.path.len()
    }

    /// True once every waypoint has been reached but the path is not yet cleared.
    pub fn is_path_complete(&self) -> bool {
        !self.path.is_empty() && self.path_index == self.path.len()
    }

    /// Replaces the route. Walkability of the waypoints is the caller's concern.
    pub fn set_path(&mut self, waypoints: Vec<Waypoint>) {
        self.path = waypoints;
        self.path_index = 0;
    }

    pub fn clear_path(&mut self) {
        self.path.clear();
        self.path_index = 0;
    }

    pub fn is_expired(&self, now: f64) -> bool {
        !self.is_persistent && self.decay_time.map_or(false, |t| now >= t)
    }

    /// Advances along the path by `speed * dt` and returns the displacement.
    ///
    /// A waypoint within one step is snapped to and the cursor advances; the
    /// leftover distance is not carried into the next segment.
    pub fn update_position(&mut self, dt: f32) -> (f32, f32) {
        let Some(target) = self.path.get(self.path_index).copied() else {
            return (0.0, 0.0);
        };

        let dx = target.x - self.position.0;
        let dy = target.y - self.position.1;
        let distance = (dx * dx + dy * dy).sqrt();
        let step = self.speed * dt;

        if distance <= step + SNAP_EPSILON {
            self.position = (target.x, target.y);
            self.path_index += 1;
            return (dx, dy);
        }

        let mx = dx / distance * step;
        let my = dy / distance * step;
        self.position.0 += mx;
        self.position.1 += my;
        (mx, my)
    }

    pub fn from_dict(dict: ObjectDict) -> Result<Self, ObjectError> {
        let object_type: ObjectType = dict.network_object_type.parse()?;

        if dict.is_obstacle && !dict.is_persistent {
            return Err(ObjectError::NonPersistentObstacle(dict.obj_id));
        }
        if dict.path_index > dict.path.len() {
            return Err(ObjectError::PathIndexOutOfRange {
                index: dict.path_index,
                len: dict.path.len(),
            });
        }
        if !dict.x.is_finite() || !dict.y.is_finite() {
            return Err(ObjectError::Malformed(format!(
                "{} has a non-finite position",
                dict.obj_id
            )));
        }

        let layer_ids = if dict.object_layer_ids.is_empty() {
            default_layers(object_type)
        } else {
            dict.object_layer_ids
        };

        let mut obj = Self {
            id: dict.obj_id,
            position: (dict.x, dict.y),
            color: Rgba::new(dict.color_r, dict.color_g, dict.color_b, dict.color_a),
            object_type,
            speed: dict.speed,
            layer_ids,
            decay_time: dict.decay_time,
            agent: None,
            path: dict.path,
            path_index: dict.path_index,
            is_obstacle: dict.is_obstacle,
            is_persistent: dict.is_persistent,
        };
        if obj.is_path_complete() {
            obj.clear_path();
        }
        Ok(obj)
    }

    pub fn to_dict(&self) -> ObjectDict {
        ObjectDict {
            obj_id: self.id.clone(),
            x: self.position.0,
            y: self.position.1,
            color_r: self.color.r,
            color_g: self.color.g,
            color_b: self.color.b,
            color_a: self.color.a,
            is_obstacle: self.is_obstacle,
            speed: self.speed,
            network_object_type: self.object_type.wire_name().to_string(),
            object_layer_ids: self.layer_ids.clone(),
            path: self.path.clone(),
            path_index: self.path_index,
            decay_time: self.decay_time,
            is_persistent: self.is_persistent,
        }
    }
}

fn default_layers(object_type: ObjectType) -> Vec<String> {
    object_type
        .default_layer_ids()
        .iter()
        .map(|s| s.to_string())
        .collect()
}
