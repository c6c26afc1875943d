//! JSON wire protocol.
//!
//! Every frame is an envelope `{"type": <string>, "data" | "payload": <object>}`.
//! Client requests are encoded with `payload`, server messages with `data`;
//! decoding accepts either key for both directions.

use crate::object::Waypoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid json frame: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("unknown message type {0:?}")]
    UnknownType(String),
    #[error("malformed {kind} payload: {source}")]
    MalformedPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Wire form of a world object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDict {
    pub obj_id: String,
    pub x: f32,
    pub y: f32,
    #[serde(default = "opaque")]
    pub color_r: u8,
    #[serde(default = "opaque")]
    pub color_g: u8,
    #[serde(default = "opaque")]
    pub color_b: u8,
    #[serde(default = "opaque")]
    pub color_a: u8,
    #[serde(default)]
    pub is_obstacle: bool,
    #[serde(default)]
    pub speed: f32,
    pub network_object_type: String,
    #[serde(default)]
    pub object_layer_ids: Vec<String>,
    #[serde(default)]
    pub path: Vec<Waypoint>,
    #[serde(default)]
    pub path_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_time: Option<f64>,
    pub is_persistent: bool,
}

fn opaque() -> u8 {
    255
}

impl ObjectDict {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub target_x: f32,
    pub target_y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub room_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemActivation {
    pub item_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeChannelRequest {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    ClientMoveRequest(MoveRequest),
    ClientChatMessage(ChatMessage),
    ItemActivation(ItemActivation),
    ClientChangeChannelRequest(ChangeChannelRequest),
}

impl ClientMessage {
    pub const TYPES: [&'static str; 4] = [
        "client_move_request",
        "client_chat_message",
        "item_activation",
        "client_change_channel_request",
    ];

    pub fn move_to(target_x: f32, target_y: f32) -> Self {
        ClientMessage::ClientMoveRequest(MoveRequest { target_x, target_y })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ClientMessage::ClientMoveRequest(_) => Self::TYPES[0],
            ClientMessage::ClientChatMessage(_) => Self::TYPES[1],
            ClientMessage::ItemActivation(_) => Self::TYPES[2],
            ClientMessage::ClientChangeChannelRequest(_) => Self::TYPES[3],
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode(text, &Self::TYPES, "payload")
    }
}

/// Body of `network_state_update`. Objects stay raw so each one is
/// deserialized, and possibly rejected, on its own.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub network_objects: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAssigned {
    pub player_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathUpdate {
    #[serde(alias = "entityId")]
    pub player_id: String,
    pub path: Vec<Waypoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRemoved {
    pub obj_id: String,
    pub object_layer_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    NetworkStateUpdate(StateUpdate),
    PlayerAssigned(PlayerAssigned),
    PlayerPathUpdate(PathUpdate),
    Message(Value),
    ServerChatMessage(Value),
    ObjectRemovedFromRendering(ObjectRemoved),
}

impl ServerMessage {
    pub const TYPES: [&'static str; 6] = [
        "network_state_update",
        "player_assigned",
        "player_path_update",
        "message",
        "server_chat_message",
        "object_removed_from_rendering",
    ];

    pub fn type_name(&self) -> &'static str {
        match self {
            ServerMessage::NetworkStateUpdate(_) => Self::TYPES[0],
            ServerMessage::PlayerAssigned(_) => Self::TYPES[1],
            ServerMessage::PlayerPathUpdate(_) => Self::TYPES[2],
            ServerMessage::Message(_) => Self::TYPES[3],
            ServerMessage::ServerChatMessage(_) => Self::TYPES[4],
            ServerMessage::ObjectRemovedFromRendering(_) => Self::TYPES[5],
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        decode(text, &Self::TYPES, "data")
    }
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "data", alias = "payload", default)]
    body: Value,
}

fn decode<T: DeserializeOwned>(
    text: &str,
    known: &[&str],
    content_key: &str,
) -> Result<T, ProtocolError> {
    let raw: RawEnvelope = serde_json::from_str(text).map_err(ProtocolError::InvalidJson)?;
    if !known.contains(&raw.kind.as_str()) {
        return Err(ProtocolError::UnknownType(raw.kind));
    }

    let mut envelope = Map::new();
    envelope.insert("type".to_string(), Value::String(raw.kind.clone()));
    envelope.insert(content_key.to_string(), raw.body);

    serde_json::from_value(Value::Object(envelope)).map_err(|source| {
        ProtocolError::MalformedPayload {
            kind: raw.kind,
            source,
        }
    })
}
