use serde::{Deserialize, Serialize};

pub const MOVE_MESSAGE_TYPE: &str = "move";
pub const GAME_PATH: &str = "/game";
pub const STATUS_PATH: &str = "/status";
pub const DEFAULT_PORT: u16 = 8080;

/// First message a client receives: the identity and position the server
/// assigned to it.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerState {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
        }
    }
}

/// A position update travelling in either direction.
///
/// Every field is optional on the wire; a missing field decodes to its
/// empty value so partially-filled messages are still accepted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MoveMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "playerId", default)]
    pub player_id: String,
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
}

impl MoveMessage {
    pub fn new(player_id: impl Into<String>, x: f64, y: f64) -> Self {
        Self {
            kind: MOVE_MESSAGE_TYPE.to_string(),
            player_id: player_id.into(),
            x,
            y,
        }
    }

    pub fn is_move(&self) -> bool {
        self.kind == MOVE_MESSAGE_TYPE
    }

    /// Replaces whatever identity the sender claimed with `player_id`.
    pub fn with_player_id(mut self, player_id: impl Into<String>) -> Self {
        self.player_id = player_id.into();
        self
    }
}

pub fn decode_message(payload: &[u8]) -> Result<MoveMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

pub fn encode_message<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(message)
}
