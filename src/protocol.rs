//! JSON messages exchanged with the match backend over the websocket.
//!
//! Outbound messages share one envelope: `type`, `match_id`, `player_id` and
//! per-operation fields. Inbound messages are dispatched on `type`; unknown
//! fields are ignored and unknown types decode to [`ServerMessage::Unknown`].

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::board::Move;
use crate::error::SessionError;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct MovePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    pub column: usize,
}

impl From<Move> for MovePayload {
    fn from(mv: Move) -> Self {
        Self {
            row: mv.row(),
            column: mv.column(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinGame {
        match_id: String,
        player_id: String,
    },
    MakeMove {
        match_id: String,
        player_id: String,
        #[serde(rename = "move")]
        mv: MovePayload,
    },
    RestartGame {
        match_id: String,
        player_id: String,
    },
    GetGameState {
        match_id: String,
        player_id: String,
    },
}

impl ClientMessage {
    pub fn name(&self) -> &'static str {
        match self {
            ClientMessage::JoinGame { .. } => "join_game",
            ClientMessage::MakeMove { .. } => "make_move",
            ClientMessage::RestartGame { .. } => "restart_game",
            ClientMessage::GetGameState { .. } => "get_game_state",
        }
    }

    pub fn to_json(&self) -> Result<String, SessionError> {
        serde_json::to_string(self).map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

/// Board/turn state as pushed by the backend, still in backend symbols.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct StateSnapshot {
    #[serde(default, deserialize_with = "null_as_default")]
    pub board: Vec<Vec<Option<String>>>,
    #[serde(default)]
    pub current_player: Option<String>,
    #[serde(default, alias = "is_game_over", deserialize_with = "null_as_default")]
    pub game_over: bool,
    #[serde(default)]
    pub winner: Option<String>,
    /// Player id to backend symbol.
    #[serde(default, deserialize_with = "null_as_default")]
    pub players: HashMap<String, String>,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct PlayerJoined {
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default, alias = "connected_players", alias = "player_count")]
    pub players_connected: Option<u8>,
    #[serde(default)]
    pub players: Option<Vec<String>>,
}

impl PlayerJoined {
    pub fn count(&self) -> Option<u8> {
        self.players_connected.or_else(|| {
            self.players
                .as_ref()
                .map(|p| u8::try_from(p.len()).unwrap_or(u8::MAX))
        })
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct MoveResult {
    #[serde(default)]
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub row: Option<usize>,
    #[serde(default)]
    pub column: Option<usize>,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct MoveMade {
    #[serde(default)]
    pub player_id: Option<String>,
    #[serde(default, rename = "move")]
    pub mv: Option<MovePayload>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub result: MoveResult,
    #[serde(default, alias = "game_state")]
    pub state: Option<StateSnapshot>,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct GameRestarted {
    #[serde(default, alias = "game_state")]
    pub state: Option<StateSnapshot>,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct GameFinished {
    #[serde(default)]
    pub winner: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default, alias = "game_state")]
    pub state: Option<StateSnapshot>,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct ErrorPayload {
    #[serde(default, alias = "error")]
    pub message: String,
}

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    GameState(StateSnapshot),
    PlayerJoined(PlayerJoined),
    MoveMade(MoveMade),
    GameRestarted(GameRestarted),
    GameFinishedAutomatically(GameFinished),
    Error(ErrorPayload),
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct TypeOnly {
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl ServerMessage {
    pub fn parse(text: &str) -> Result<ServerMessage, SessionError> {
        serde_json::from_str(text).map_err(|e| SessionError::Protocol(e.to_string()))
    }
}

/// Best-effort extraction of the `type` field, for logging.
pub fn message_type(text: &str) -> Option<String> {
    serde_json::from_str::<TypeOnly>(text).ok().and_then(|t| t.kind)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
