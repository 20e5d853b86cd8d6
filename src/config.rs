use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::board::GameKind;
use crate::connection::ReconnectPolicy;
use crate::error::SessionError;
use crate::symbols::SymbolMapping;

/// Delays used by the session, in milliseconds.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Timing {
    /// Ask for the state if none was pushed this long after `join_game`.
    pub join_state_timeout_ms: u64,
    /// Delay before fetching state after a `move_made` that carried none.
    pub state_refresh_delay_ms: u64,
    pub state_response_timeout_ms: u64,
    /// Total `get_game_state` sends before the match counts as unreachable.
    pub max_state_requests: u32,
    pub auto_disconnect_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            join_state_timeout_ms: 2_000,
            state_refresh_delay_ms: 500,
            state_response_timeout_ms: 3_000,
            max_state_requests: 3,
            auto_disconnect_delay_ms: 3_000,
        }
    }
}

impl Timing {
    pub fn join_state_timeout(&self) -> Duration {
        Duration::from_millis(self.join_state_timeout_ms)
    }

    pub fn state_refresh_delay(&self) -> Duration {
        Duration::from_millis(self.state_refresh_delay_ms)
    }

    pub fn state_response_timeout(&self) -> Duration {
        Duration::from_millis(self.state_response_timeout_ms)
    }

    pub fn auto_disconnect_delay(&self) -> Duration {
        Duration::from_millis(self.auto_disconnect_delay_ms)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SessionConfig {
    pub game: GameKind,
    pub match_id: String,
    pub player_id: String,
    #[serde(default)]
    pub token: Option<String>,
    /// Websocket origin, e.g. `wss://games.example.com`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Defaults to the preset for `game` when absent.
    #[serde(default)]
    pub symbols: Option<SymbolMapping>,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub timing: Timing,
}

fn default_base_url() -> String {
    "ws://127.0.0.1:8000".to_string()
}

impl SessionConfig {
    pub fn new(game: GameKind, match_id: impl Into<String>, player_id: impl Into<String>) -> Self {
        Self {
            game,
            match_id: match_id.into(),
            player_id: player_id.into(),
            token: None,
            base_url: default_base_url(),
            symbols: None,
            reconnect: ReconnectPolicy::default(),
            timing: Timing::default(),
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_symbols(mut self, symbols: SymbolMapping) -> Self {
        self.symbols = Some(symbols);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn symbol_mapping(&self) -> SymbolMapping {
        self.symbols
            .clone()
            .unwrap_or_else(|| SymbolMapping::for_game(self.game))
    }

    pub fn has_identity(&self) -> bool {
        !self.player_id.trim().is_empty()
            && self.token.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// `<base>/ws/games/<game>/<match_id>?token=<jwt>`
    pub fn endpoint_url(&self) -> Result<Url, SessionError> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or(SessionError::AuthenticationMissing)?;
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SessionError::InvalidConfig(format!("base url {:?}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| SessionError::InvalidConfig(format!("base url {:?} cannot have a path", self.base_url)))?
            .pop_if_empty()
            .extend(["ws", "games", self.game.slug(), self.match_id.as_str()]);
        url.query_pairs_mut().clear().append_pair("token", token);
        Ok(url)
    }
}
