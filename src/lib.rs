pub mod auth;
pub mod board;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod reconcile;
pub mod session;
pub mod symbols;
pub mod timers;

#[cfg(not(target_arch = "wasm32"))]
pub mod driver;
#[cfg(not(target_arch = "wasm32"))]
pub mod transport;

use serde::Serialize;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;
use web_sys::console;

use crate::board::{GameKind, Move, Outcome, Position};
use crate::config::SessionConfig;
use crate::engine::{AUTO_RESET_DELAY, LocalGame};
use crate::error::SessionError;
use crate::session::{Effect, MatchSession};
use crate::symbols::SymbolMapping;
use crate::timers::TimerId;

#[wasm_bindgen(start)]
pub fn bootstrap() {
    console_error_panic_hook::set_once();
}

fn log(msg: &str) {
    console::log_1(&JsValue::from_str(msg));
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    js_sys::Error::new(&e.to_string()).into()
}

fn move_for(kind: GameKind, row: Option<usize>, column: usize) -> Result<Move, SessionError> {
    if kind.gravity() {
        return Ok(Move::Drop { column });
    }
    let row = row.ok_or_else(|| SessionError::Protocol("tic-tac-toe moves need a row".into()))?;
    Ok(Move::Place { row, column })
}

#[derive(Serialize)]
struct LocalSnapshot<'a> {
    board: Vec<Vec<Option<&'a str>>>,
    current_symbol: &'a str,
    game_over: bool,
    tie: bool,
    winner_symbol: Option<&'a str>,
    winning_line: Option<&'a [Position]>,
    move_count: u32,
}

/// Hot-seat game for two players at one screen.
#[wasm_bindgen]
pub struct LocalGameClient {
    game: LocalGame,
    symbols: SymbolMapping,
}

impl LocalGameClient {
    fn snapshot_value(&self) -> Result<JsValue, JsValue> {
        let symbol = |cell: &board::Cell| cell.owner().map(|p| self.symbols.frontend_symbol(p));
        let outcome = self.game.outcome();
        let line = match outcome {
            Some(Outcome::Win(line)) => Some(line),
            _ => None,
        };
        let snapshot = LocalSnapshot {
            board: self
                .game
                .board()
                .rows_iter()
                .map(|row| row.iter().map(symbol).collect())
                .collect(),
            current_symbol: self.symbols.frontend_symbol(self.game.current_player()),
            game_over: outcome.is_some(),
            tie: matches!(outcome, Some(Outcome::Tie)),
            winner_symbol: line.map(|l| self.symbols.frontend_symbol(l.player)),
            winning_line: line.map(|l| l.cells.as_slice()),
            move_count: self.game.move_count(),
        };
        to_value(&snapshot).map_err(|e| e.into())
    }
}

#[wasm_bindgen]
impl LocalGameClient {
    #[wasm_bindgen(constructor)]
    pub fn new(kind: JsValue) -> Result<LocalGameClient, JsValue> {
        let kind: GameKind = from_value(kind)?;
        Ok(Self {
            game: LocalGame::new(kind),
            symbols: SymbolMapping::for_game(kind),
        })
    }

    /// Plays for whoever is on turn and returns the new snapshot.
    #[wasm_bindgen(js_name = play)]
    pub fn play(&mut self, column: usize, row: Option<usize>) -> Result<JsValue, JsValue> {
        let mv = move_for(self.game.board().kind(), row, column).map_err(js_error)?;
        self.game.play(mv).map_err(js_error)?;
        self.snapshot_value()
    }

    #[wasm_bindgen(js_name = reset)]
    pub fn reset(&mut self) -> Result<JsValue, JsValue> {
        self.game.reset();
        self.snapshot_value()
    }

    #[wasm_bindgen(js_name = snapshot)]
    pub fn snapshot(&self) -> Result<JsValue, JsValue> {
        self.snapshot_value()
    }

    #[wasm_bindgen(js_name = autoResetDelayMs)]
    pub fn auto_reset_delay_ms(&self) -> u32 {
        AUTO_RESET_DELAY.as_millis() as u32
    }
}

/// Online match bound to a page-owned WebSocket and `setTimeout`.
///
/// Every method returns the effects the page must carry out, as an array of
/// `{effect, data}` objects.
#[wasm_bindgen]
pub struct MatchClient {
    session: MatchSession,
}

fn effects_value(effects: &[Effect]) -> Result<JsValue, JsValue> {
    to_value(effects).map_err(|e| e.into())
}

#[wasm_bindgen]
impl MatchClient {
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue) -> Result<MatchClient, JsValue> {
        let config: SessionConfig = from_value(config)?;
        Ok(Self {
            session: MatchSession::new(config),
        })
    }

    #[wasm_bindgen(js_name = endpointUrl)]
    pub fn endpoint_url(&self) -> Result<String, JsValue> {
        self.session
            .config()
            .endpoint_url()
            .map(String::from)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = connect)]
    pub fn connect(&mut self) -> Result<JsValue, JsValue> {
        let effects = self.session.connect().map_err(|e| {
            log(&format!("[match] {e}"));
            js_error(e)
        })?;
        effects_value(&effects)
    }

    #[wasm_bindgen(js_name = opened)]
    pub fn opened(&mut self) -> Result<JsValue, JsValue> {
        log(&format!("[match] connected to {}", self.session.config().match_id));
        effects_value(&self.session.transport_opened())
    }

    #[wasm_bindgen(js_name = closed)]
    pub fn closed(&mut self, clean: bool) -> Result<JsValue, JsValue> {
        if !clean {
            log("[match] connection dropped");
        }
        effects_value(&self.session.transport_closed(clean))
    }

    #[wasm_bindgen(js_name = receive)]
    pub fn receive(&mut self, text: &str) -> Result<JsValue, JsValue> {
        effects_value(&self.session.handle_text(text))
    }

    #[wasm_bindgen(js_name = makeMove)]
    pub fn make_move(&mut self, column: usize, row: Option<usize>) -> Result<JsValue, JsValue> {
        let mv = move_for(self.session.config().game, row, column).map_err(js_error)?;
        let effects = self.session.make_move(mv).map_err(js_error)?;
        effects_value(&effects)
    }

    #[wasm_bindgen(js_name = restart)]
    pub fn restart(&mut self) -> Result<JsValue, JsValue> {
        effects_value(&self.session.restart())
    }

    #[wasm_bindgen(js_name = requestState)]
    pub fn request_state(&mut self) -> Result<JsValue, JsValue> {
        effects_value(&self.session.request_state())
    }

    #[wasm_bindgen(js_name = reconnect)]
    pub fn reconnect(&mut self) -> Result<JsValue, JsValue> {
        log("[match] manual reconnect");
        let effects = self.session.reconnect().map_err(js_error)?;
        effects_value(&effects)
    }

    #[wasm_bindgen(js_name = leave)]
    pub fn leave(&mut self) -> Result<JsValue, JsValue> {
        effects_value(&self.session.leave())
    }

    #[wasm_bindgen(js_name = timerFired)]
    pub fn timer_fired(&mut self, id: u32) -> Result<JsValue, JsValue> {
        effects_value(&self.session.timer_fired(TimerId(id)))
    }

    /// Outbound messages as JSON text, ready for `WebSocket.send`.
    #[wasm_bindgen(js_name = encode)]
    pub fn encode(&self, message: JsValue) -> Result<String, JsValue> {
        let message: protocol::ClientMessage = from_value(message)?;
        message.to_json().map_err(js_error)
    }

    #[wasm_bindgen(js_name = view)]
    pub fn view(&self) -> Result<JsValue, JsValue> {
        to_value(&self.session.view()).map_err(|e| e.into())
    }
}

/// Player id from the token's subject, falling back to the cached id.
#[wasm_bindgen(js_name = resolvePlayerId)]
pub fn resolve_player_id(token: Option<String>, cached: Option<String>) -> Option<String> {
    auth::resolve_player_id(token.as_deref(), cached.as_deref())
}

const TOKEN_KEY: &str = "token";
const PLAYER_ID_KEY: &str = "player_id";

#[derive(Serialize)]
struct StoredIdentity {
    token: Option<String>,
    player_id: Option<String>,
}

fn local_storage() -> Option<web_sys::Storage> {
    web_sys::window()?.local_storage().ok().flatten()
}

/// Token and player id from `localStorage`. A player id read from the token
/// is written back so later visits survive an unreadable token.
#[wasm_bindgen(js_name = storedIdentity)]
pub fn stored_identity() -> Result<JsValue, JsValue> {
    let storage = local_storage();
    let get = |key: &str| storage.as_ref().and_then(|s| s.get_item(key).ok().flatten());
    let token = get(TOKEN_KEY);
    let player_id = auth::resolve_player_id(token.as_deref(), get(PLAYER_ID_KEY).as_deref());
    if let (Some(storage), Some(id)) = (&storage, &player_id) {
        if storage.set_item(PLAYER_ID_KEY, id).is_err() {
            log("[match] could not cache player id");
        }
    }
    to_value(&StoredIdentity { token, player_id }).map_err(|e| e.into())
}
