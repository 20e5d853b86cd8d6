//! Online match state machine.
//!
//! [`MatchSession`] never touches a socket or a clock. Every operation returns
//! the [`Effect`]s its host must carry out: open or close the socket, send a
//! message, start or cancel a timer, redraw cells, show a notice. The browser
//! bindings and the native driver are two such hosts; tests are a third.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::board::{Board, Cell, Move, Outcome, Player, Position};
use crate::config::SessionConfig;
use crate::connection::{CloseAction, Connection, ConnectionState};
use crate::error::{MoveError, SessionError};
use crate::protocol::{
    ClientMessage, GameFinished, GameRestarted, MoveMade, PlayerJoined, ServerMessage,
    StateSnapshot, message_type,
};
use crate::reconcile::{CellChange, Reconciler};
use crate::timers::{TimerId, TimerKind, Timers, as_millis};

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "effect", content = "data", rename_all = "snake_case")]
pub enum Effect {
    /// Open a fresh socket to the match endpoint, replacing any previous one.
    Connect,
    /// Close the socket. The session has already left the open state.
    Disconnect,
    Send(ClientMessage),
    StartTimer {
        id: TimerId,
        kind: TimerKind,
        #[serde(rename = "after_ms", serialize_with = "as_millis")]
        after: Duration,
    },
    CancelTimer {
        id: TimerId,
    },
    CellsChanged(Vec<CellChange>),
    Notify(Notice),
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    NotConnected,
    NotYourTurn,
    AwaitingConfirmation,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum Notice {
    Connected,
    ConnectionLost { attempt: u32, max_attempts: u32 },
    ConnectionExhausted { attempts: u32 },
    PlayersConnected { count: u8 },
    TurnChanged {
        is_my_turn: bool,
        active_symbol: Option<String>,
    },
    MoveIgnored { reason: IgnoreReason },
    MoveRejected { reason: String },
    ServerError { message: String },
    GameRestarted,
    GameOver(TerminalState),
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    Win,
    Loss,
    Tie,
}

#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct TerminalState {
    pub result: MatchResult,
    pub winner: Option<Player>,
    pub winner_symbol: Option<String>,
    /// Cells to highlight, when the board shows a completed line.
    pub winning_line: Option<Vec<Position>>,
    pub reason: Option<String>,
}

/// Everything a view needs to draw the match, in display symbols.
#[derive(Clone, Serialize, Debug, PartialEq, Eq)]
pub struct SessionView {
    pub board: Vec<Vec<Option<String>>>,
    pub connection: ConnectionState,
    pub is_my_turn: bool,
    pub can_move: bool,
    pub my_symbol: Option<String>,
    pub active_symbol: Option<String>,
    pub players_connected: u8,
    pub terminal: Option<TerminalState>,
    pub last_error: Option<String>,
}

pub struct MatchSession {
    config: SessionConfig,
    board: Board,
    reconciler: Reconciler,
    connection: Connection,
    timers: Timers,
    me: Option<Player>,
    current: Option<Player>,
    is_my_turn: bool,
    awaiting_confirmation: bool,
    players_connected: u8,
    players: HashMap<String, String>,
    terminal: Option<TerminalState>,
    state_requests: u32,
    pending_restart: bool,
    last_error: Option<String>,
}

impl MatchSession {
    pub fn new(config: SessionConfig) -> Self {
        let reconciler = Reconciler::new(config.symbol_mapping());
        Self {
            board: Board::new(config.game),
            connection: Connection::new(config.reconnect),
            reconciler,
            config,
            timers: Timers::default(),
            me: None,
            current: None,
            is_my_turn: false,
            awaiting_confirmation: false,
            players_connected: 0,
            players: HashMap::new(),
            terminal: None,
            state_requests: 0,
            pending_restart: false,
            last_error: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_my_turn(&self) -> bool {
        self.is_my_turn
    }

    pub fn can_move(&self) -> bool {
        self.connection.state().is_open()
            && self.is_my_turn
            && !self.awaiting_confirmation
            && self.terminal.is_none()
    }

    pub fn my_player(&self) -> Option<Player> {
        self.me
    }

    pub fn my_symbol(&self) -> Option<&str> {
        self.me.map(|p| self.reconciler.display_symbol(p))
    }

    pub fn active_symbol(&self) -> Option<&str> {
        self.current.map(|p| self.reconciler.display_symbol(p))
    }

    pub fn players_connected(&self) -> u8 {
        self.players_connected
    }

    pub fn terminal(&self) -> Option<&TerminalState> {
        self.terminal.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    pub fn view(&self) -> SessionView {
        let board = self
            .board
            .rows_iter()
            .map(|row| {
                row.iter()
                    .map(|c| c.owner().map(|p| self.reconciler.display_symbol(p).to_string()))
                    .collect()
            })
            .collect();
        SessionView {
            board,
            connection: self.connection.state(),
            is_my_turn: self.is_my_turn,
            can_move: self.can_move(),
            my_symbol: self.my_symbol().map(String::from),
            active_symbol: self.active_symbol().map(String::from),
            players_connected: self.players_connected,
            terminal: self.terminal.clone(),
            last_error: self.last_error.clone(),
        }
    }

    // --- connection lifecycle ---

    pub fn connect(&mut self) -> Result<Vec<Effect>, SessionError> {
        if !self.config.has_identity() {
            warn!(match_id = %self.config.match_id, "no player identity, staying offline");
            self.last_error = Some(SessionError::AuthenticationMissing.to_string());
            return Err(SessionError::AuthenticationMissing);
        }
        if !self.connection.begin_connect() {
            return Ok(Vec::new());
        }
        info!(
            match_id = %self.config.match_id,
            game = self.config.game.slug(),
            "connecting to match"
        );
        Ok(vec![Effect::Connect])
    }

    /// Manual reconnect; starts a fresh retry budget.
    pub fn reconnect(&mut self) -> Result<Vec<Effect>, SessionError> {
        let mut effects = Vec::new();
        self.cancel(TimerKind::Reconnect, &mut effects);
        self.connection.reset_attempts();
        self.last_error = None;
        effects.extend(self.connect()?);
        Ok(effects)
    }

    pub fn transport_opened(&mut self) -> Vec<Effect> {
        self.connection.opened();
        self.last_error = None;
        self.state_requests = 0;
        let mut effects = vec![Effect::Notify(Notice::Connected), Effect::Send(self.join_message())];
        if std::mem::take(&mut self.pending_restart) {
            effects.push(Effect::Send(self.restart_message()));
        }
        // The server does not always push state after a join.
        self.arm(TimerKind::StateRequest, self.config.timing.join_state_timeout(), &mut effects);
        effects
    }

    pub fn transport_closed(&mut self, clean: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel(TimerKind::StateRequest, &mut effects);
        self.cancel(TimerKind::StateTimeout, &mut effects);
        self.awaiting_confirmation = false;
        self.is_my_turn = false;
        match self.connection.closed(clean) {
            CloseAction::Nothing => {}
            CloseAction::Retry { attempt, after } => {
                let max_attempts = self.connection.policy().max_attempts;
                self.last_error = Some(
                    SessionError::ConnectionLost {
                        attempt,
                        max_attempts,
                    }
                    .to_string(),
                );
                self.arm(TimerKind::Reconnect, after, &mut effects);
                effects.push(Effect::Notify(Notice::ConnectionLost {
                    attempt,
                    max_attempts,
                }));
            }
            CloseAction::GiveUp { attempts } => {
                self.last_error = Some(SessionError::ConnectionExhausted { attempts }.to_string());
                effects.push(Effect::Notify(Notice::ConnectionExhausted { attempts }));
            }
        }
        effects
    }

    /// User navigated away: every timer goes, the socket closes cleanly.
    pub fn leave(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_all();
        match self.connection.state() {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.connection.shut_down();
                effects.push(Effect::Disconnect);
            }
            // A retry was pending; its timer is gone now.
            ConnectionState::ClosedError => self.connection.shut_down(),
            _ => {}
        }
        self.is_my_turn = false;
        self.awaiting_confirmation = false;
        info!(match_id = %self.config.match_id, "left match");
        effects
    }

    pub fn timer_fired(&mut self, id: TimerId) -> Vec<Effect> {
        let Some(kind) = self.timers.fire(id) else {
            debug!(?id, "ignoring stale timer");
            return Vec::new();
        };
        debug!(?kind, "timer fired");
        match kind {
            TimerKind::Reconnect => {
                if self.connection.begin_connect() {
                    vec![Effect::Connect]
                } else {
                    Vec::new()
                }
            }
            TimerKind::StateRequest => self.send_state_request(),
            TimerKind::StateTimeout => {
                if self.state_requests < self.config.timing.max_state_requests {
                    warn!(sent = self.state_requests, "game state not received, asking again");
                    self.send_state_request()
                } else {
                    self.state_exhausted()
                }
            }
            TimerKind::AutoDisconnect => {
                let mut effects = self.cancel_all();
                if matches!(
                    self.connection.state(),
                    ConnectionState::Open | ConnectionState::Connecting
                ) {
                    info!("match finished, releasing connection");
                    self.connection.shut_down();
                    effects.push(Effect::Disconnect);
                }
                effects
            }
        }
    }

    // --- user actions ---

    pub fn make_move(&mut self, mv: Move) -> Result<Vec<Effect>, SessionError> {
        if self.terminal.is_some() {
            return Err(MoveError::GameOver.into());
        }
        let ignored = if !self.connection.state().is_open() {
            Some(IgnoreReason::NotConnected)
        } else if self.awaiting_confirmation {
            Some(IgnoreReason::AwaitingConfirmation)
        } else if !self.is_my_turn {
            Some(IgnoreReason::NotYourTurn)
        } else {
            None
        };
        if let Some(reason) = ignored {
            debug!(?reason, ?mv, "move ignored");
            if reason == IgnoreReason::NotYourTurn {
                self.last_error = Some(SessionError::NotMyTurn.to_string());
            }
            return Ok(vec![Effect::Notify(Notice::MoveIgnored { reason })]);
        }
        let target = self.board.target(mv)?;
        debug!(row = target.row, column = target.column, "sending move");
        // Input stays frozen until the server reports whose turn it is.
        self.awaiting_confirmation = true;
        Ok(vec![Effect::Send(ClientMessage::MakeMove {
            match_id: self.config.match_id.clone(),
            player_id: self.config.player_id.clone(),
            mv: mv.into(),
        })])
    }

    /// New game. Online the server confirms with `game_restarted`; when the
    /// socket is gone the board resets here and the restart is sent after
    /// reconnecting.
    pub fn restart(&mut self) -> Vec<Effect> {
        let mut effects = self.cancel_all();
        if self.connection.state().is_open() {
            info!("requesting restart");
            effects.push(Effect::Send(self.restart_message()));
            return effects;
        }
        effects.extend(self.reset_local());
        self.pending_restart = true;
        self.connection.reset_attempts();
        match self.connect() {
            Ok(more) => effects.extend(more),
            Err(e) => warn!("restart stays offline: {e}"),
        }
        effects
    }

    pub fn request_state(&mut self) -> Vec<Effect> {
        self.send_state_request()
    }

    // --- inbound ---

    pub fn handle_text(&mut self, text: &str) -> Vec<Effect> {
        match ServerMessage::parse(text) {
            Ok(ServerMessage::Unknown) => {
                warn!(kind = ?message_type(text), "ignoring unrecognized message");
                Vec::new()
            }
            Ok(msg) => self.handle_message(msg),
            Err(e) => {
                warn!(kind = ?message_type(text), "dropping undecodable message: {e}");
                Vec::new()
            }
        }
    }

    pub fn handle_message(&mut self, msg: ServerMessage) -> Vec<Effect> {
        match msg {
            ServerMessage::GameState(snapshot) => self.apply_snapshot(&snapshot),
            ServerMessage::PlayerJoined(joined) => self.on_player_joined(&joined),
            ServerMessage::MoveMade(made) => self.on_move_made(&made),
            ServerMessage::GameRestarted(restarted) => self.on_restarted(&restarted),
            ServerMessage::GameFinishedAutomatically(finished) => self.on_finished(&finished),
            ServerMessage::Error(e) => {
                warn!(message = %e.message, "server error");
                self.last_error = Some(e.message.clone());
                let mut effects = vec![Effect::Notify(Notice::ServerError { message: e.message })];
                if self.awaiting_confirmation {
                    // The error may answer our move; resync rather than guess.
                    self.arm(
                        TimerKind::StateRequest,
                        self.config.timing.state_refresh_delay(),
                        &mut effects,
                    );
                }
                effects
            }
            ServerMessage::Unknown => {
                warn!("ignoring unrecognized message");
                Vec::new()
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: &StateSnapshot) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.learn_players(&snapshot.players);
        let rec = self.reconciler.reconcile(&mut self.board, snapshot, self.me);
        if !rec.changes.is_empty() {
            effects.push(Effect::CellsChanged(rec.changes));
        }
        self.state_requests = 0;
        self.cancel(TimerKind::StateRequest, &mut effects);
        self.cancel(TimerKind::StateTimeout, &mut effects);
        self.awaiting_confirmation = false;

        let turn_changed = rec.current_player != self.current || rec.is_my_turn != self.is_my_turn;
        self.current = rec.current_player;
        self.is_my_turn = rec.is_my_turn;

        match rec.terminal {
            Some(terminal) => effects.extend(self.enter_terminal(terminal.winner, None)),
            None => {
                if self.terminal.take().is_some() {
                    debug!("server state is live again, leaving terminal state");
                    self.cancel(TimerKind::AutoDisconnect, &mut effects);
                }
                if turn_changed {
                    effects.push(Effect::Notify(Notice::TurnChanged {
                        is_my_turn: self.is_my_turn,
                        active_symbol: self.active_symbol().map(String::from),
                    }));
                }
            }
        }
        effects
    }

    fn on_player_joined(&mut self, joined: &PlayerJoined) -> Vec<Effect> {
        let count = joined
            .count()
            .unwrap_or_else(|| self.players_connected.saturating_add(1));
        self.players_connected = count;
        info!(count, player = ?joined.player_id, "player joined");
        let mut effects = vec![Effect::Notify(Notice::PlayersConnected { count })];
        if count >= 2 {
            effects.extend(self.send_state_request());
        }
        effects
    }

    fn on_move_made(&mut self, made: &MoveMade) -> Vec<Effect> {
        let mine = made
            .player_id
            .as_deref()
            .map_or(self.awaiting_confirmation, |id| id == self.config.player_id);
        if !made.result.valid {
            let reason = made
                .result
                .reason
                .clone()
                .unwrap_or_else(|| "move rejected".to_string());
            warn!(%reason, mine, "server rejected move");
            if mine {
                self.awaiting_confirmation = false;
                self.last_error = Some(SessionError::ServerRejectedMove(reason.clone()).to_string());
            }
            return vec![Effect::Notify(Notice::MoveRejected { reason })];
        }

        let mut effects = Vec::new();
        if let Some(change) = self.apply_delta(made, mine) {
            effects.push(Effect::CellsChanged(vec![change]));
        }
        match &made.state {
            Some(state) => effects.extend(self.apply_snapshot(state)),
            None => {
                // No turn info: ask instead of assuming the turn flipped.
                self.arm(
                    TimerKind::StateRequest,
                    self.config.timing.state_refresh_delay(),
                    &mut effects,
                );
            }
        }
        effects
    }

    fn apply_delta(&mut self, made: &MoveMade, mine: bool) -> Option<CellChange> {
        let column = made.result.column.or(made.mv.map(|m| m.column))?;
        let player = self
            .reconciler
            .player_for_symbol(made.symbol.as_deref())
            .or_else(|| {
                made.player_id
                    .as_deref()
                    .and_then(|id| self.reconciler.player_for_id(&self.players, id))
            })
            .or_else(|| {
                if mine {
                    self.me
                } else {
                    self.me.map(Player::other).or(self.current)
                }
            })?;
        // A drop without a row could land on a stale column; the state
        // refresh places it instead.
        let Some(row) = made.result.row.or(made.mv.and_then(|m| m.row)) else {
            debug!(column, "move confirmed without a row, waiting for state");
            return None;
        };
        let cell = player.cell();
        if self.board.set(row, column, cell) {
            Some(self.reconciler.change_for(row, column, cell))
        } else {
            None
        }
    }

    fn on_restarted(&mut self, restarted: &GameRestarted) -> Vec<Effect> {
        info!("game restarted");
        let mut effects = self.cancel_all();
        effects.extend(self.reset_local());
        effects.push(Effect::Notify(Notice::GameRestarted));
        match &restarted.state {
            Some(state) => effects.extend(self.apply_snapshot(state)),
            None => effects.extend(self.send_state_request()),
        }
        effects
    }

    fn on_finished(&mut self, finished: &GameFinished) -> Vec<Effect> {
        let mut effects = Vec::new();
        let mut winner = finished.winner.clone();
        if let Some(state) = &finished.state {
            self.learn_players(&state.players);
            let changes = self.reconciler.apply_board(&mut self.board, &state.board);
            if !changes.is_empty() {
                effects.push(Effect::CellsChanged(changes));
            }
            winner = winner.or_else(|| state.winner.clone());
        }
        let winner = self.reconciler.resolve_winner(winner.as_deref(), &self.players);
        effects.extend(self.enter_terminal(winner, finished.reason.clone()));
        effects
    }

    fn enter_terminal(&mut self, winner: Option<Player>, reason: Option<String>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.is_my_turn = false;
        self.awaiting_confirmation = false;
        self.cancel(TimerKind::StateRequest, &mut effects);
        self.cancel(TimerKind::StateTimeout, &mut effects);

        if let Some(existing) = &self.terminal {
            if existing.winner == winner {
                return effects;
            }
        }
        let result = match (winner, self.me) {
            (None, _) => MatchResult::Tie,
            (Some(w), Some(me)) if w == me => MatchResult::Win,
            (Some(_), _) => MatchResult::Loss,
        };
        let winning_line = match self.board.check_winner() {
            Some(Outcome::Win(line)) if Some(line.player) == winner => Some(line.cells),
            _ => None,
        };
        let terminal = TerminalState {
            result,
            winner,
            winner_symbol: winner.map(|p| self.reconciler.display_symbol(p).to_string()),
            winning_line,
            reason,
        };
        info!(?result, winner = ?terminal.winner_symbol, "match over");
        self.terminal = Some(terminal.clone());
        if self.connection.state().is_open() {
            self.arm(
                TimerKind::AutoDisconnect,
                self.config.timing.auto_disconnect_delay(),
                &mut effects,
            );
        }
        effects.push(Effect::Notify(Notice::GameOver(terminal)));
        effects
    }

    // --- helpers ---

    fn learn_players(&mut self, players: &HashMap<String, String>) {
        if players.is_empty() {
            return;
        }
        self.players
            .extend(players.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Some(me) = self.reconciler.player_for_id(&self.players, &self.config.player_id) {
            if self.me != Some(me) {
                info!(symbol = self.reconciler.display_symbol(me), "assigned symbol");
            }
            self.me = Some(me);
        }
    }

    fn reset_local(&mut self) -> Vec<Effect> {
        let cleared: Vec<CellChange> = self
            .board
            .rows_iter()
            .enumerate()
            .flat_map(|(row, cells)| {
                cells
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.is_empty())
                    .map(move |(column, _)| (row, column))
            })
            .map(|(row, column)| self.reconciler.change_for(row, column, Cell::Empty))
            .collect();
        self.board.clear();
        self.terminal = None;
        self.current = None;
        self.is_my_turn = false;
        self.awaiting_confirmation = false;
        self.state_requests = 0;
        if cleared.is_empty() {
            Vec::new()
        } else {
            vec![Effect::CellsChanged(cleared)]
        }
    }

    fn send_state_request(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel(TimerKind::StateRequest, &mut effects);
        if !self.connection.state().is_open() {
            return effects;
        }
        self.state_requests += 1;
        effects.push(Effect::Send(ClientMessage::GetGameState {
            match_id: self.config.match_id.clone(),
            player_id: self.config.player_id.clone(),
        }));
        self.arm(
            TimerKind::StateTimeout,
            self.config.timing.state_response_timeout(),
            &mut effects,
        );
        effects
    }

    fn state_exhausted(&mut self) -> Vec<Effect> {
        let attempts = self.state_requests;
        warn!(attempts, "game state never arrived, giving up on this connection");
        let mut effects = self.cancel_all();
        self.connection.give_up();
        self.is_my_turn = false;
        self.awaiting_confirmation = false;
        self.last_error = Some(SessionError::ConnectionExhausted { attempts }.to_string());
        effects.push(Effect::Disconnect);
        effects.push(Effect::Notify(Notice::ConnectionExhausted { attempts }));
        effects
    }

    fn join_message(&self) -> ClientMessage {
        ClientMessage::JoinGame {
            match_id: self.config.match_id.clone(),
            player_id: self.config.player_id.clone(),
        }
    }

    fn restart_message(&self) -> ClientMessage {
        ClientMessage::RestartGame {
            match_id: self.config.match_id.clone(),
            player_id: self.config.player_id.clone(),
        }
    }

    fn arm(&mut self, kind: TimerKind, after: Duration, effects: &mut Vec<Effect>) {
        let (id, replaced) = self.timers.arm(kind);
        if let Some(old) = replaced {
            effects.push(Effect::CancelTimer { id: old });
        }
        effects.push(Effect::StartTimer { id, kind, after });
    }

    fn cancel(&mut self, kind: TimerKind, effects: &mut Vec<Effect>) {
        if let Some(id) = self.timers.cancel(kind) {
            effects.push(Effect::CancelTimer { id });
        }
    }

    fn cancel_all(&mut self) -> Vec<Effect> {
        self.timers
            .cancel_all()
            .into_iter()
            .map(|id| Effect::CancelTimer { id })
            .collect()
    }
}
