//! Async host for [`MatchSession`] on native targets.
//!
//! One task owns the session, the socket and the timers. It multiplexes user
//! commands, inbound frames and the earliest pending timer with
//! `tokio::select!`, and executes the effects each step returns.

use std::collections::{HashMap, VecDeque};

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

use crate::board::Move;
use crate::error::SessionError;
use crate::reconcile::CellChange;
use crate::session::{Effect, MatchSession, Notice, SessionView};
use crate::timers::TimerId;
use crate::transport::{Connector, Incoming, Transport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    MakeMove(Move),
    Restart,
    RequestState,
    Reconnect,
    Leave,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DriverEvent {
    CellsChanged(Vec<CellChange>),
    Notice(Notice),
    Error(SessionError),
    /// Emitted after every step that changed something visible.
    View(SessionView),
}

pub struct MatchDriver<C> {
    session: MatchSession,
    connector: C,
    transport: Option<Box<dyn Transport>>,
    deadlines: HashMap<TimerId, Instant>,
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl<C: Connector> MatchDriver<C> {
    pub fn new(
        session: MatchSession,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let driver = Self {
            session,
            connector,
            transport: None,
            deadlines: HashMap::new(),
            events,
        };
        (driver, rx)
    }

    /// Runs until [`Command::Leave`] or until every command sender is dropped,
    /// then hands the session back.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) -> MatchSession {
        debug!("match driver started");
        match self.session.connect() {
            Ok(effects) => self.execute(effects).await,
            Err(e) => self.emit(DriverEvent::Error(e)),
        }

        loop {
            let effects = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Leave) | None => {
                        let effects = self.session.leave();
                        self.execute(effects).await;
                        break;
                    }
                    Some(cmd) => self.command(cmd),
                },
                incoming = next_frame(&mut self.transport) => match incoming {
                    Incoming::Text(text) => self.session.handle_text(&text),
                    Incoming::Closed { clean } => {
                        self.transport = None;
                        self.session.transport_closed(clean)
                    }
                },
                id = next_deadline(&self.deadlines) => {
                    self.deadlines.remove(&id);
                    self.session.timer_fired(id)
                }
            };
            self.execute(effects).await;
        }

        debug!("match driver stopped");
        self.session
    }

    fn command(&mut self, cmd: Command) -> Vec<Effect> {
        debug!(?cmd, "command");
        let result = match cmd {
            Command::MakeMove(mv) => self.session.make_move(mv),
            Command::Restart => Ok(self.session.restart()),
            Command::RequestState => Ok(self.session.request_state()),
            Command::Reconnect => self.session.reconnect(),
            Command::Leave => Ok(self.session.leave()),
        };
        result.unwrap_or_else(|e| {
            self.emit(DriverEvent::Error(e));
            Vec::new()
        })
    }

    async fn execute(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);
        let mut visible = false;
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Connect => queue.extend(self.open().await),
                Effect::Disconnect => {
                    if let Some(mut transport) = self.transport.take() {
                        if let Err(e) = transport.close().await {
                            debug!("close failed: {e}");
                        }
                    }
                }
                Effect::Send(msg) => {
                    let text = match msg.to_json() {
                        Ok(text) => text,
                        Err(e) => {
                            error!("failed to encode {}: {e}", msg.name());
                            continue;
                        }
                    };
                    let Some(transport) = self.transport.as_mut() else {
                        debug!(kind = msg.name(), "no socket, dropping message");
                        continue;
                    };
                    let sent = transport.send(text).await;
                    if let Err(e) = sent {
                        warn!(kind = msg.name(), "send failed: {e}");
                        self.transport = None;
                        queue.extend(self.session.transport_closed(false));
                    }
                }
                Effect::StartTimer { id, after, .. } => {
                    self.deadlines.insert(id, Instant::now() + after);
                }
                Effect::CancelTimer { id } => {
                    self.deadlines.remove(&id);
                }
                Effect::CellsChanged(changes) => {
                    visible = true;
                    self.emit(DriverEvent::CellsChanged(changes));
                }
                Effect::Notify(notice) => {
                    visible = true;
                    self.emit(DriverEvent::Notice(notice));
                }
            }
        }
        if visible {
            self.emit(DriverEvent::View(self.session.view()));
        }
    }

    async fn open(&mut self) -> Vec<Effect> {
        if let Some(mut old) = self.transport.take() {
            if let Err(e) = old.close().await {
                debug!("close of previous socket failed: {e}");
            }
        }
        let url = match self.session.config().endpoint_url() {
            Ok(url) => url,
            Err(e) => {
                error!("cannot build match endpoint: {e}");
                self.emit(DriverEvent::Error(e));
                return self.session.leave();
            }
        };
        match self.connector.connect(&url).await {
            Ok(transport) => {
                info!(match_id = %self.session.config().match_id, "connected");
                self.transport = Some(transport);
                self.session.transport_opened()
            }
            Err(e) => {
                warn!("connect failed: {e}");
                self.session.transport_closed(false)
            }
        }
    }

    fn emit(&self, event: DriverEvent) {
        // Nobody listening is fine; the session keeps running headless.
        let _ = self.events.send(event);
    }
}

async fn next_frame(transport: &mut Option<Box<dyn Transport>>) -> Incoming {
    match transport {
        Some(transport) => transport.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_deadline(deadlines: &HashMap<TimerId, Instant>) -> TimerId {
    let next = deadlines
        .iter()
        .min_by_key(|(id, at)| (**at, **id))
        .map(|(id, at)| (*id, *at));
    match next {
        Some((id, at)) => {
            sleep_until(at).await;
            id
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::GameKind;
    use crate::config::{SessionConfig, Timing};
    use crate::connection::{ConnectionState, ReconnectPolicy};
    use crate::error::TransportError;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use url::Url;

    struct MockTransport {
        incoming: VecDeque<Incoming>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        fail_close: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, text: String) -> Result<(), TransportError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }

        async fn recv(&mut self) -> Incoming {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::Relaxed);
            if self.fail_close {
                return Err(TransportError::Closed);
            }
            Ok(())
        }
    }

    /// Hands out one scripted transport per connect; refuses once the
    /// scripts run out.
    #[derive(Default)]
    struct MockConnector {
        scripts: VecDeque<Vec<Incoming>>,
        sent: Arc<Mutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        attempts: Arc<AtomicU32>,
        urls: Arc<Mutex<Vec<String>>>,
        fail_close: bool,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&mut self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(url.to_string());
            let script = self
                .scripts
                .pop_front()
                .ok_or_else(|| TransportError::Refused("scripted refusal".into()))?;
            Ok(Box::new(MockTransport {
                incoming: script.into(),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
                fail_close: self.fail_close,
            }))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig::new(GameKind::ConnectFour, "m1", "me")
            .with_token("h.p.s")
            .with_base_url("ws://games.test")
            .with_reconnect(ReconnectPolicy {
                max_attempts: 2,
                delay_ms: 1_000,
            })
    }

    fn text(value: Value) -> Incoming {
        Incoming::Text(value.to_string())
    }

    fn sent_types(sent: &Mutex<Vec<String>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|s| serde_json::from_str::<Value>(s).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    async fn wait_for(
        events: &mut mpsc::UnboundedReceiver<DriverEvent>,
        pred: impl Fn(&DriverEvent) -> bool,
    ) -> DriverEvent {
        loop {
            let event = events.recv().await.expect("driver stopped early");
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn joins_plays_and_leaves() {
        let connector = MockConnector {
            scripts: VecDeque::from([vec![text(json!({
                "type": "game_state",
                "current_player": "R",
                "players": {"me": "R", "them": "Y"}
            }))]]),
            ..MockConnector::default()
        };
        let sent = Arc::clone(&connector.sent);
        let closed = Arc::clone(&connector.closed);
        let urls = Arc::clone(&connector.urls);
        let (driver, mut events) = MatchDriver::new(MatchSession::new(config()), connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        wait_for(&mut events, |e| {
            matches!(e, DriverEvent::Notice(Notice::TurnChanged { is_my_turn: true, .. }))
        })
        .await;
        commands.send(Command::MakeMove(Move::Drop { column: 3 })).unwrap();
        commands.send(Command::Leave).unwrap();
        let session = task.await.unwrap();

        assert_eq!(sent_types(&sent), vec!["join_game", "make_move"]);
        let last: Value = serde_json::from_str(sent.lock().unwrap().last().unwrap()).unwrap();
        assert_eq!(last["move"], json!({"column": 3}));
        assert_eq!(urls.lock().unwrap()[0], "ws://games.test/ws/games/connect4/m1?token=h.p.s");
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(session.connection_state(), ConnectionState::ClosedClean);
        assert_eq!(session.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_close_still_leaves_cleanly() {
        let connector = MockConnector {
            scripts: VecDeque::from([vec![text(json!({"type": "game_state", "current_player": "Y"}))]]),
            fail_close: true,
            ..MockConnector::default()
        };
        let closed = Arc::clone(&connector.closed);
        let (driver, mut events) = MatchDriver::new(MatchSession::new(config()), connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        wait_for(&mut events, |e| matches!(e, DriverEvent::Notice(Notice::Connected))).await;
        commands.send(Command::Leave).unwrap();
        let session = task.await.unwrap();

        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(session.connection_state(), ConnectionState::ClosedClean);
        assert_eq!(session.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connections_stop_at_the_ceiling() {
        let connector = MockConnector::default();
        let attempts = Arc::clone(&connector.attempts);
        let (driver, mut events) = MatchDriver::new(MatchSession::new(config()), connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        let started = Instant::now();
        let event = wait_for(&mut events, |e| {
            matches!(e, DriverEvent::Notice(Notice::ConnectionExhausted { .. }))
        })
        .await;
        assert_eq!(
            event,
            DriverEvent::Notice(Notice::ConnectionExhausted { attempts: 2 })
        );
        // First try plus two delayed retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= std::time::Duration::from_millis(2_000));

        drop(commands);
        let session = task.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(session.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_socket_reconnects_and_rejoins() {
        let connector = MockConnector {
            scripts: VecDeque::from([
                vec![Incoming::Closed { clean: false }],
                vec![text(json!({"type": "game_state", "current_player": "Y"}))],
            ]),
            ..MockConnector::default()
        };
        let sent = Arc::clone(&connector.sent);
        let attempts = Arc::clone(&connector.attempts);
        let (driver, mut events) = MatchDriver::new(MatchSession::new(config()), connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        wait_for(&mut events, |e| {
            matches!(e, DriverEvent::Notice(Notice::ConnectionLost { attempt: 1, .. }))
        })
        .await;
        wait_for(&mut events, |e| matches!(e, DriverEvent::Notice(Notice::TurnChanged { .. }))).await;
        commands.send(Command::Leave).unwrap();
        task.await.unwrap();

        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(sent_types(&sent), vec!["join_game", "join_game"]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_exhausts_state_requests() {
        let connector = MockConnector {
            scripts: VecDeque::from([Vec::new()]),
            ..MockConnector::default()
        };
        let sent = Arc::clone(&connector.sent);
        let closed = Arc::clone(&connector.closed);
        let cfg = config().with_timing(Timing {
            max_state_requests: 3,
            ..Timing::default()
        });
        let (driver, mut events) = MatchDriver::new(MatchSession::new(cfg), connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        wait_for(&mut events, |e| {
            matches!(e, DriverEvent::Notice(Notice::ConnectionExhausted { attempts: 3 }))
        })
        .await;
        assert!(closed.load(Ordering::Relaxed));
        assert_eq!(
            sent_types(&sent),
            vec!["join_game", "get_game_state", "get_game_state", "get_game_state"]
        );

        drop(commands);
        let session = task.await.unwrap();
        assert_eq!(session.connection_state(), ConnectionState::GaveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_token_reports_error_and_stays_offline() {
        let connector = MockConnector::default();
        let attempts = Arc::clone(&connector.attempts);
        let session = MatchSession::new(SessionConfig::new(GameKind::TicTacToe, "m1", "me"));
        let (driver, mut events) = MatchDriver::new(session, connector);
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(driver.run(rx));

        let event = wait_for(&mut events, |e| matches!(e, DriverEvent::Error(_))).await;
        assert_eq!(event, DriverEvent::Error(SessionError::AuthenticationMissing));
        drop(commands);
        task.await.unwrap();
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
