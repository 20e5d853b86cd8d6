use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY_MS: u64 = 3_000;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    ClosedClean,
    ClosedError,
    /// Retry ceiling reached; only a manual reconnect leaves this state.
    GaveUp,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RECONNECT_ATTEMPTS,
            delay_ms: RECONNECT_DELAY_MS,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// What the owner should do after the socket closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseAction {
    Nothing,
    Retry { attempt: u32, after: Duration },
    GiveUp { attempts: u32 },
}

#[derive(Clone, Debug)]
pub struct Connection {
    state: ConnectionState,
    attempts: u32,
    policy: ReconnectPolicy,
}

impl Connection {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            attempts: 0,
            policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Returns false when a connection is already open or in flight.
    pub fn begin_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => false,
            _ => {
                debug!(from = ?self.state, "connecting");
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    pub fn opened(&mut self) {
        if self.attempts > 0 {
            info!(attempts = self.attempts, "connection restored");
        }
        self.state = ConnectionState::Open;
        self.attempts = 0;
    }

    pub fn closed(&mut self, clean: bool) -> CloseAction {
        match self.state {
            // Already torn down, or a retry is already pending.
            ConnectionState::ClosedClean
            | ConnectionState::ClosedError
            | ConnectionState::GaveUp
            | ConnectionState::Idle => {
                return CloseAction::Nothing;
            }
            _ => {}
        }
        if clean {
            debug!("connection closed cleanly");
            self.state = ConnectionState::ClosedClean;
            return CloseAction::Nothing;
        }
        if self.attempts < self.policy.max_attempts {
            self.attempts += 1;
            self.state = ConnectionState::ClosedError;
            warn!(
                attempt = self.attempts,
                max = self.policy.max_attempts,
                "connection lost, scheduling reconnect"
            );
            CloseAction::Retry {
                attempt: self.attempts,
                after: self.policy.delay(),
            }
        } else {
            warn!(attempts = self.attempts, "reconnect attempts exhausted");
            self.state = ConnectionState::GaveUp;
            CloseAction::GiveUp {
                attempts: self.attempts,
            }
        }
    }

    /// Local teardown (leave, auto-disconnect). Late close events are ignored.
    pub fn shut_down(&mut self) {
        self.state = ConnectionState::ClosedClean;
    }

    pub fn give_up(&mut self) {
        self.state = ConnectionState::GaveUp;
    }

    /// Manual reconnect after giving up starts a fresh retry budget.
    pub fn reset_attempts(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: max,
            delay_ms: 100,
        }
    }

    #[test]
    fn open_resets_attempts() {
        let mut c = Connection::new(policy(3));
        assert!(c.begin_connect());
        assert!(!c.begin_connect());
        c.opened();
        assert_eq!(c.closed(false), CloseAction::Retry { attempt: 1, after: Duration::from_millis(100) });
        assert!(c.begin_connect());
        c.opened();
        assert_eq!(c.attempts(), 0);
        assert_eq!(c.state(), ConnectionState::Open);
    }

    #[test]
    fn stops_after_exactly_max_attempts() {
        let mut c = Connection::new(policy(3));
        c.begin_connect();
        let mut retries = 0;
        loop {
            match c.closed(false) {
                CloseAction::Retry { .. } => {
                    retries += 1;
                    assert!(c.begin_connect());
                }
                CloseAction::GiveUp { attempts } => {
                    assert_eq!(attempts, 3);
                    break;
                }
                CloseAction::Nothing => panic!("unclean close must act"),
            }
        }
        assert_eq!(retries, 3);
        assert_eq!(c.state(), ConnectionState::GaveUp);
        assert_eq!(c.closed(false), CloseAction::Nothing);
    }

    #[test]
    fn clean_close_does_not_retry() {
        let mut c = Connection::new(policy(3));
        c.begin_connect();
        c.opened();
        assert_eq!(c.closed(true), CloseAction::Nothing);
        assert_eq!(c.state(), ConnectionState::ClosedClean);
    }

    #[test]
    fn close_after_local_shutdown_is_ignored() {
        let mut c = Connection::new(policy(3));
        c.begin_connect();
        c.opened();
        c.shut_down();
        assert_eq!(c.closed(false), CloseAction::Nothing);
        assert_eq!(c.state(), ConnectionState::ClosedClean);
    }
}
