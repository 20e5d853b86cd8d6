use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimerKind {
    Reconnect,
    /// Send `get_game_state` when it fires.
    StateRequest,
    /// A requested state never arrived.
    StateTimeout,
    AutoDisconnect,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TimerId(pub u32);

/// Handles for the delayed actions a session has asked its host to schedule.
///
/// At most one timer per kind is armed. Ids are never reused, so a timer the
/// host failed to cancel is recognized as stale when it fires.
#[derive(Debug, Default)]
pub struct Timers {
    next: u32,
    armed: HashMap<TimerKind, TimerId>,
}

impl Timers {
    /// Arms `kind`, returning the new id and the id it replaced, if any.
    pub fn arm(&mut self, kind: TimerKind) -> (TimerId, Option<TimerId>) {
        self.next = self.next.wrapping_add(1);
        let id = TimerId(self.next);
        let replaced = self.armed.insert(kind, id);
        (id, replaced)
    }

    pub fn cancel(&mut self, kind: TimerKind) -> Option<TimerId> {
        self.armed.remove(&kind)
    }

    pub fn cancel_all(&mut self) -> Vec<TimerId> {
        let mut ids: Vec<TimerId> = self.armed.drain().map(|(_, id)| id).collect();
        ids.sort();
        ids
    }

    /// Consumes a fired timer. Stale or unknown ids yield `None`.
    pub fn fire(&mut self, id: TimerId) -> Option<TimerKind> {
        let kind = self
            .armed
            .iter()
            .find_map(|(kind, armed)| (*armed == id).then_some(*kind))?;
        self.armed.remove(&kind);
        Some(kind)
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.armed.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

pub(crate) fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rearming_replaces_previous_handle() {
        let mut t = Timers::default();
        let (first, replaced) = t.arm(TimerKind::StateRequest);
        assert_eq!(replaced, None);
        let (second, replaced) = t.arm(TimerKind::StateRequest);
        assert_eq!(replaced, Some(first));
        assert_eq!(t.fire(first), None);
        assert_eq!(t.fire(second), Some(TimerKind::StateRequest));
        assert!(t.is_empty());
    }

    #[test]
    fn cancelled_timers_are_stale() {
        let mut t = Timers::default();
        let (a, _) = t.arm(TimerKind::Reconnect);
        let (b, _) = t.arm(TimerKind::AutoDisconnect);
        assert_eq!(t.cancel_all(), vec![a, b]);
        assert_eq!(t.fire(a), None);
        assert_eq!(t.fire(b), None);
    }
}
