//! Named response timers for the conversation.
//!
//! Every outstanding request owns exactly one named timer. The table only
//! stores deadlines; the driver sleeps until the earliest one and asks the
//! conversation to fire whatever is due. Clearing is synchronous, which is
//! what lets the conversation guarantee that no timer survives a teardown.

use feedlink_core::feed::FeedSerial;
use std::collections::HashMap;
use tokio::time::Instant;

/// Identity of a conversation timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// The transport-connect timer.
    Connect,
    /// The handshake-response timer.
    Handshake,
    /// A per-action response timer, keyed by callback id.
    Action(String),
    /// A per-feed open/close response timer.
    Feed(FeedSerial),
}

/// Deadline table; at most one armed timer per key.
#[derive(Debug, Default)]
pub(crate) struct TimerTable {
    deadlines: HashMap<TimerKey, Instant>,
}

impl TimerTable {
    /// Arms `key` to fire at `deadline`, replacing any previous arming.
    pub(crate) fn arm(&mut self, key: TimerKey, deadline: Instant) {
        self.deadlines.insert(key, deadline);
    }

    /// Clears `key` if armed.
    pub(crate) fn clear(&mut self, key: &TimerKey) {
        self.deadlines.remove(key);
    }

    /// Clears every timer.
    pub(crate) fn clear_all(&mut self) {
        self.deadlines.clear();
    }

    /// Returns the earliest armed deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the earliest timer that is due at `now`.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerKey> {
        let key = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .min_by_key(|(_, deadline)| **deadline)
            .map(|(key, _)| key.clone())?;
        self.deadlines.remove(&key);
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_arm_and_pop_due() {
        let mut timers = TimerTable::default();
        let now = Instant::now();
        timers.arm(TimerKey::Connect, now + Duration::from_secs(2));
        timers.arm(TimerKey::Handshake, now + Duration::from_secs(1));

        assert_eq!(timers.next_deadline(), Some(now + Duration::from_secs(1)));
        assert!(timers.pop_due(now).is_none());

        // The earliest due timer pops first.
        let later = now + Duration::from_secs(3);
        assert_eq!(timers.pop_due(later), Some(TimerKey::Handshake));
        assert_eq!(timers.pop_due(later), Some(TimerKey::Connect));
        assert!(timers.pop_due(later).is_none());
        assert!(timers.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear() {
        let mut timers = TimerTable::default();
        let now = Instant::now();
        timers.arm(TimerKey::Action("1".to_string()), now);
        timers.arm(TimerKey::Action("2".to_string()), now);

        timers.clear(&TimerKey::Action("1".to_string()));
        assert_eq!(timers.pop_due(now), Some(TimerKey::Action("2".to_string())));
        assert!(timers.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_all() {
        let mut timers = TimerTable::default();
        let now = Instant::now();
        timers.arm(TimerKey::Connect, now);
        timers.arm(TimerKey::Handshake, now);
        timers.clear_all();
        assert!(timers.next_deadline().is_none());
        assert!(timers.pop_due(now).is_none());
    }
}
