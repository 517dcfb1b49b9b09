//! Channel-subscription registry: the bidirectional connection ↔ channel
//! relation.
//!
//! Both directions of the relation live behind a single mutex so they can
//! only ever be mutated together, and so every channel's empty/non-empty
//! transitions are observed in one total order. The boolean transition
//! signals returned by [`ChannelRegistry::subscribe`] and
//! [`ChannelRegistry::unsubscribe`] are the only input the subscription
//! coordinator uses to drive the external bus — the registry itself never
//! talks to the bus, which keeps it testable in isolation.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

#[derive(Default)]
struct RegistryInner {
    /// channel → connections subscribed to it.
    by_channel: HashMap<String, HashSet<String>>,
    /// connection → channels it is subscribed to.
    by_connection: HashMap<String, HashSet<String>>,
}

/// Tracks which local connections are subscribed to which channels.
///
/// Channels exist implicitly: an entry appears when the first connection
/// subscribes and disappears when the last one leaves.
pub struct ChannelRegistry {
    inner: Mutex<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    /// Adds `conn_id` to `channel`. Returns true iff this made the channel
    /// non-empty, i.e. the process now needs a bus subscription for it.
    ///
    /// Subscribing an already-subscribed connection is a no-op returning
    /// false.
    pub fn subscribe(&self, conn_id: &str, channel: &str) -> bool {
        let mut inner = self.inner.lock();

        let members = inner.by_channel.entry(channel.to_string()).or_default();
        let first = members.is_empty();
        if !members.insert(conn_id.to_string()) {
            return false;
        }

        inner
            .by_connection
            .entry(conn_id.to_string())
            .or_default()
            .insert(channel.to_string());

        first
    }

    /// Removes `conn_id` from `channel`. Returns true iff this emptied the
    /// channel, i.e. the process no longer needs a bus subscription for it.
    ///
    /// Unsubscribing a non-member is a no-op returning false.
    pub fn unsubscribe(&self, conn_id: &str, channel: &str) -> bool {
        let mut inner = self.inner.lock();
        Self::remove_membership(&mut inner, conn_id, channel)
    }

    /// Removes `conn_id` from every channel it belongs to; used on
    /// connection close. Returns the channels that became empty.
    pub fn unsubscribe_all(&self, conn_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock();

        // Snapshot first: the per-channel removal below mutates the same
        // bookkeeping this set came from.
        let channels: Vec<String> = match inner.by_connection.get(conn_id) {
            Some(set) => set.iter().cloned().collect(),
            None => return Vec::new(),
        };

        channels
            .into_iter()
            .filter(|channel| Self::remove_membership(&mut inner, conn_id, channel))
            .collect()
    }

    /// Snapshot of the connections currently subscribed to `channel`.
    pub fn subscribers(&self, channel: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .by_channel
            .get(channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the channels `conn_id` is subscribed to.
    pub fn channels_of(&self, conn_id: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .by_connection
            .get(conn_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of channels with at least one local subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.lock().by_channel.len()
    }

    fn remove_membership(inner: &mut RegistryInner, conn_id: &str, channel: &str) -> bool {
        let Some(members) = inner.by_channel.get_mut(channel) else {
            return false;
        };
        if !members.remove(conn_id) {
            return false;
        }
        let emptied = members.is_empty();
        if emptied {
            inner.by_channel.remove(channel);
        }

        if let Some(channels) = inner.by_connection.get_mut(conn_id) {
            channels.remove(channel);
            if channels.is_empty() {
                inner.by_connection.remove(conn_id);
            }
        }

        emptied
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Both maps must describe the same relation after any operation mix.
    fn assert_consistent(registry: &ChannelRegistry) {
        let inner = registry.inner.lock();
        for (channel, members) in &inner.by_channel {
            assert!(!members.is_empty(), "empty channel {channel} not removed");
            for conn in members {
                assert!(
                    inner.by_connection[conn].contains(channel),
                    "{conn} in {channel} but not the reverse"
                );
            }
        }
        for (conn, channels) in &inner.by_connection {
            assert!(!channels.is_empty(), "empty connection {conn} not removed");
            for channel in channels {
                assert!(
                    inner.by_channel[channel].contains(conn),
                    "{channel} on {conn} but not the reverse"
                );
            }
        }
    }

    #[test]
    fn first_subscriber_signals_true() {
        let reg = ChannelRegistry::new();
        assert!(reg.subscribe("a", "x"));
        assert!(!reg.subscribe("b", "x"));
        assert_consistent(&reg);
    }

    #[test]
    fn resubscribe_is_idempotent() {
        let reg = ChannelRegistry::new();
        assert!(reg.subscribe("a", "x"));
        // Same connection again: membership unchanged, no first-subscriber signal.
        assert!(!reg.subscribe("a", "x"));
        assert_eq!(reg.subscribers("x").len(), 1);
        assert_consistent(&reg);
    }

    #[test]
    fn last_unsubscribe_signals_true() {
        let reg = ChannelRegistry::new();
        reg.subscribe("a", "x");
        reg.subscribe("b", "x");

        assert!(!reg.unsubscribe("a", "x"));
        assert!(reg.unsubscribe("b", "x"));
        assert_eq!(reg.channel_count(), 0);
        assert_consistent(&reg);
    }

    #[test]
    fn unsubscribe_non_member_is_noop() {
        let reg = ChannelRegistry::new();
        reg.subscribe("a", "x");

        assert!(!reg.unsubscribe("b", "x"));
        assert!(!reg.unsubscribe("a", "y"));
        assert_eq!(reg.subscribers("x").len(), 1);
        assert_consistent(&reg);
    }

    #[test]
    fn unsubscribe_all_reports_emptied_channels() {
        let reg = ChannelRegistry::new();
        reg.subscribe("a", "x");
        reg.subscribe("a", "y");
        reg.subscribe("b", "x");

        let mut emptied = reg.unsubscribe_all("a");
        emptied.sort();
        // "x" still has b; only "y" went empty.
        assert_eq!(emptied, vec!["y"]);
        assert!(reg.channels_of("a").is_empty());
        assert_eq!(reg.subscribers("x"), vec!["b"]);
        assert_consistent(&reg);
    }

    #[test]
    fn unsubscribe_all_unknown_connection() {
        let reg = ChannelRegistry::new();
        assert!(reg.unsubscribe_all("ghost").is_empty());
    }

    #[test]
    fn channels_are_implicit() {
        let reg = ChannelRegistry::new();
        assert_eq!(reg.channel_count(), 0);
        assert!(reg.subscribers("x").is_empty());

        reg.subscribe("a", "x");
        assert_eq!(reg.channel_count(), 1);

        reg.unsubscribe("a", "x");
        assert_eq!(reg.channel_count(), 0);
        assert!(reg.subscribers("x").is_empty());
        assert_consistent(&reg);
    }

    #[test]
    fn subscribers_is_a_snapshot() {
        let reg = ChannelRegistry::new();
        reg.subscribe("a", "x");
        let snapshot = reg.subscribers("x");

        reg.unsubscribe("a", "x");
        // The earlier snapshot is unaffected by later mutation.
        assert_eq!(snapshot, vec!["a"]);
    }

    #[test]
    fn consistency_after_operation_storm() {
        let reg = ChannelRegistry::new();
        for conn in ["a", "b", "c"] {
            for channel in ["x", "y", "z"] {
                reg.subscribe(conn, channel);
            }
        }
        reg.unsubscribe("a", "x");
        reg.unsubscribe("a", "x");
        reg.unsubscribe_all("b");
        reg.subscribe("b", "y");
        reg.unsubscribe("c", "z");
        assert_consistent(&reg);

        reg.unsubscribe_all("a");
        reg.unsubscribe_all("b");
        reg.unsubscribe_all("c");
        assert_eq!(reg.channel_count(), 0);
        assert_consistent(&reg);
    }
}
