//! Name → connection-id registries and event broadcast.
//!
//! One generic [`Registry`] serves both uses the host has for it: event
//! subscriptions and the method-provider index. Tables hold connection *ids*,
//! never connection handles — the owning server resolves ids through its
//! `ConnectionSet`, so a table entry can never keep a dead connection alive.

use std::collections::HashSet;

use codec::envelope::task_event;
use codec::Message;
use dashmap::DashMap;
use network::ConnectionId;
use serde_json::Value;
use tracing::{debug, info};

use crate::Result;

/// Concurrent mapping of names to member connection ids, with a reverse map
/// for whole-connection pruning.
#[derive(Debug, Default)]
pub struct Registry {
    members: DashMap<String, HashSet<ConnectionId>>,
    memberships: DashMap<ConnectionId, HashSet<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `id` to `name`'s member set. Idempotent; returns whether the
    /// membership is new.
    pub fn insert(&self, name: &str, id: ConnectionId) -> bool {
        let added = self
            .members
            .entry(name.to_string())
            .or_default()
            .insert(id);
        if added {
            self.memberships.entry(id).or_default().insert(name.to_string());
            debug!(name, conn = id, "registered");
        }
        added
    }

    /// Removes `id` from `name`'s member set.
    pub fn remove(&self, name: &str, id: ConnectionId) {
        if let Some(mut set) = self.members.get_mut(name) {
            set.remove(&id);
        }
        if let Some(mut names) = self.memberships.get_mut(&id) {
            names.remove(name);
        }
    }

    /// Prunes `id` from every member set; called when its connection closes.
    /// Returns the names it was removed from.
    pub fn remove_member(&self, id: ConnectionId) -> Vec<String> {
        let Some((_, names)) = self.memberships.remove(&id) else {
            return Vec::new();
        };
        for name in &names {
            if let Some(mut set) = self.members.get_mut(name) {
                set.remove(&id);
            }
        }
        names.into_iter().collect()
    }

    pub fn contains(&self, name: &str, id: ConnectionId) -> bool {
        self.members
            .get(name)
            .map(|set| set.contains(&id))
            .unwrap_or(false)
    }

    /// Current members of `name`.
    pub fn members(&self, name: &str) -> Vec<ConnectionId> {
        self.members
            .get(name)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// An arbitrary member of `name`, if any.
    pub fn any_member(&self, name: &str) -> Option<ConnectionId> {
        self.members
            .get(name)
            .and_then(|set| set.iter().next().copied())
    }

    pub fn member_count(&self, name: &str) -> usize {
        self.members.get(name).map(|set| set.len()).unwrap_or(0)
    }

    /// All names with at least one member.
    pub fn names(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|e| !e.value().is_empty())
            .map(|e| e.key().clone())
            .collect()
    }
}

/// Event-name subscriptions plus broadcast fan-out.
#[derive(Debug, Default)]
pub struct SubscriptionTable {
    registry: Registry,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a connection to an event. Idempotent.
    pub fn subscribe(&self, event: &str, id: ConnectionId) -> bool {
        self.registry.insert(event, id)
    }

    /// Removes a connection from every event's membership. Must be called
    /// from the owning connection's close/error path so broadcasts never
    /// target dead sockets.
    pub fn remove_connection(&self, id: ConnectionId) {
        let events = self.registry.remove_member(id);
        if !events.is_empty() {
            debug!(conn = id, ?events, "pruned subscriptions");
        }
    }

    pub fn subscribers(&self, event: &str) -> Vec<ConnectionId> {
        self.registry.members(event)
    }

    pub fn subscriber_count(&self, event: &str) -> usize {
        self.registry.member_count(event)
    }

    /// Constructs an `event`-kind task and hands it to `send` once per
    /// subscriber; `send` reports whether delivery succeeded. Returns the
    /// number delivered. Zero subscribers is a no-op, observable in the log.
    pub fn broadcast<F>(
        &self,
        event: &str,
        task_id: &str,
        data: Option<Value>,
        mut send: F,
    ) -> Result<usize>
    where
        F: FnMut(ConnectionId, &Message) -> bool,
    {
        let subscribers = self.registry.members(event);
        if subscribers.is_empty() {
            debug!(event, "broadcast with no subscribers");
            return Ok(0);
        }

        let msg = task_event(task_id, event, data)?;
        let mut delivered = 0;
        for id in subscribers {
            if send(id, &msg) {
                delivered += 1;
            }
        }
        info!(event, delivered, "broadcast event");
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_is_idempotent() {
        let registry = Registry::new();
        assert!(registry.insert("math.add", 1));
        assert!(!registry.insert("math.add", 1));
        assert_eq!(registry.member_count("math.add"), 1);
    }

    #[test]
    fn remove_member_prunes_every_set() {
        let registry = Registry::new();
        registry.insert("a", 1);
        registry.insert("b", 1);
        registry.insert("b", 2);

        let mut removed = registry.remove_member(1);
        removed.sort();
        assert_eq!(removed, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.member_count("a"), 0);
        assert_eq!(registry.members("b"), vec![2]);
    }

    #[test]
    fn fan_out_reaches_each_subscriber_exactly_once() {
        let subs = SubscriptionTable::new();
        subs.subscribe("e", 1);
        subs.subscribe("e", 2);
        subs.subscribe("other", 3);

        let mut sent: Vec<ConnectionId> = Vec::new();
        let delivered = subs
            .broadcast("e", "T1", None, |id, msg| {
                assert_eq!(msg.header().task_kind().unwrap(), codec::TaskKind::Event);
                sent.push(id);
                true
            })
            .unwrap();

        sent.sort();
        assert_eq!(delivered, 2);
        assert_eq!(sent, vec![1, 2]);
    }

    #[test]
    fn removed_subscriber_is_excluded_from_later_broadcasts() {
        let subs = SubscriptionTable::new();
        subs.subscribe("e", 1);
        subs.subscribe("e", 2);

        subs.remove_connection(1);

        let mut sent = Vec::new();
        subs.broadcast("e", "T2", None, |id, _| {
            sent.push(id);
            true
        })
        .unwrap();
        assert_eq!(sent, vec![2]);
    }

    #[test]
    fn broadcast_without_subscribers_is_a_noop() {
        let subs = SubscriptionTable::new();
        let delivered = subs
            .broadcast("silent", "T3", None, |_, _| panic!("must not send"))
            .unwrap();
        assert_eq!(delivered, 0);
    }

    #[test]
    fn failed_sends_are_not_counted_as_delivered() {
        let subs = SubscriptionTable::new();
        subs.subscribe("e", 1);
        subs.subscribe("e", 2);

        let delivered = subs.broadcast("e", "T4", None, |id, _| id != 1).unwrap();
        assert_eq!(delivered, 1);
    }
}
