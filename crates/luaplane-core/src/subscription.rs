//! Event and timer subscription tables.
//!
//! Two many-to-many relations between IDs and scripts. Sets are
//! unordered; the executor makes no promise about the order in which
//! subscribers of the same event are serviced.
//!
//! The one invariant that matters: a destroyed script must not linger
//! anywhere. Every eviction path calls
//! [`unsubscribe_all`](Subscriptions::unsubscribe_all), which sweeps the
//! script out of both relations.

use crate::{EventId, ScriptId, TimerId};
use std::collections::{HashMap, HashSet};

/// Maps event IDs and timer IDs to the scripts subscribed to them.
#[derive(Debug, Default)]
pub struct Subscriptions {
    event_subs: HashMap<EventId, HashSet<ScriptId>>,
    timer_subs: HashMap<TimerId, HashSet<ScriptId>>,
}

impl Subscriptions {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes a script to an event.
    pub fn add_event_subscription(&mut self, id: EventId, script: ScriptId) {
        self.event_subs.entry(id).or_default().insert(script);
    }

    /// Removes an event subscription; no-op if absent.
    pub fn remove_event_subscription(&mut self, id: EventId, script: ScriptId) {
        if let Some(set) = self.event_subs.get_mut(&id) {
            set.remove(&script);
        }
    }

    /// Subscribes a script to a timer.
    pub fn add_timer_subscription(&mut self, id: TimerId, script: ScriptId) {
        self.timer_subs.entry(id).or_default().insert(script);
    }

    /// Removes a timer subscription; no-op if absent.
    pub fn remove_timer_subscription(&mut self, id: TimerId, script: ScriptId) {
        if let Some(set) = self.timer_subs.get_mut(&id) {
            set.remove(&script);
        }
    }

    /// Removes the script from every event set and every timer set.
    pub fn unsubscribe_all(&mut self, script: ScriptId) {
        for set in self.event_subs.values_mut() {
            set.remove(&script);
        }
        for set in self.timer_subs.values_mut() {
            set.remove(&script);
        }
    }

    /// The scripts currently subscribed to an event.
    pub fn event_subscribers(&self, id: EventId) -> impl Iterator<Item = ScriptId> + '_ {
        self.event_subs.get(&id).into_iter().flatten().copied()
    }

    /// The scripts currently subscribed to a timer.
    pub fn timer_subscribers(&self, id: TimerId) -> impl Iterator<Item = ScriptId> + '_ {
        self.timer_subs.get(&id).into_iter().flatten().copied()
    }

    /// Whether the script appears in any relation. Test support.
    #[must_use]
    pub fn is_subscribed_anywhere(&self, script: ScriptId) -> bool {
        self.event_subs.values().any(|s| s.contains(&script))
            || self.timer_subs.values().any(|s| s.contains(&script))
    }
}
