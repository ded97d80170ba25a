//! Event name interning and periodic events.
//!
//! Events are integer IDs over an append-only name vector. Non-empty
//! names are interned: opening the same name twice yields the same ID.
//! The empty name is special; every open of `""` allocates a fresh,
//! anonymous event, so empty-name events are always distinct.
//!
//! A *periodic event* is an event the registry publishes on its own
//! schedule: it owns a single [`TimerKind::Periodic`] timer keyed by the
//! event ID, and [`poll_elapsed`](EventRegistry::poll_elapsed) reports
//! which events are due each tick. An event can own at most one such
//! timer for the life of the process.

use crate::{EventId, RegistryError, Timer, TimerKind};
use std::collections::BTreeMap;
use std::time::Duration;

/// Interns event names and drives periodic events.
#[derive(Debug, Default)]
pub struct EventRegistry {
    names: Vec<String>,
    periodic: BTreeMap<EventId, Timer>,
}

impl EventRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a name and returns its event ID.
    ///
    /// A non-empty name returns the existing ID if the name is known,
    /// otherwise appends. The empty name always appends, so each call
    /// with `""` returns a fresh ID.
    pub fn open(&mut self, name: &str) -> EventId {
        if !name.is_empty() {
            if let Some(ix) = self.names.iter().position(|n| n == name) {
                return EventId::from_index(ix);
            }
        }
        self.names.push(name.to_string());
        EventId::from_index(self.names.len() - 1)
    }

    /// Opens the event and registers a periodic timer that publishes it
    /// every `period`.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyDefined`] if the event already owns a
    /// periodic timer.
    pub fn create_periodic(
        &mut self,
        name: &str,
        period: Duration,
    ) -> Result<EventId, RegistryError> {
        let id = self.open(name);
        if self.periodic.contains_key(&id) {
            return Err(RegistryError::AlreadyDefined(name.to_string()));
        }
        let mut timer = Timer::new(name, TimerKind::Periodic);
        timer.elapse_after(period);
        self.periodic.insert(id, timer);
        Ok(id)
    }

    /// The stored name for an event (possibly empty).
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownEvent`] for an out-of-range ID.
    pub fn name(&self, id: EventId) -> Result<&str, RegistryError> {
        self.names
            .get(id.index())
            .map(String::as_str)
            .ok_or(RegistryError::UnknownEvent(id))
    }

    /// Whether this ID has been allocated.
    #[must_use]
    pub fn contains(&self, id: EventId) -> bool {
        id.index() < self.names.len()
    }

    /// Polls the periodic timers once, returning the events due for
    /// publication this tick.
    pub fn poll_elapsed(&mut self) -> Vec<EventId> {
        self.periodic
            .iter_mut()
            .filter_map(|(id, timer)| timer.elapsed().then_some(*id))
            .collect()
    }

    /// Number of events ever opened.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether no event has been opened yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn open_interns_non_empty_names() {
        let mut reg = EventRegistry::new();
        let a = reg.open("alarm");
        let b = reg.open("alarm");
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.name(a).unwrap(), "alarm");
    }

    #[test]
    fn empty_names_are_always_fresh() {
        let mut reg = EventRegistry::new();
        let a = reg.open("");
        let b = reg.open("");
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.name(a).unwrap(), "");
    }

    #[test]
    fn ids_are_stable_across_growth() {
        let mut reg = EventRegistry::new();
        let first = reg.open("first");
        for i in 0..100 {
            reg.open(&format!("e{i}"));
        }
        assert_eq!(reg.open("first"), first);
    }

    #[test]
    fn name_rejects_out_of_range() {
        let reg = EventRegistry::new();
        let bogus = EventId::from_index(3);
        assert_eq!(reg.name(bogus), Err(RegistryError::UnknownEvent(bogus)));
        assert!(!reg.contains(bogus));
    }

    #[test]
    fn second_periodic_for_same_event_fails() {
        let mut reg = EventRegistry::new();
        reg.create_periodic("tick", Duration::from_millis(50)).unwrap();
        let err = reg
            .create_periodic("tick", Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyDefined("tick".into()));
    }

    #[test]
    fn periodic_event_keeps_its_open_id() {
        let mut reg = EventRegistry::new();
        let opened = reg.open("tick");
        let periodic = reg.create_periodic("tick", Duration::from_millis(50)).unwrap();
        assert_eq!(opened, periodic);
    }

    #[test]
    fn poll_reports_due_events() {
        let mut reg = EventRegistry::new();
        let id = reg.create_periodic("tick", Duration::from_millis(10)).unwrap();

        assert!(reg.poll_elapsed().is_empty());
        sleep(Duration::from_millis(25));
        assert_eq!(reg.poll_elapsed(), vec![id]);
        // Periodic timers re-anchor: nothing due immediately after.
        assert!(reg.poll_elapsed().is_empty());
    }
}
