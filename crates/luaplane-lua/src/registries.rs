//! Shared scheduling state behind the executor and the bindings.
//!
//! The executor, the per-script bindings and the callback dispatcher all
//! need to reach the same registries: a script calling `event.publish`
//! must land IDs in *other* scripts' mailboxes. Everything lives behind
//! one `Arc<Mutex<..>>`; the rule that keeps this deadlock-free is that
//! the lock is never held across a call into Lua.

use luaplane_core::{EventId, EventRegistry, ScriptId, Subscriptions, TimerId, TimerPool};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle to the registries, cloned into every binding closure.
pub(crate) type SharedRegistries = Arc<Mutex<Registries>>;

/// Per-script delivery state.
///
/// `pending_events` is a FIFO of published event IDs. `elapsed_timers`
/// holds timer edges awaiting a consumer; an entry leaves the list only
/// through a successful handler call or a `timer.is_elapsed` hit, so an
/// edge that fires before the script attaches a handler is not lost.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    pub pending_events: VecDeque<EventId>,
    pub elapsed_timers: Vec<TimerId>,
}

/// The executor-owned registries plus every live script's mailbox.
#[derive(Debug, Default)]
pub(crate) struct Registries {
    pub events: EventRegistry,
    pub timers: TimerPool,
    pub subs: Subscriptions,
    pub mailboxes: HashMap<ScriptId, Mailbox>,
}

impl Registries {
    /// Enqueues an event on every currently subscribed script.
    pub fn publish(&mut self, id: EventId) {
        let Self {
            subs, mailboxes, ..
        } = self;
        for script in subs.event_subscribers(id) {
            if let Some(mailbox) = mailboxes.get_mut(&script) {
                mailbox.pending_events.push_back(id);
            }
        }
    }

    /// Appends a timer edge to every subscribing script's pending list.
    pub fn notify_timer_elapsed(&mut self, id: TimerId) {
        let Self {
            subs, mailboxes, ..
        } = self;
        for script in subs.timer_subscribers(id) {
            if let Some(mailbox) = mailboxes.get_mut(&script) {
                mailbox.elapsed_timers.push(id);
            }
        }
    }
}

/// Locks a mutex, recovering from poisoning.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_only_subscribers() {
        let mut reg = Registries::default();
        let event = reg.events.open("alarm");
        let s1 = ScriptId::from_raw(1);
        let s2 = ScriptId::from_raw(2);
        reg.mailboxes.insert(s1, Mailbox::default());
        reg.mailboxes.insert(s2, Mailbox::default());
        reg.subs.add_event_subscription(event, s1);

        reg.publish(event);

        assert_eq!(reg.mailboxes[&s1].pending_events, VecDeque::from([event]));
        assert!(reg.mailboxes[&s2].pending_events.is_empty());
    }

    #[test]
    fn timer_edges_accumulate_per_elapse() {
        let mut reg = Registries::default();
        let timer = reg.timers.create_private();
        let s1 = ScriptId::from_raw(1);
        reg.mailboxes.insert(s1, Mailbox::default());
        reg.subs.add_timer_subscription(timer, s1);

        reg.notify_timer_elapsed(timer);
        reg.notify_timer_elapsed(timer);

        assert_eq!(reg.mailboxes[&s1].elapsed_timers, vec![timer, timer]);
    }

    #[test]
    fn publish_to_evicted_script_is_harmless() {
        let mut reg = Registries::default();
        let event = reg.events.open("alarm");
        let gone = ScriptId::from_raw(9);
        reg.subs.add_event_subscription(event, gone);
        // No mailbox for `gone`: the publish must not panic or allocate one.
        reg.publish(event);
        assert!(reg.mailboxes.is_empty());
    }
}
