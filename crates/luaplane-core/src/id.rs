//! Identifier types for events, timers and scripts.
//!
//! Event and timer IDs are positions in append-only vectors, so they are
//! stable for the process lifetime and never reused. Script IDs are
//! sequence numbers handed out by the executor; they stand in for the
//! script in the subscription tables so the registries never hold a
//! reference into a live interpreter.

use std::fmt;

/// Identifier of an interned event.
///
/// Allocated by [`EventRegistry::open`](crate::EventRegistry::open);
/// the numeric value is the event's position in the name vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(usize);

impl EventId {
    /// Wraps a raw index. The registry validates range on use.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a timer in the [`TimerPool`](crate::TimerPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(usize);

impl TimerId {
    /// Wraps a raw index. The pool validates range on use.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a loaded script instance.
///
/// Unique for the lifetime of an executor; never reused, so a stale ID
/// left behind in a subscription set can at worst match nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(u64);

impl ScriptId {
    /// Wraps a raw sequence number.
    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_roundtrip() {
        let id = EventId::from_index(7);
        assert_eq!(id.index(), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn script_id_display() {
        assert_eq!(ScriptId::from_raw(3).to_string(), "script#3");
    }
}
