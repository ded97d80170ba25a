//! Monotonic stopwatch timers and the pool that owns them.
//!
//! A [`Timer`] is a named one-shot or periodic stopwatch over
//! [`Instant`]. Elapse detection is **edge-triggered**: [`Timer::elapsed`]
//! reports `true` at most once per period. A one-shot timer stops itself
//! on that edge; a periodic timer re-anchors its start to the current
//! instant, so a long gap between polls yields one edge, not a burst.
//!
//! The [`TimerPool`] is the append-only collection behind the script
//! `timer.*` surface. Timers are identified by their index and are never
//! re-bound to a different name. Named timers are *shared*: any script
//! asking for the same name gets the same timer. Empty-named timers are
//! *private* and invisible to the name scan.

use crate::{RegistryError, TimerId};
use std::time::{Duration, Instant};

/// One-shot vs. repeating behavior of a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Fires a single edge, then stops.
    OneShot,
    /// Fires an edge once per period, re-anchoring each time.
    Periodic,
}

/// A named monotonic stopwatch with edge-triggered elapse detection.
#[derive(Debug, Clone)]
pub struct Timer {
    name: String,
    kind: TimerKind,
    start: Instant,
    duration: Duration,
    running: bool,
}

impl Timer {
    /// Creates a stopped timer. It does nothing until
    /// [`elapse_after`](Self::elapse_after) is called.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: TimerKind) -> Self {
        Self {
            name: name.into(),
            kind,
            start: Instant::now(),
            duration: Duration::ZERO,
            running: false,
        }
    }

    /// Arms the timer: sets the period and starts counting from now.
    pub fn elapse_after(&mut self, duration: Duration) {
        self.duration = duration;
        self.start = Instant::now();
        self.running = true;
    }

    /// Re-anchors the current period to now, keeping the duration.
    pub fn restart(&mut self) {
        self.start = Instant::now();
        self.running = true;
    }

    /// Stops the timer. A stopped timer is inactive and never elapses.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Edge-triggered elapse check.
    ///
    /// Returns `true` at most once per period: a one-shot timer stops on
    /// the edge, a periodic timer restarts its period.
    pub fn elapsed(&mut self) -> bool {
        if !self.running {
            return false;
        }
        if self.start.elapsed() >= self.duration {
            match self.kind {
                TimerKind::Periodic => self.restart(),
                TimerKind::OneShot => self.stop(),
            }
            return true;
        }
        false
    }

    /// Whether the timer is running with time still left on the clock.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.running && self.remaining() > Duration::ZERO
    }

    /// Time left until the next elapse, clamped at zero.
    /// A stopped timer reports zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        if self.running {
            self.duration.saturating_sub(self.start.elapsed())
        } else {
            Duration::ZERO
        }
    }

    /// The name the timer was constructed with (possibly empty).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Name reported for private (empty-named) timers.
const NONAME: &str = "<noname>";

/// Append-only pool of shared and private timers.
///
/// The index of a timer in the pool is its [`TimerId`]. Operations
/// taking an ID fail with [`RegistryError::UnknownTimer`] when the ID is
/// out of range.
#[derive(Debug, Default)]
pub struct TimerPool {
    timers: Vec<Timer>,
}

impl TimerPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the timer with the given non-empty name, creating a
    /// one-shot timer if none exists yet.
    ///
    /// Private timers have empty names and are never matched here.
    pub fn find_or_create_sharable(&mut self, name: &str) -> TimerId {
        if let Some(ix) = self.timers.iter().position(|t| t.name() == name) {
            return TimerId::from_index(ix);
        }
        self.timers.push(Timer::new(name, TimerKind::OneShot));
        TimerId::from_index(self.timers.len() - 1)
    }

    /// Appends a fresh private (empty-named) timer.
    pub fn create_private(&mut self) -> TimerId {
        self.timers.push(Timer::new("", TimerKind::OneShot));
        TimerId::from_index(self.timers.len() - 1)
    }

    /// Arms a timer by ID.
    pub fn elapse_after(&mut self, id: TimerId, duration: Duration) -> Result<(), RegistryError> {
        self.get_mut(id)?.elapse_after(duration);
        Ok(())
    }

    /// Stops a timer by ID.
    pub fn stop(&mut self, id: TimerId) -> Result<(), RegistryError> {
        self.get_mut(id)?.stop();
        Ok(())
    }

    /// Whether a timer is running with time left.
    pub fn is_active(&self, id: TimerId) -> Result<bool, RegistryError> {
        Ok(self.get(id)?.is_active())
    }

    /// Time left on a timer, clamped at zero.
    pub fn remaining(&self, id: TimerId) -> Result<Duration, RegistryError> {
        Ok(self.get(id)?.remaining())
    }

    /// The timer's name, or `<noname>` for private timers.
    pub fn name(&self, id: TimerId) -> Result<&str, RegistryError> {
        let name = self.get(id)?.name();
        Ok(if name.is_empty() { NONAME } else { name })
    }

    /// Polls every timer once, returning the IDs whose edge fired.
    ///
    /// Consumes the edge (see [`Timer::elapsed`]); the caller is
    /// responsible for fanning the IDs out to subscribers.
    pub fn poll_elapsed(&mut self) -> Vec<TimerId> {
        let mut fired = Vec::new();
        for (ix, timer) in self.timers.iter_mut().enumerate() {
            if timer.elapsed() {
                fired.push(TimerId::from_index(ix));
            }
        }
        fired
    }

    /// Number of timers ever created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    fn get(&self, id: TimerId) -> Result<&Timer, RegistryError> {
        self.timers
            .get(id.index())
            .ok_or(RegistryError::UnknownTimer(id))
    }

    fn get_mut(&mut self, id: TimerId) -> Result<&mut Timer, RegistryError> {
        self.timers
            .get_mut(id.index())
            .ok_or(RegistryError::UnknownTimer(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn one_shot_fires_once() {
        let mut t = Timer::new("one-shot", TimerKind::OneShot);
        assert!(!t.is_active());

        t.elapse_after(Duration::from_millis(20));
        assert!(t.is_active());

        sleep(Duration::from_millis(40));
        assert!(!t.is_active());
        assert!(t.elapsed());

        // Edge already consumed, timer stopped itself.
        assert!(!t.elapsed());
        assert!(!t.is_active());
    }

    #[test]
    fn periodic_re_anchors() {
        let mut t = Timer::new("periodic", TimerKind::Periodic);
        t.elapse_after(Duration::from_millis(20));
        assert!(t.is_active());

        sleep(Duration::from_millis(40));
        assert!(t.elapsed());
        // Re-anchored to now: running again, edge not yet due.
        assert!(t.is_active());
        assert!(!t.elapsed());

        sleep(Duration::from_millis(40));
        assert!(t.elapsed());
    }

    #[test]
    fn stopped_timer_never_elapses() {
        let mut t = Timer::new("stopped", TimerKind::OneShot);
        t.elapse_after(Duration::from_millis(1));
        t.stop();
        sleep(Duration::from_millis(10));
        assert!(!t.elapsed());
        assert_eq!(t.remaining(), Duration::ZERO);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let mut t = Timer::new("clamp", TimerKind::OneShot);
        t.elapse_after(Duration::from_millis(5));
        sleep(Duration::from_millis(20));
        assert_eq!(t.remaining(), Duration::ZERO);
    }

    #[test]
    fn zero_duration_elapses_immediately() {
        let mut t = Timer::new("now", TimerKind::OneShot);
        t.elapse_after(Duration::ZERO);
        assert!(t.elapsed());
        assert!(!t.elapsed());
    }

    #[test]
    fn sharable_is_found_by_name() {
        let mut pool = TimerPool::new();
        let a = pool.find_or_create_sharable("heartbeat");
        let b = pool.find_or_create_sharable("heartbeat");
        assert_eq!(a, b);
        assert_eq!(pool.len(), 1);

        let c = pool.find_or_create_sharable("other");
        assert_ne!(a, c);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn private_timers_are_never_shared() {
        let mut pool = TimerPool::new();
        let a = pool.create_private();
        let b = pool.create_private();
        assert_ne!(a, b);

        // A name scan must not pick up a private timer.
        let c = pool.find_or_create_sharable("named");
        assert_ne!(c, a);
        assert_ne!(c, b);
        assert_eq!(pool.name(a).unwrap(), "<noname>");
        assert_eq!(pool.name(c).unwrap(), "named");
    }

    #[test]
    fn unknown_id_is_rejected() {
        let mut pool = TimerPool::new();
        let bogus = TimerId::from_index(42);
        assert_eq!(
            pool.elapse_after(bogus, Duration::from_millis(1)),
            Err(RegistryError::UnknownTimer(bogus))
        );
        assert!(pool.stop(bogus).is_err());
        assert!(pool.is_active(bogus).is_err());
        assert!(pool.remaining(bogus).is_err());
        assert!(pool.name(bogus).is_err());
    }

    #[test]
    fn poll_reports_each_edge_once() {
        let mut pool = TimerPool::new();
        let id = pool.find_or_create_sharable("tick");
        pool.elapse_after(id, Duration::from_millis(10)).unwrap();

        assert!(pool.poll_elapsed().is_empty());
        sleep(Duration::from_millis(25));
        assert_eq!(pool.poll_elapsed(), vec![id]);
        // One-shot: second poll sees nothing.
        assert!(pool.poll_elapsed().is_empty());
    }
}
