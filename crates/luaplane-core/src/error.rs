//! Registry errors.

use crate::{EventId, TimerId};
use thiserror::Error;

/// Errors raised by the event registry and the timer pool.
///
/// These surface to scripts: the embedding layer maps each variant onto
/// a Lua runtime error, so an uncaught one evicts the calling script.
///
/// | Variant | When |
/// |---------|------|
/// | [`UnknownEvent`](Self::UnknownEvent) | Event ID out of range |
/// | [`UnknownTimer`](Self::UnknownTimer) | Timer ID out of range |
/// | [`AlreadyDefined`](Self::AlreadyDefined) | Second periodic timer for an event |
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No event with this ID has been opened.
    #[error("event {0} not found")]
    UnknownEvent(EventId),

    /// No timer with this ID exists in the pool.
    #[error("timer {0} not found")]
    UnknownTimer(TimerId),

    /// The event already owns a periodic timer.
    #[error("periodic event already defined: {0}")]
    AlreadyDefined(String),
}
