//! Scheduling state for the luaplane script host.
//!
//! This crate holds the interpreter-independent half of the host: the
//! monotonic [`Timer`], the [`EventRegistry`] that interns event names and
//! drives periodic events, the [`TimerPool`] of shared and private timers,
//! and the [`Subscriptions`] table that maps events and timers to the
//! scripts listening to them.
//!
//! # Crate Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │  luaplane-lua   : Lua VMs, bindings, executor  │
//! ├────────────────────────────────────────────────┤
//! │  luaplane-core  : timers, events, subscriptions│  ◄── HERE
//! └────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here touches a Lua state. The executor in `luaplane-lua` owns
//! one instance of each registry and routes every script-initiated call
//! through them; scripts are represented only by their [`ScriptId`].
//!
//! # Identifier model
//!
//! Events and timers are identified by their position in an append-only
//! vector, so IDs are stable for the life of the process and never
//! reused. [`EventId`] and [`TimerId`] are thin newtypes over that index;
//! they cross the Lua boundary as plain integers.
//!
//! # Errors
//!
//! All registry operations that take an ID fail with
//! [`RegistryError::UnknownEvent`] / [`RegistryError::UnknownTimer`] when
//! the ID is out of range, and [`EventRegistry::create_periodic`] fails
//! with [`RegistryError::AlreadyDefined`] when an event already owns a
//! periodic timer. The embedding layer turns these into script-visible
//! Lua errors.

mod error;
mod event;
mod id;
mod subscription;
mod timer;

pub use error::RegistryError;
pub use event::EventRegistry;
pub use id::{EventId, ScriptId, TimerId};
pub use subscription::Subscriptions;
pub use timer::{Timer, TimerKind, TimerPool};
