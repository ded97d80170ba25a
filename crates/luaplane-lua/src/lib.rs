//! Sandboxed Lua script host over a shared dataplane.
//!
//! This crate runs many cooperative user scripts side-by-side, each in
//! its own sandboxed Lua VM, over host-owned state exposed through a
//! binder. The host drives everything: it loads scripts from a
//! directory or a memory buffer, runs each script's `init` once and its
//! `loop` on every tick, dispatches event and timer callbacks, bounds
//! runaway invocations with an instruction-count watchdog, and evicts
//! any script that fails.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                   Executor                           │
//! │  registries: events / timers / subscriptions         │
//! │  per-script mailboxes (pending events, timer edges)  │
//! │      │ run_loop(): poll timers → drain → loop        │
//! │      ▼                                               │
//! │  ┌────────────────┐  ┌────────────────┐              │
//! │  │ ScriptInstance │  │ ScriptInstance │   ...        │
//! │  │  Lua VM        │  │  Lua VM        │              │
//! │  │  init / loop   │  │  init / loop   │              │
//! │  │  handlers      │  │  handlers      │              │
//! │  └────────────────┘  └────────────────┘              │
//! │      ▲ host API: LOG, now, event.*, timer.*, sleep2  │
//! │      ▲ dataplane binder: host-defined globals        │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use luaplane_lua::Executor;
//!
//! let mut exec = Executor::new();
//! assert!(exec.load_script_from_buffer(
//!     r#"
//!     local beats = 0
//!     function loop()
//!         beats = beats + 1
//!     end
//!     "#,
//! ));
//! exec.run_loop();
//! assert_eq!(exec.get_nr_of_scripts(), 1);
//! ```
//!
//! # Scheduling model
//!
//! Single-threaded cooperative. One call to [`Executor::run_loop`] is
//! one tick; pacing is the caller's job. No script runs concurrently
//! with another, and no callback runs concurrently with `loop`. The
//! only shared mutable resource is the dataplane behind the binder;
//! its synchronization discipline belongs to the host.
//!
//! # Sandbox
//!
//! Scripts see base, package, coroutine, table, string and math — no
//! `os`, `io`, `debug` or `utf8`, and `require` has no search paths, so
//! any foreign module fails at load. Host globals: `LOG`, `now`,
//! `sleep2`, `event.*`, `timer.*`, plus whatever the dataplane binder
//! installs. Per-invocation runtime is bounded by an instruction-count
//! watchdog configurable through [`WatchdogConfig`].
//!
//! # Related Crates
//!
//! - `luaplane-core` - timers, event interning, subscription tables

mod bindings;
mod error;
mod executor;
mod registries;
mod script;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use bindings::WatchdogConfig;
pub use error::ScriptError;
pub use executor::{DataplaneBinder, Executor};

// Re-export the ID types that cross the host-facing API.
pub use luaplane_core::{EventId, ScriptId, TimerId};
