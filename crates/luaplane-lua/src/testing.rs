//! In-memory dataplane for tests.
//!
//! A keyed `i64` store with the same Lua surface the real embeddings
//! expose (`db.get` / `db.set`). `get` on a missing key raises a
//! script-visible error in the `exception '..'` shape, which is exactly
//! what the eviction tests need.
//!
//! # Example
//!
//! ```
//! use luaplane_lua::testing::TestDataplane;
//! use luaplane_lua::Executor;
//!
//! let db = TestDataplane::new();
//! db.initialize(&[("setpoint", 40)]);
//!
//! let mut exec = Executor::new().with_binder(db.binder());
//! assert!(exec.load_script_from_buffer(
//!     "function loop() db.set('setpoint', db.get('setpoint') + 1) end",
//! ));
//! exec.run_loop();
//! assert_eq!(db.get("setpoint"), Some(41));
//! ```

use crate::DataplaneBinder;
use mlua::Lua;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// Shared keyed `i64` store bound into script VMs as `db`.
#[derive(Debug, Default)]
pub struct TestDataplane {
    values: Mutex<HashMap<String, i64>>,
}

impl TestDataplane {
    /// Creates an empty dataplane.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seeds the store with the given entries.
    pub fn initialize(&self, entries: &[(&str, i64)]) {
        let mut values = self.lock_values();
        for (name, value) in entries {
            values.insert((*name).to_string(), *value);
        }
    }

    /// Sets a key from the host side.
    pub fn set(&self, name: &str, value: i64) {
        self.lock_values().insert(name.to_string(), value);
    }

    /// Reads a key from the host side.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<i64> {
        self.lock_values().get(name).copied()
    }

    /// Installs `db.get` / `db.set` into a script VM.
    ///
    /// The Lua-side `get` raises on a missing key.
    pub fn bind(self: &Arc<Self>, lua: &Lua) -> mlua::Result<()> {
        let db = lua.create_table()?;

        let this = Arc::clone(self);
        db.set(
            "get",
            lua.create_function(move |_, name: String| {
                this.get(&name).ok_or_else(|| {
                    mlua::Error::RuntimeError(format!("exception 'element '{name}' not found'"))
                })
            })?,
        )?;

        let this = Arc::clone(self);
        db.set(
            "set",
            lua.create_function(move |_, (name, value): (String, i64)| {
                this.set(&name, value);
                Ok(())
            })?,
        )?;

        lua.globals().set("db", db)
    }

    /// Convenience wrapper: the dataplane as an executor binder.
    #[must_use]
    pub fn binder(self: &Arc<Self>) -> DataplaneBinder {
        let this = Arc::clone(self);
        Arc::new(move |lua| this.bind(lua))
    }

    fn lock_values(&self) -> std::sync::MutexGuard<'_, HashMap<String, i64>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
