//! The executor: script loading, the tick loop, and eviction.
//!
//! The executor owns every script instance, the event and timer
//! registries, and the subscription tables. It is single-threaded
//! cooperative: one call to [`Executor::run_loop`] is one *tick*, and
//! the caller decides the pacing — the executor never sleeps.
//!
//! A tick:
//!
//! 1. Poll periodic event timers; publish each due event to its
//!    subscribers' mailboxes.
//! 2. Poll the timer pool; append each fired edge to every subscribing
//!    script's pending list.
//! 3. Per script, in load order: drain its pending callbacks, then run
//!    its `loop` with the watchdog armed. Any failure evicts the script
//!    within the same tick.
//!
//! Script failures never propagate to the caller: every one is
//! recovered locally by eviction, with a log line naming the cause, and
//! no script failure affects any other script.

use crate::bindings::WatchdogConfig;
use crate::error::ScriptError;
use crate::registries::{lock, Mailbox, Registries, SharedRegistries};
use crate::script::ScriptInstance;
use luaplane_core::ScriptId;
use mlua::Lua;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Host-supplied binder that installs the dataplane vocabulary into a
/// fresh script VM.
///
/// Invoked once per script, before the script's source is compiled, so
/// the binder's globals are visible to the script's top level. The
/// binder must not call back into the executor.
pub type DataplaneBinder = Arc<dyn Fn(&Lua) -> mlua::Result<()> + Send + Sync>;

enum ScriptSource<'a> {
    File(&'a Path),
    Buffer(&'a str),
}

/// Drives a set of cooperative Lua scripts over a shared dataplane.
pub struct Executor {
    registries: SharedRegistries,
    scripts: Vec<ScriptInstance>,
    binder: Option<DataplaneBinder>,
    watchdog: WatchdogConfig,
    total_ops: i64,
    next_script: u64,
}

impl Executor {
    /// Creates an executor with no binder and default watchdog bounds.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registries: Arc::new(Mutex::new(Registries::default())),
            scripts: Vec::new(),
            binder: None,
            watchdog: WatchdogConfig::default(),
            total_ops: 0,
            next_script: 0,
        }
    }

    /// Sets the dataplane binder applied to every fresh script VM.
    #[must_use]
    pub fn with_binder(
        mut self,
        binder: impl Fn(&Lua) -> mlua::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.binder = Some(Arc::new(binder));
        self
    }

    /// Overrides the watchdog bounds for scripts loaded afterwards.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Loads every `*.lua` file in `dir`, sorted by path.
    ///
    /// Two phases, so cross-script state established at top level is
    /// complete before any `init` runs: first every file is compiled and
    /// its top level executed, then each surviving script's `init` runs.
    /// Failures are logged and skip the offending script only.
    pub fn load_scripts(&mut self, dir: impl AsRef<Path>) {
        let entries = match std::fs::read_dir(dir.as_ref()) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::error!("cannot enumerate {}: {err}", dir.as_ref().display());
                return;
            }
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "lua"))
            .collect();
        paths.sort();

        let mut fresh = Vec::new();
        for path in paths {
            tracing::info!("loading {}", path.display());
            match self.compile(ScriptSource::File(&path)) {
                Ok(script) => {
                    fresh.push(script.id());
                    self.scripts.push(script);
                }
                Err(err) => {
                    tracing::error!("error loading/executing script {}: {err}", path.display());
                }
            }
        }

        for id in fresh {
            let Some(ix) = self.scripts.iter().position(|s| s.id() == id) else {
                continue;
            };
            if let Err(err) = self.scripts[ix].run_init() {
                tracing::error!("error in init function: {err}, removing script from execution list");
                let script = self.scripts.remove(ix);
                self.discard(script.id());
            }
        }
    }

    /// Loads a single script file and runs its `init`. Returns whether
    /// the script is now live.
    pub fn load_script_from_file(&mut self, path: impl AsRef<Path>) -> bool {
        tracing::info!("loading {}", path.as_ref().display());
        match self.load_single(ScriptSource::File(path.as_ref())) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    "failed to load script from {}: {err}",
                    path.as_ref().display()
                );
                false
            }
        }
    }

    /// Loads a single script from a memory buffer and runs its `init`.
    /// Returns whether the script is now live.
    pub fn load_script_from_buffer(&mut self, buffer: &str) -> bool {
        match self.load_single(ScriptSource::Buffer(buffer)) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!("failed to load script from buffer: {err}");
                false
            }
        }
    }

    /// Runs one tick.
    pub fn run_loop(&mut self) {
        {
            let mut reg = lock(&self.registries);
            for event in reg.events.poll_elapsed() {
                reg.publish(event);
            }
            for timer in reg.timers.poll_elapsed() {
                reg.notify_timer_elapsed(timer);
            }
        }

        let mut ix = 0;
        while ix < self.scripts.len() {
            self.total_ops += 1;
            let result = {
                let script = &self.scripts[ix];
                script.handle_callbacks().and_then(|()| script.run_loop_fn())
            };
            match result {
                Ok(()) => ix += 1,
                Err(err) => {
                    tracing::error!("runtime error: {err}, removing script from execution list");
                    let script = self.scripts.remove(ix);
                    self.discard(script.id());
                }
            }
        }
    }

    /// Cumulative per-script tick count since construction.
    #[must_use]
    pub fn get_total_ops(&self) -> i64 {
        self.total_ops
    }

    /// Number of currently live scripts.
    #[must_use]
    pub fn get_nr_of_scripts(&self) -> usize {
        self.scripts.len()
    }

    fn load_single(&mut self, source: ScriptSource<'_>) -> Result<(), ScriptError> {
        let script = self.compile(source)?;
        if let Err(err) = script.run_init() {
            self.discard(script.id());
            return Err(err);
        }
        self.scripts.push(script);
        Ok(())
    }

    /// Builds a fresh script VM, applies the binder, and compiles and
    /// runs the source's top level. On failure every trace of the script
    /// is removed before the error is returned, so a rejected script is
    /// never visible to the registries.
    fn compile(&mut self, source: ScriptSource<'_>) -> Result<ScriptInstance, ScriptError> {
        let id = ScriptId::from_raw(self.next_script);
        self.next_script += 1;
        lock(&self.registries)
            .mailboxes
            .insert(id, Mailbox::default());

        let result = self.compile_inner(id, source);
        if result.is_err() {
            self.discard(id);
        }
        result
    }

    fn compile_inner(
        &self,
        id: ScriptId,
        source: ScriptSource<'_>,
    ) -> Result<ScriptInstance, ScriptError> {
        let mut script = ScriptInstance::new(id, Arc::clone(&self.registries), &self.watchdog)?;
        if let Some(binder) = &self.binder {
            script.bind(binder)?;
        }
        match source {
            ScriptSource::File(path) => script.load_and_execute_file(path)?,
            ScriptSource::Buffer(text) => script.load_and_execute_buffer(text)?,
        }
        Ok(script)
    }

    /// Removes every trace of a script from the shared state.
    fn discard(&self, id: ScriptId) {
        let mut reg = lock(&self.registries);
        reg.subs.unsubscribe_all(id);
        reg.mailboxes.remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn registries(&self) -> &SharedRegistries {
        &self.registries
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}
