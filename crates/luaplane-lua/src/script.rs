//! One loaded script: an isolated Lua VM plus its delivery state.
//!
//! A script is born from a fresh sandboxed VM, optionally decorated by
//! the host's dataplane binder, then compiled and run at top level with
//! the watchdog armed. Afterwards the globals `init` and `loop` are
//! resolved into registry handles; either may be absent, but a global of
//! that name which is not a function rejects the script.
//!
//! The instance owns every callback handle its script registered; they
//! live in the VM's registry and die with the VM when the script is
//! evicted or the executor is torn down.

use crate::bindings::{self, BindingCtx, WatchdogConfig};
use crate::error::ScriptError;
use crate::registries::{lock, SharedRegistries};
use luaplane_core::{EventId, ScriptId, TimerId};
use mlua::{Function, Lua, RegistryKey, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Callback tables for one script: event ID → handler, timer ID →
/// handler. Shared between the dispatcher and the `subscribe` bindings.
#[derive(Debug, Default)]
pub(crate) struct ScriptHandlers {
    pub event_handlers: HashMap<EventId, RegistryKey>,
    pub timer_handlers: HashMap<TimerId, RegistryKey>,
}

/// A live script instance.
pub(crate) struct ScriptInstance {
    id: ScriptId,
    lua: Lua,
    init_fn: Option<RegistryKey>,
    loop_fn: Option<RegistryKey>,
    handlers: Arc<Mutex<ScriptHandlers>>,
    /// Watchdog anchor, reset before every host-initiated invocation.
    invocation_started: Arc<Mutex<Instant>>,
    registries: SharedRegistries,
}

impl ScriptInstance {
    /// Builds a fresh sandboxed VM with the host API installed.
    ///
    /// No source is loaded yet; the executor applies the dataplane
    /// binder first so its globals are visible to the script's top
    /// level.
    pub fn new(
        id: ScriptId,
        registries: SharedRegistries,
        watchdog: &WatchdogConfig,
    ) -> Result<Self, ScriptError> {
        let lua = bindings::create_sandboxed_vm()?;
        let handlers = Arc::new(Mutex::new(ScriptHandlers::default()));
        let invocation_started = Arc::new(Mutex::new(Instant::now()));

        let ctx = BindingCtx {
            script: id,
            registries: Arc::clone(&registries),
            handlers: Arc::clone(&handlers),
            invocation_started: Arc::clone(&invocation_started),
        };
        bindings::install_host_api(&lua, &ctx, watchdog)?;

        Ok(Self {
            id,
            lua,
            init_fn: None,
            loop_fn: None,
            handlers,
            invocation_started,
            registries,
        })
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    /// Applies the host's dataplane binder to this VM.
    pub fn bind(&self, binder: &crate::DataplaneBinder) -> Result<(), ScriptError> {
        binder(&self.lua).map_err(ScriptError::from)
    }

    /// Reads, compiles and executes a script file, then resolves its
    /// entry points.
    pub fn load_and_execute_file(&mut self, path: &Path) -> Result<(), ScriptError> {
        let source = std::fs::read_to_string(path)
            .map_err(|_| ScriptError::ScriptNotFound(path.display().to_string()))?;
        self.load_and_execute(&source, &path.display().to_string())
    }

    /// Compiles and executes a script from a memory buffer, then
    /// resolves its entry points.
    pub fn load_and_execute_buffer(&mut self, source: &str) -> Result<(), ScriptError> {
        self.load_and_execute(source, "buffer")
    }

    fn load_and_execute(&mut self, source: &str, chunk_name: &str) -> Result<(), ScriptError> {
        self.arm_watchdog();
        self.lua
            .load(source)
            .set_name(chunk_name)
            .exec()
            .map_err(|e| ScriptError::InvalidScript(e.to_string()))?;

        self.init_fn = self.resolve_entry_point("init")?;
        self.loop_fn = self.resolve_entry_point("loop")?;
        Ok(())
    }

    /// Looks up a global entry point. Absent is fine; present but not a
    /// function is a load failure.
    fn resolve_entry_point(&self, name: &str) -> Result<Option<RegistryKey>, ScriptError> {
        match self.lua.globals().get::<Value>(name)? {
            Value::Nil => Ok(None),
            Value::Function(func) => Ok(Some(self.lua.create_registry_value(func)?)),
            other => Err(ScriptError::InvalidScript(format!(
                "global '{name}' is not a function (got {})",
                other.type_name()
            ))),
        }
    }

    /// Runs `init` once, if the script defines it.
    pub fn run_init(&self) -> Result<(), ScriptError> {
        let Some(key) = &self.init_fn else {
            return Ok(());
        };
        let func: Function = self.lua.registry_value(key)?;
        self.arm_watchdog();
        func.call::<()>(())
            .map_err(|e| ScriptError::InitFailed(e.to_string()))
    }

    /// Runs `loop` once, if the script defines it.
    pub fn run_loop_fn(&self) -> Result<(), ScriptError> {
        let Some(key) = &self.loop_fn else {
            return Ok(());
        };
        let func: Function = self.lua.registry_value(key)?;
        self.arm_watchdog();
        func.call::<()>(()).map_err(ScriptError::from)
    }

    /// Drains this script's pending callbacks.
    ///
    /// Events first, FIFO, handler invoked with the event ID; an event
    /// with no handler is dropped with a log line. Then elapsed timers:
    /// an edge leaves the pending list only after its handler returns
    /// successfully, so an edge without a handler waits for one. Any
    /// handler failure aborts the drain and the executor evicts the
    /// script.
    pub fn handle_callbacks(&self) -> Result<(), ScriptError> {
        // Events published to this script while it is draining (e.g. to
        // itself from a handler) are serviced in the same pass.
        loop {
            let event = {
                let mut reg = lock(&self.registries);
                reg.mailboxes
                    .get_mut(&self.id)
                    .and_then(|mb| mb.pending_events.pop_front())
            };
            let Some(event) = event else { break };

            match self.event_handler(event)? {
                Some(func) => {
                    self.arm_watchdog();
                    func.call::<()>(event.index() as i64)?;
                }
                None => tracing::info!("event but no callback... id:{event}"),
            }
        }

        let mut cursor = 0;
        loop {
            let timer = {
                let reg = lock(&self.registries);
                reg.mailboxes
                    .get(&self.id)
                    .and_then(|mb| mb.elapsed_timers.get(cursor).copied())
            };
            let Some(timer) = timer else { break };

            match self.timer_handler(timer)? {
                Some(func) => {
                    self.arm_watchdog();
                    func.call::<()>(timer.index() as i64)?;
                    // The handler may have consumed edges itself through
                    // timer.is_elapsed; remove this one if still present.
                    let mut reg = lock(&self.registries);
                    if let Some(mailbox) = reg.mailboxes.get_mut(&self.id) {
                        if let Some(pos) = mailbox.elapsed_timers.iter().position(|t| *t == timer)
                        {
                            mailbox.elapsed_timers.remove(pos);
                        }
                    }
                }
                None => cursor += 1,
            }
        }
        Ok(())
    }

    fn event_handler(&self, id: EventId) -> Result<Option<Function>, ScriptError> {
        let handlers = lock(&self.handlers);
        handlers
            .event_handlers
            .get(&id)
            .map(|key| self.lua.registry_value(key))
            .transpose()
            .map_err(ScriptError::from)
    }

    fn timer_handler(&self, id: TimerId) -> Result<Option<Function>, ScriptError> {
        let handlers = lock(&self.handlers);
        handlers
            .timer_handlers
            .get(&id)
            .map(|key| self.lua.registry_value(key))
            .transpose()
            .map_err(ScriptError::from)
    }

    fn arm_watchdog(&self) {
        *lock(&self.invocation_started) = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registries::{Mailbox, Registries};

    fn new_script(id: u64) -> ScriptInstance {
        let registries: SharedRegistries = Arc::new(Mutex::new(Registries::default()));
        new_script_with(id, &registries)
    }

    fn new_script_with(id: u64, registries: &SharedRegistries) -> ScriptInstance {
        let id = ScriptId::from_raw(id);
        lock(registries).mailboxes.insert(id, Mailbox::default());
        ScriptInstance::new(id, Arc::clone(registries), &WatchdogConfig::default())
            .expect("fresh script VM")
    }

    #[test]
    fn load_resolves_both_entry_points() {
        let mut script = new_script(1);
        script
            .load_and_execute_buffer("function init() end\nfunction loop() end")
            .expect("load");
        assert!(script.init_fn.is_some());
        assert!(script.loop_fn.is_some());
    }

    #[test]
    fn entry_points_are_optional() {
        let mut script = new_script(1);
        script
            .load_and_execute_buffer("x = 1")
            .expect("script with no entry points loads");
        assert!(script.init_fn.is_none());
        assert!(script.loop_fn.is_none());
        script.run_init().expect("no-op init");
        script.run_loop_fn().expect("no-op loop");
    }

    #[test]
    fn non_function_entry_point_rejected() {
        let mut script = new_script(1);
        let err = script.load_and_execute_buffer("loop = 42").unwrap_err();
        assert!(matches!(err, ScriptError::InvalidScript(_)), "{err}");
        assert!(err.to_string().contains("'loop' is not a function"));
    }

    #[test]
    fn syntax_error_rejected() {
        let mut script = new_script(1);
        let err = script
            .load_and_execute_buffer("function init( end")
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidScript(_)), "{err}");
    }

    #[test]
    fn top_level_runtime_error_rejected() {
        let mut script = new_script(1);
        let err = script
            .load_and_execute_buffer("error('boom at top level')")
            .unwrap_err();
        assert!(err.to_string().contains("boom at top level"), "{err}");
    }

    #[test]
    fn init_failure_is_reported() {
        let mut script = new_script(1);
        script
            .load_and_execute_buffer("function init() error('no') end")
            .expect("load");
        let err = script.run_init().unwrap_err();
        assert!(matches!(err, ScriptError::InitFailed(_)), "{err}");
    }

    #[test]
    fn event_drain_is_fifo_and_drops_unhandled() {
        let registries: SharedRegistries = Arc::new(Mutex::new(Registries::default()));
        let mut script = new_script_with(1, &registries);
        script
            .load_and_execute_buffer(
                r#"
                order = {}
                local a = event.open("a")
                local b = event.open("b")
                event.subscribe(a, function(id) order[#order + 1] = id end)
                event.subscribe(b, function(id) order[#order + 1] = id end)
                "#,
            )
            .expect("load");

        {
            let mut reg = lock(&registries);
            let (a, b, unhandled) = (
                EventId::from_index(0),
                EventId::from_index(1),
                reg.events.open("nobody-listens"),
            );
            let mailbox = reg.mailboxes.get_mut(&script.id()).expect("mailbox");
            mailbox.pending_events.extend([b, unhandled, a, b]);
        }

        script.handle_callbacks().expect("drain");

        let order: Vec<i64> = script
            .lua
            .load("return order")
            .eval::<Vec<i64>>()
            .expect("order table");
        assert_eq!(order, vec![1, 0, 1], "FIFO order, unhandled dropped");
        assert!(
            lock(&registries).mailboxes[&script.id()]
                .pending_events
                .is_empty()
        );
    }

    #[test]
    fn timer_edge_waits_for_handler() {
        let registries: SharedRegistries = Arc::new(Mutex::new(Registries::default()));
        let mut script = new_script_with(1, &registries);
        script
            .load_and_execute_buffer("hits = 0")
            .expect("load");

        let timer = lock(&registries).timers.create_private();
        lock(&registries)
            .mailboxes
            .get_mut(&script.id())
            .expect("mailbox")
            .elapsed_timers
            .push(timer);

        // No handler yet: the edge must stay pending.
        script.handle_callbacks().expect("drain");
        assert_eq!(
            lock(&registries).mailboxes[&script.id()].elapsed_timers,
            vec![timer]
        );

        script
            .lua
            .load(format!(
                "timer.subscribe({}, function(id) hits = hits + 1 end)",
                timer.index()
            ))
            .exec()
            .expect("subscribe");

        script.handle_callbacks().expect("drain");
        let hits: i64 = script.lua.load("return hits").eval().expect("hits");
        assert_eq!(hits, 1);
        assert!(
            lock(&registries).mailboxes[&script.id()]
                .elapsed_timers
                .is_empty(),
            "edge consumed by the successful handler call"
        );
    }

    #[test]
    fn handler_failure_surfaces() {
        let registries: SharedRegistries = Arc::new(Mutex::new(Registries::default()));
        let mut script = new_script_with(1, &registries);
        script
            .load_and_execute_buffer(
                r#"
                local id = event.open("boom")
                event.subscribe(id, function(id) error("handler down") end)
                "#,
            )
            .expect("load");

        lock(&registries)
            .mailboxes
            .get_mut(&script.id())
            .expect("mailbox")
            .pending_events
            .push_back(EventId::from_index(0));

        let err = script.handle_callbacks().unwrap_err();
        assert!(err.to_string().contains("handler down"), "{err}");
    }

    #[test]
    fn eternal_top_level_is_timed_out() {
        let mut script = new_script(1);
        let err = script
            .load_and_execute_buffer("while true do end")
            .unwrap_err();
        assert!(err.to_string().contains("timeout: at"), "{err}");
    }
}
