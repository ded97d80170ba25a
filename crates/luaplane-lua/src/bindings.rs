//! Sandboxed Lua VM construction and the host API visible to scripts.
//!
//! Each script gets a fresh VM with a curated stdlib (base, package,
//! coroutine, table, string, math — no `os`, `io`, `debug` or `utf8`)
//! and `require` stripped of every search path, so loading any module
//! outside the preloaded whitelist fails at compile-and-run time.
//!
//! # Host globals
//!
//! | Global | Description |
//! |--------|-------------|
//! | `LOG(level, ...)` | Log via `tracing`; args tab-joined. `DEBUG`/`INFO`/`WARNING`/`ERROR` level constants. |
//! | `now()` | Wall-clock milliseconds since the Unix epoch. |
//! | `sleep2(ms)` | Cooperative sleep; yields from the current coroutine until the deadline. |
//! | `event.*` | `open`, `subscribe`, `publish`, `name`, `create_periodic`. |
//! | `timer.*` | `open`, `subscribe`, `elapse_after`, `stop`, `is_elapsed`, `is_active`, `remaining`, `name`. |
//! | `asleep(ms)`, `await(status)` | Prelude helpers defined in Lua. |
//!
//! # Watchdog
//!
//! An instruction-count hook is installed on every VM. Each time it
//! fires it compares the wall time since the anchor the executor resets
//! before every host-initiated invocation against the configured budget,
//! and past the budget it injects `timeout: at <file>:<line>` as a Lua
//! error. It cannot preempt a blocking host binding; bindings stay
//! short.

use crate::registries::{lock, Registries, SharedRegistries};
use crate::script::ScriptHandlers;
use luaplane_core::{EventId, RegistryError, ScriptId, TimerId};
use mlua::{
    Function, HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value, VmState,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Runtime bounds applied to every host-initiated script invocation.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// Wall-clock ceiling for a single invocation.
    pub budget: Duration,
    /// Lua instructions between hook checks.
    pub instruction_interval: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(10),
            instruction_interval: 100_000,
        }
    }
}

/// Everything a binding closure needs to act on behalf of one script.
pub(crate) struct BindingCtx {
    /// The script these bindings belong to.
    pub script: ScriptId,
    /// Registries shared with the executor and all other scripts.
    pub registries: SharedRegistries,
    /// This script's callback tables.
    pub handlers: Arc<Mutex<ScriptHandlers>>,
    /// Watchdog anchor; reset by the executor at every call site.
    pub invocation_started: Arc<Mutex<Instant>>,
}

/// Script-side helpers installed into every fresh VM.
///
/// `sleep2` captures its deadline and yields from the calling coroutine
/// until the host clock passes it, so calling it from the main chunk is
/// an error. `asleep` is the busy-yield variant; `await` retries a false
/// status after a 100 ms nap.
const PRELUDE: &str = r#"
function sleep2(milliseconds)
    local deadline = now() + milliseconds
    while now() < deadline do
        coroutine.yield()
    end
end

function asleep(milliseconds)
    local t1 = now() + milliseconds
    while now() < t1 do
        coroutine.yield()
    end
end

function await(status)
    if status == false then
        asleep(100)
    end
    return status
end
"#;

/// Creates a fresh VM with the curated stdlib and no module search
/// paths.
pub(crate) fn create_sandboxed_vm() -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::PACKAGE | StdLib::COROUTINE | StdLib::TABLE | StdLib::STRING | StdLib::MATH,
        LuaOptions::default(),
    )?;
    seal_module_paths(&lua)?;
    Ok(lua)
}

/// Empties `package.path`, `package.cpath` and the searcher list.
///
/// The preloaded stdlib stays reachable through `package.loaded`;
/// anything else (`require("socket")`, ...) fails with "module not
/// found".
fn seal_module_paths(lua: &Lua) -> mlua::Result<()> {
    let Ok(package) = lua.globals().get::<Table>("package") else {
        tracing::warn!("Lua VM missing package table, skipping require setup");
        return Ok(());
    };
    package.set("path", "")?;
    package.set("cpath", "")?;
    package.set("searchers", lua.create_table()?)?;
    Ok(())
}

/// Registers the host API, arms the watchdog hook and runs the prelude.
pub(crate) fn install_host_api(
    lua: &Lua,
    ctx: &BindingCtx,
    watchdog: &WatchdogConfig,
) -> mlua::Result<()> {
    register_log(lua)?;
    register_now(lua)?;
    register_event_api(lua, ctx)?;
    register_timer_api(lua, ctx)?;
    install_watchdog(lua, ctx, watchdog);

    *lock(&ctx.invocation_started) = Instant::now();
    lua.load(PRELUDE).set_name("prelude").exec()
}

/// Log level constants mirrored into Lua, then `LOG` itself.
///
/// `DEBUG` is `-1` and is mapped to `INFO` host-side.
fn register_log(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    globals.set("DEBUG", -1)?;
    globals.set("INFO", 0)?;
    globals.set("WARNING", 1)?;
    globals.set("ERROR", 2)?;

    let log_fn = lua.create_function(|_, args: MultiValue| {
        if args.len() < 2 {
            return Err(mlua::Error::RuntimeError(
                "expected at least 2 arguments (log level and message)".into(),
            ));
        }
        let mut args = args.into_iter();
        let level = match args.next() {
            Some(Value::Integer(n)) => n,
            Some(Value::Number(n)) => n as i64,
            _ => {
                return Err(mlua::Error::RuntimeError(
                    "log level must be an integer".into(),
                ))
            }
        };
        let message = args.map(|v| display_value(&v)).collect::<Vec<_>>().join("\t");
        match level {
            1 => tracing::warn!("[lua] {message}"),
            2 => tracing::error!("[lua] {message}"),
            // DEBUG (-1) deliberately logs as info on the host
            _ => tracing::info!("[lua] {message}"),
        }
        Ok(())
    })?;
    globals.set("LOG", log_fn)
}

fn register_now(lua: &Lua) -> mlua::Result<()> {
    let now_fn = lua.create_function(|_, ()| Ok(wall_clock_ms()))?;
    lua.globals().set("now", now_fn)
}

/// Wall-clock milliseconds since the Unix epoch.
fn wall_clock_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn register_event_api(lua: &Lua, ctx: &BindingCtx) -> mlua::Result<()> {
    let event = lua.create_table()?;

    let registries = Arc::clone(&ctx.registries);
    event.set(
        "open",
        lua.create_function(move |_, name: String| {
            let id = lock(&registries).events.open(&name);
            Ok(id.index() as i64)
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    event.set(
        "create_periodic",
        lua.create_function(move |_, (name, period_ms): (String, i64)| {
            let period = duration_from_ms(period_ms)?;
            let id = lock(&registries)
                .events
                .create_periodic(&name, period)
                .map_err(registry_error)?;
            Ok(id.index() as i64)
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    let handlers = Arc::clone(&ctx.handlers);
    let script = ctx.script;
    event.set(
        "subscribe",
        lua.create_function(move |lua, (raw, callback): (i64, Function)| {
            let key = lua.create_registry_value(callback)?;
            let mut reg = lock(&registries);
            let id = check_event_id(raw, &reg)?;
            lock(&handlers).event_handlers.insert(id, key);
            reg.subs.add_event_subscription(id, script);
            Ok(())
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    event.set(
        "publish",
        lua.create_function(move |_, raw: i64| {
            let mut reg = lock(&registries);
            let id = check_event_id(raw, &reg)?;
            reg.publish(id);
            Ok(())
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    event.set(
        "name",
        lua.create_function(move |_, raw: i64| {
            let reg = lock(&registries);
            let id = check_event_id(raw, &reg)?;
            let name = reg.events.name(id).map_err(registry_error)?;
            Ok(name.to_string())
        })?,
    )?;

    lua.globals().set("event", event)
}

fn register_timer_api(lua: &Lua, ctx: &BindingCtx) -> mlua::Result<()> {
    let timer = lua.create_table()?;

    let registries = Arc::clone(&ctx.registries);
    let script = ctx.script;
    timer.set(
        "open",
        lua.create_function(move |_, name: Option<String>| {
            let mut reg = lock(&registries);
            let id = match name.as_deref() {
                Some(name) if !name.is_empty() => reg.timers.find_or_create_sharable(name),
                _ => reg.timers.create_private(),
            };
            reg.subs.add_timer_subscription(id, script);
            Ok(id.index() as i64)
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    let handlers = Arc::clone(&ctx.handlers);
    timer.set(
        "subscribe",
        lua.create_function(move |lua, (raw, callback): (i64, Function)| {
            let key = lua.create_registry_value(callback)?;
            let reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            lock(&handlers).timer_handlers.insert(id, key);
            Ok(())
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    timer.set(
        "elapse_after",
        lua.create_function(move |_, (raw, duration_ms): (i64, i64)| {
            let duration = duration_from_ms(duration_ms)?;
            let mut reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            reg.timers.elapse_after(id, duration).map_err(registry_error)
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    timer.set(
        "stop",
        lua.create_function(move |_, raw: i64| {
            let mut reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            reg.timers.stop(id).map_err(registry_error)
        })?,
    )?;

    // Consuming check: a hit removes the edge from the pending list.
    let registries = Arc::clone(&ctx.registries);
    let script = ctx.script;
    timer.set(
        "is_elapsed",
        lua.create_function(move |_, raw: i64| {
            let Ok(index) = usize::try_from(raw) else {
                return Ok(false);
            };
            let id = TimerId::from_index(index);
            let mut reg = lock(&registries);
            let Some(mailbox) = reg.mailboxes.get_mut(&script) else {
                return Ok(false);
            };
            match mailbox.elapsed_timers.iter().position(|t| *t == id) {
                Some(pos) => {
                    mailbox.elapsed_timers.remove(pos);
                    Ok(true)
                }
                None => Ok(false),
            }
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    timer.set(
        "is_active",
        lua.create_function(move |_, raw: i64| {
            let reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            reg.timers.is_active(id).map_err(registry_error)
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    timer.set(
        "remaining",
        lua.create_function(move |_, raw: i64| {
            let reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            let remaining = reg.timers.remaining(id).map_err(registry_error)?;
            Ok(i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX))
        })?,
    )?;

    let registries = Arc::clone(&ctx.registries);
    timer.set(
        "name",
        lua.create_function(move |_, raw: i64| {
            let reg = lock(&registries);
            let id = check_timer_id(raw, &reg)?;
            let name = reg.timers.name(id).map_err(registry_error)?;
            Ok(name.to_string())
        })?,
    )?;

    lua.globals().set("timer", timer)
}

/// Arms the instruction-count watchdog on the VM.
///
/// The hook is installed once; coroutines created by the script inherit
/// it. Arming per invocation is done by resetting the anchor, not by
/// reinstalling the hook.
fn install_watchdog(lua: &Lua, ctx: &BindingCtx, watchdog: &WatchdogConfig) {
    let started = Arc::clone(&ctx.invocation_started);
    let budget = watchdog.budget;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(watchdog.instruction_interval),
        move |_lua, debug| {
            let began = *lock(&started);
            if began.elapsed() > budget {
                tracing::warn!("script takes too long - injecting timeout error...");
                let source = debug.source();
                let src = source.short_src.as_deref().unwrap_or("?");
                return Err(mlua::Error::RuntimeError(format!(
                    "timeout: at {src}:{line}",
                    line = debug.curr_line()
                )));
            }
            Ok(VmState::Continue)
        },
    );
}

/// Range-checks a script-supplied event ID.
fn check_event_id(raw: i64, reg: &Registries) -> mlua::Result<EventId> {
    usize::try_from(raw)
        .ok()
        .map(EventId::from_index)
        .filter(|id| reg.events.contains(*id))
        .ok_or_else(|| mlua::Error::RuntimeError(format!("event {raw} not found")))
}

/// Range-checks a script-supplied timer ID.
fn check_timer_id(raw: i64, reg: &Registries) -> mlua::Result<TimerId> {
    usize::try_from(raw)
        .ok()
        .map(TimerId::from_index)
        .filter(|id| id.index() < reg.timers.len())
        .ok_or_else(|| mlua::Error::RuntimeError(format!("timer {raw} not found")))
}

fn duration_from_ms(ms: i64) -> mlua::Result<Duration> {
    u64::try_from(ms)
        .map(Duration::from_millis)
        .map_err(|_| mlua::Error::RuntimeError("duration must be non-negative".into()))
}

/// Maps a registry failure onto a script-visible error.
///
/// Range failures keep their plain message; failures surfaced from a
/// caught host condition are wrapped in the `exception '..'` shape.
fn registry_error(err: RegistryError) -> mlua::Error {
    match err {
        RegistryError::AlreadyDefined(_) => {
            mlua::Error::RuntimeError(format!("exception '{err}'"))
        }
        RegistryError::UnknownEvent(_) | RegistryError::UnknownTimer(_) => {
            mlua::Error::RuntimeError(err.to_string())
        }
    }
}

/// Renders a Lua value the way `print` would.
fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => format!("{n}"),
        Value::String(s) => s
            .to_str()
            .map_or_else(|_| "<invalid utf8>".into(), |s| s.to_string()),
        Value::Table(_) => format!("table: {value:p}"),
        Value::Function(_) => format!("function: {value:p}"),
        _ => format!("{value:?}"),
    }
}
