//! Lua sandbox for synthesized code
//!
//! The VM starts with only the `string`, `table`, `math` and `utf8`
//! libraries. Host access is a fixed table of bindings: each
//! [`HostBinding`] is installed into the `host` global only when its
//! capability was granted, and every binding reaches the outside world
//! through the invocation's [`ToolExecutionContext`].
//!
//! `pcall`, `xpcall`, `load`, `dofile`, `loadfile` and `collectgarbage` are
//! removed so that the instruction hook's abort cannot be swallowed and no
//! further chunks can be compiled.

use super::template::digest_hex;
use crate::tools::{Capability, CapabilitySet, ToolExecutionContext};
use mlua::{
    HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Table, Value as LuaValue, Variadic,
    VmState,
};
use serde_json::Value;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use tokio::runtime::Handle;

const REMOVED_GLOBALS: &[&str] = &["dofile", "loadfile", "load", "pcall", "xpcall", "collectgarbage"];

const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// A host function that may be injected into the sandbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostBinding {
    Hash,
    JsonEncode,
    JsonDecode,
    RegexMatch,
    Log,
    ReadFile,
    ListDir,
    WriteFile,
    Exec,
}

impl HostBinding {
    pub const ALL: &'static [HostBinding] = &[
        HostBinding::Hash,
        HostBinding::JsonEncode,
        HostBinding::JsonDecode,
        HostBinding::RegexMatch,
        HostBinding::Log,
        HostBinding::ReadFile,
        HostBinding::ListDir,
        HostBinding::WriteFile,
        HostBinding::Exec,
    ];

    /// Name under the `host` table
    pub fn name(&self) -> &'static str {
        match self {
            HostBinding::Hash => "hash",
            HostBinding::JsonEncode => "json_encode",
            HostBinding::JsonDecode => "json_decode",
            HostBinding::RegexMatch => "regex_match",
            HostBinding::Log => "log",
            HostBinding::ReadFile => "read_file",
            HostBinding::ListDir => "list_dir",
            HostBinding::WriteFile => "write_file",
            HostBinding::Exec => "exec",
        }
    }

    /// Capability that unlocks the binding, `None` if always available
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            HostBinding::ReadFile | HostBinding::ListDir => Some(Capability::FileRead),
            HostBinding::WriteFile => Some(Capability::FileWrite),
            HostBinding::Exec => Some(Capability::ProcessSpawn),
            _ => None,
        }
    }

    /// Bindings unlocked by a capability set
    pub fn for_capabilities(granted: &CapabilitySet) -> Vec<HostBinding> {
        Self::ALL
            .iter()
            .copied()
            .filter(|b| b.required_capability().is_none_or(|c| granted.contains(c)))
            .collect()
    }
}

/// Why the VM was stopped from the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AbortReason {
    Deadline,
    Cancelled,
}

/// Shared between the hook, the host bindings and the executor
#[derive(Debug, Clone, Default)]
pub(crate) struct AbortFlag(Arc<AtomicU8>);

impl AbortFlag {
    fn set(&self, reason: AbortReason) {
        let value = match reason {
            AbortReason::Deadline => 1,
            AbortReason::Cancelled => 2,
        };
        let _ = self.0.compare_exchange(0, value, Ordering::SeqCst, Ordering::SeqCst);
    }

    pub(crate) fn reason(&self) -> Option<AbortReason> {
        match self.0.load(Ordering::SeqCst) {
            1 => Some(AbortReason::Deadline),
            2 => Some(AbortReason::Cancelled),
            _ => None,
        }
    }
}

/// Everything the host bindings may touch
pub(crate) struct HostEnv {
    pub tool: String,
    pub ctx: ToolExecutionContext,
    pub handle: Handle,
    pub deadline: Instant,
    pub abort: AbortFlag,
}

impl HostEnv {
    /// Drive an async collaborator call from the blocking sandbox thread
    fn wait<T>(&self, what: &str, future: impl Future<Output = io::Result<T>>) -> mlua::Result<T> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = self.ctx.cancellation.cancelled() => {
                    self.abort.set(AbortReason::Cancelled);
                    Err(mlua::Error::runtime("execution cancelled"))
                }
                result = tokio::time::timeout(remaining, future) => match result {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err(mlua::Error::runtime(format!("{}: {}", what, e))),
                    Err(_) => {
                        self.abort.set(AbortReason::Deadline);
                        Err(mlua::Error::runtime("execution deadline exceeded"))
                    }
                },
            }
        })
    }

    fn resolve(&self, path: &str) -> mlua::Result<std::path::PathBuf> {
        self.ctx
            .resolve_path(path)
            .map_err(|e| mlua::Error::runtime(e.message))
    }
}

/// VM resource limits
#[derive(Debug, Clone, Copy)]
pub(crate) struct VmLimits {
    pub memory_limit_bytes: usize,
    pub instruction_interval: u32,
}

/// Create a VM with `args`, `context` and the `host` table installed
pub(crate) fn create_vm(
    env: Arc<HostEnv>,
    bindings: &[HostBinding],
    args: &Value,
    limits: VmLimits,
) -> mlua::Result<Lua> {
    let lua = Lua::new_with(
        StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
        LuaOptions::new(),
    )?;
    lua.set_memory_limit(limits.memory_limit_bytes)?;

    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.raw_set(*name, LuaValue::Nil)?;
    }

    let tool = env.tool.clone();
    let print = lua.create_function(move |_, values: Variadic<LuaValue>| {
        let line: Vec<String> = values.iter().map(display_value).collect();
        tracing::info!(tool = %tool, "{}", line.join("\t"));
        Ok(())
    })?;
    globals.raw_set("print", print)?;

    globals.raw_set("args", lua.to_value(args)?)?;

    let context = lua.create_table()?;
    context.raw_set("tool", env.tool.as_str())?;
    context.raw_set("session_id", env.ctx.session_id.as_deref())?;
    context.raw_set("run_id", env.ctx.run_id.as_deref())?;
    context.raw_set("trace_id", env.ctx.trace_id.as_deref())?;
    context.raw_set("depth", env.ctx.depth)?;
    globals.raw_set("context", context)?;

    let host = lua.create_table()?;
    for binding in bindings {
        install(&lua, &host, *binding, &env)?;
    }
    globals.raw_set("host", host)?;

    let token = env.ctx.cancellation.clone();
    let abort = env.abort.clone();
    let deadline = env.deadline;
    lua.set_hook(
        HookTriggers::new().every_nth_instruction(limits.instruction_interval.max(1)),
        move |_, _| {
            if token.is_cancelled() {
                abort.set(AbortReason::Cancelled);
                return Err(mlua::Error::runtime("execution cancelled"));
            }
            if Instant::now() >= deadline {
                abort.set(AbortReason::Deadline);
                return Err(mlua::Error::runtime("execution deadline exceeded"));
            }
            Ok(VmState::Continue)
        },
    );

    Ok(lua)
}

fn display_value(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.to_string_lossy().to_string(),
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        other => format!("{:?}", other),
    }
}

fn install(lua: &Lua, host: &Table, binding: HostBinding, env: &Arc<HostEnv>) -> mlua::Result<()> {
    let function = match binding {
        HostBinding::Hash => lua.create_function(|_, (algorithm, input): (String, String)| {
            digest_hex(&algorithm, input.as_bytes()).ok_or_else(|| {
                mlua::Error::runtime(format!("unsupported hash algorithm '{}'", algorithm))
            })
        })?,

        HostBinding::JsonEncode => {
            lua.create_function(|lua, (value, pretty): (LuaValue, Option<bool>)| {
                let json: Value = lua.from_value(value)?;
                let text = if pretty.unwrap_or(false) {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                text.map_err(mlua::Error::external)
            })?
        }

        HostBinding::JsonDecode => lua.create_function(|lua, text: String| {
            let json: Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value(&json)
        })?,

        HostBinding::RegexMatch => {
            lua.create_function(|lua, (pattern, text): (String, String)| {
                let regex = regex::RegexBuilder::new(&pattern)
                    .size_limit(REGEX_SIZE_LIMIT)
                    .build()
                    .map_err(mlua::Error::external)?;
                let Some(captures) = regex.captures(&text) else {
                    return Ok(LuaValue::Nil);
                };
                let groups = lua.create_table()?;
                for (i, group) in captures.iter().enumerate() {
                    groups.raw_set(i + 1, group.map(|m| m.as_str()))?;
                }
                Ok(LuaValue::Table(groups))
            })?
        }

        HostBinding::Log => {
            let tool = env.tool.clone();
            lua.create_function(move |_, message: String| {
                tracing::info!(tool = %tool, "{}", message);
                Ok(())
            })?
        }

        HostBinding::ReadFile => {
            let env = env.clone();
            lua.create_function(move |_, path: String| {
                let resolved = env.resolve(&path)?;
                env.wait(
                    &format!("read_file '{}'", path),
                    env.ctx.file_system.read_to_string(&resolved),
                )
            })?
        }

        HostBinding::ListDir => {
            let env = env.clone();
            lua.create_function(move |lua, path: Option<String>| {
                let path = path.unwrap_or_else(|| ".".to_string());
                let resolved = env.resolve(&path)?;
                let entries = env.wait(
                    &format!("list_dir '{}'", path),
                    env.ctx.file_system.list_dir(&resolved),
                )?;
                lua.to_value(&entries)
            })?
        }

        HostBinding::WriteFile => {
            let env = env.clone();
            lua.create_function(move |_, (path, content): (String, String)| {
                let resolved = env.resolve(&path)?;
                env.wait(
                    &format!("write_file '{}'", path),
                    env.ctx.file_system.write(&resolved, &content),
                )?;
                Ok(content.len())
            })?
        }

        HostBinding::Exec => {
            let env = env.clone();
            lua.create_function(move |lua, (program, argv): (String, Option<Vec<String>>)| {
                let argv = argv.unwrap_or_default();
                let remaining = env.deadline.saturating_duration_since(Instant::now());
                tracing::debug!(tool = %env.tool, %program, ?argv, "sandbox exec");
                let output = env.wait(
                    &format!("exec '{}'", program),
                    env.ctx.terminal.run(&program, &argv, &env.ctx.cwd, remaining),
                )?;
                lua.to_value(&output)
            })?
        }
    };

    host.raw_set(binding.name(), function)
}
