//! Lua 5.4 runtime
//!
//! The body is the text of a function whose parameters are the declared
//! argument names. Every invocation builds a fresh Lua state holding only
//! the `string`, `table`, `math` and `utf8` libraries plus the base
//! functions that cannot load code, collect garbage, print or catch errors.
//! There is no `io`, `os`, `debug`, `package` or `coroutine` table at all.
//!
//! Memory is capped with the state's allocator limit. An instruction-count
//! hook checks the wall-clock deadline and raises an error once it passes;
//! since `pcall` and `xpcall` are absent the error always reaches the host.
//! The string pattern functions run in C below the hook, so they are
//! wrapped to refuse calls whose backtracking could outlast the deadline
//! (see [`pattern`]).

mod convert;
mod lower;
mod pattern;

use crate::limits::{Deadline, SandboxLimits};
use crate::runtime::{wrong_body, CompiledBody, Runtime};
use ferrule_core::{Error, FunctionDefinition, Language, Result, Value};
use ferrule_verifier::ModuleImage;
use mlua::{HookTriggers, Lua, LuaOptions, MultiValue, StdLib, Table, Value as LuaValue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Call prefixes rejected by the verifier for Lua bodies
pub(crate) const LUA_DISALLOWED: &[&str] = &[
    "io.",
    "os.",
    "debug.",
    "package.",
    "coroutine.",
    "string.dump",
    "_G.require",
    "_G.dofile",
    "_G.loadfile",
    "_G.load",
    "_G.collectgarbage",
];

/// Base functions removed from every state
const REMOVED_GLOBALS: &[&str] = &[
    "load",
    "loadfile",
    "dofile",
    "require",
    "collectgarbage",
    "print",
    "pcall",
    "xpcall",
];

/// Replaces the pattern functions of the table passed in with wrappers
/// that consult the guard first. `string.find` in plain mode is exempt.
const GUARD_PATTERNS: &str = r#"
local guard, lib = ...
for _, name in ipairs({ "find", "match", "gmatch", "gsub" }) do
    local original = lib[name]
    lib[name] = function(s, p, ...)
        if not (name == "find" and select(2, ...)) then
            guard(s, p)
        end
        return original(s, p, ...)
    end
end
"#;

/// A syntax-checked Lua function body
#[derive(Debug, Clone)]
pub struct LuaChunk {
    name: String,
    source: String,
}

impl LuaChunk {
    /// Chunk name used in Lua error messages
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lua runtime
#[derive(Debug, Clone)]
pub struct LuaRuntime {
    limits: SandboxLimits,
}

impl LuaRuntime {
    /// Create a runtime enforcing `limits`
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    fn sandboxed_state(&self) -> mlua::Result<Lua> {
        let lua = Lua::new_with(
            StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )?;
        {
            let globals = lua.globals();
            for name in REMOVED_GLOBALS {
                globals.raw_set(*name, mlua::Nil)?;
            }
            let string: Table = globals.raw_get("string")?;
            string.raw_set("dump", mlua::Nil)?;
            guard_patterns(&lua, string)?;
        }
        lua.set_memory_limit(self.limits.memory_limit_bytes)?;
        Ok(lua)
    }
}

fn pattern_bytes(value: &LuaValue<'_>) -> Option<Vec<u8>> {
    match value {
        LuaValue::String(s) => Some(s.as_bytes().to_vec()),
        LuaValue::Integer(i) => Some(i.to_string().into_bytes()),
        LuaValue::Number(n) => Some(n.to_string().into_bytes()),
        _ => None,
    }
}

fn guard_patterns<'lua>(lua: &'lua Lua, string: Table<'lua>) -> mlua::Result<()> {
    let guard = lua.create_function(|_, (subject, pattern): (LuaValue, LuaValue)| {
        let (Some(subject), Some(pattern)) = (pattern_bytes(&subject), pattern_bytes(&pattern))
        else {
            return Ok(());
        };
        let steps = pattern::worst_case_steps(&subject, &pattern);
        if steps > pattern::PATTERN_STEP_BUDGET {
            return Err(mlua::Error::RuntimeError(format!(
                "pattern too complex for a subject of {} bytes",
                subject.len()
            )));
        }
        Ok(())
    })?;
    lua.load(GUARD_PATTERNS)
        .set_name("=pattern_guard")
        .call::<_, ()>((guard, string))
}

fn wrap(def: &FunctionDefinition) -> Result<String> {
    if let Some(bad) = def.arg_names.iter().find(|n| !lower::is_identifier(n)) {
        return Err(Error::CompilationFailure {
            language: Language::Lua.display_name().to_string(),
            function: def.key().to_string(),
            reason: format!("argument name '{}' is not a Lua identifier", bad),
        });
    }
    Ok(format!(
        "return function({})\n{}\nend",
        def.arg_names.join(", "),
        def.body
    ))
}

fn fault(def: &FunctionDefinition, e: mlua::Error) -> Error {
    Error::ExecutionFault {
        function: def.key().to_string(),
        message: e.to_string(),
    }
}

impl Runtime for LuaRuntime {
    fn language(&self) -> Language {
        Language::Lua
    }

    fn disallowed_packages(&self) -> &[&'static str] {
        LUA_DISALLOWED
    }

    fn lower(&self, def: &FunctionDefinition) -> Result<ModuleImage> {
        Ok(lower::lower(def))
    }

    fn compile(&self, def: &FunctionDefinition) -> Result<CompiledBody> {
        let source = wrap(def)?;
        let name = def.key().to_string();
        let lua = Lua::new();
        lua.load(source.as_str())
            .set_name(name.as_str())
            .into_function()
            .map_err(|e| Error::CompilationFailure {
                language: Language::Lua.display_name().to_string(),
                function: name.clone(),
                reason: e.to_string(),
            })?;
        Ok(CompiledBody::Lua(LuaChunk { name, source }))
    }

    fn invoke(
        &self,
        body: &CompiledBody,
        def: &FunctionDefinition,
        args: &[Value],
        deadline: Deadline,
    ) -> Result<Value> {
        let chunk = match body {
            CompiledBody::Lua(chunk) => chunk,
            other => return Err(wrong_body(def, other)),
        };
        let lua = self.sandboxed_state().map_err(|e| fault(def, e))?;

        let timed_out = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&timed_out);
        let triggers = HookTriggers {
            every_nth_instruction: Some(self.limits.lua_hook_interval.max(1)),
            ..Default::default()
        };
        lua.set_hook(triggers, move |_lua, _debug| {
            if deadline.expired() {
                flag.store(true, Ordering::Relaxed);
                Err(mlua::Error::RuntimeError(
                    "execution deadline exceeded".to_string(),
                ))
            } else {
                Ok(())
            }
        });

        let result = run_chunk(&lua, chunk, def, args);
        trace!(
            target: "ferrule::sandbox",
            function = %chunk.name,
            used_memory = lua.used_memory(),
            "Lua invocation finished"
        );
        match result {
            Err(_) if timed_out.load(Ordering::Relaxed) => Err(Error::ExecutionTimeout {
                function: def.key().to_string(),
                elapsed_ms: deadline.elapsed_ms(),
            }),
            other => other,
        }
    }
}

fn run_chunk(lua: &Lua, chunk: &LuaChunk, def: &FunctionDefinition, args: &[Value]) -> Result<Value> {
    let function: mlua::Function = lua
        .load(chunk.source.as_str())
        .set_name(chunk.name.as_str())
        .eval()
        .map_err(|e| fault(def, e))?;
    let params = args
        .iter()
        .map(|arg| convert::to_lua(lua, arg))
        .collect::<mlua::Result<Vec<_>>>()
        .map_err(|e| fault(def, e))?;
    let returned: mlua::Value = function
        .call(MultiValue::from_vec(params))
        .map_err(|e| fault(def, e))?;
    convert::from_lua(returned, &def.return_type)
}
