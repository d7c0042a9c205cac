//! The per-language runtime seam
//!
//! A runtime turns a definition into a [`ModuleImage`] for the verifier,
//! compiles it once, and invokes the compiled body with already-decoded
//! argument values. Runtimes hold no per-invocation state.

use crate::limits::Deadline;
use crate::lua::LuaChunk;
use ferrule_core::{FunctionDefinition, Language, Result, Value};
use ferrule_verifier::ModuleImage;

/// Compiled function body, one variant per runtime
#[derive(Clone)]
pub enum CompiledBody {
    /// Syntax-checked Lua chunk
    Lua(LuaChunk),
    /// Compiled WebAssembly module
    Wasm(wasmtime::Module),
}

impl CompiledBody {
    /// Language the body was compiled for
    pub fn language(&self) -> Language {
        match self {
            CompiledBody::Lua(_) => Language::Lua,
            CompiledBody::Wasm(_) => Language::Wasm,
        }
    }
}

impl std::fmt::Debug for CompiledBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompiledBody::Lua(chunk) => f.debug_tuple("Lua").field(&chunk.name()).finish(),
            CompiledBody::Wasm(_) => f.write_str("Wasm(..)"),
        }
    }
}

/// A sandboxed language runtime
pub trait Runtime: Send + Sync {
    /// Language handled by this runtime
    fn language(&self) -> Language;

    /// Call prefixes this runtime never allows, in verifier form
    fn disallowed_packages(&self) -> &[&'static str];

    /// Lower the body to a verifier image
    ///
    /// # Errors
    ///
    /// Returns `CompilationFailure` if the body cannot even be parsed.
    fn lower(&self, def: &FunctionDefinition) -> Result<ModuleImage>;

    /// Compile the body once for repeated invocation
    ///
    /// # Errors
    ///
    /// Returns `CompilationFailure` on syntax errors or a missing entry point.
    fn compile(&self, def: &FunctionDefinition) -> Result<CompiledBody>;

    /// Run the body with bound arguments
    ///
    /// `args` line up with `def.arg_types`; NULL arguments are passed as the
    /// runtime's absent value.
    ///
    /// # Errors
    ///
    /// - `ExecutionFault` for errors raised by the body
    /// - `ExecutionTimeout` once `deadline` or the runtime's own budget is exceeded
    /// - `TypeMismatch` if the returned value does not fit `def.return_type`
    fn invoke(
        &self,
        body: &CompiledBody,
        def: &FunctionDefinition,
        args: &[Value],
        deadline: Deadline,
    ) -> Result<Value>;
}

pub(crate) fn wrong_body(def: &FunctionDefinition, body: &CompiledBody) -> ferrule_core::Error {
    ferrule_core::Error::ExecutionFault {
        function: def.key().to_string(),
        message: format!(
            "{} body handed to the {} runtime",
            body.language().display_name(),
            def.language.display_name()
        ),
    }
}
