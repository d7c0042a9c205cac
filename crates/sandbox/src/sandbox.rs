//! Sandbox facade
//!
//! Owns one runtime per enabled language, the verifier, and the limits.
//! `prepare` takes a definition through validate, lower, verify and
//! compile; `execute` runs a prepared function in a fresh
//! [`ExecutionContext`].

use crate::context::ExecutionContext;
use crate::limits::SandboxLimits;
use crate::lua::LuaRuntime;
use crate::runtime::{CompiledBody, Runtime};
use crate::wasm::WasmRuntime;
use ferrule_core::{Error, FunctionDefinition, Language, Result, Value};
use ferrule_verifier::Verifier;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// A verified, compiled function ready to run
#[derive(Debug, Clone)]
pub struct PreparedFunction {
    /// The definition it was built from
    pub definition: Arc<FunctionDefinition>,
    /// Compiled body
    pub body: CompiledBody,
}

/// Execution sandbox
pub struct Sandbox {
    runtimes: HashMap<Language, Arc<dyn Runtime>>,
    verifier: Verifier,
    limits: SandboxLimits,
}

impl std::fmt::Debug for Sandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut languages: Vec<&str> = self.runtimes.keys().map(|l| l.as_str()).collect();
        languages.sort_unstable();
        f.debug_struct("Sandbox")
            .field("languages", &languages)
            .field("limits", &self.limits)
            .finish()
    }
}

impl Sandbox {
    /// Build a sandbox with one runtime per language in `languages`
    ///
    /// `disallowed` adds call prefixes on top of each runtime's own list.
    ///
    /// # Errors
    ///
    /// Fails if a runtime cannot start (e.g. the Wasm engine).
    pub fn new<I, S>(languages: &[Language], limits: SandboxLimits, disallowed: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut runtimes: HashMap<Language, Arc<dyn Runtime>> = HashMap::new();
        for language in languages {
            let runtime: Arc<dyn Runtime> = match language {
                Language::Lua => Arc::new(LuaRuntime::new(limits.clone())),
                Language::Wasm => Arc::new(WasmRuntime::new(limits.clone())?),
            };
            runtimes.insert(*language, runtime);
        }
        Ok(Self {
            runtimes,
            verifier: Verifier::new(disallowed),
            limits,
        })
    }

    /// Replace or add the runtime for its language
    pub fn with_runtime(mut self, runtime: Arc<dyn Runtime>) -> Self {
        self.runtimes.insert(runtime.language(), runtime);
        self
    }

    /// Limits applied to every invocation
    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Runtime for `language`
    ///
    /// # Errors
    ///
    /// `InvalidDefinition` when the language is not enabled.
    pub fn runtime(&self, language: Language) -> Result<&Arc<dyn Runtime>> {
        self.runtimes.get(&language).ok_or_else(|| {
            Error::invalid_definition(language.as_str(), "language is not enabled")
        })
    }

    /// Validate, verify and compile a definition
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` / `FrozenSignatureViolation` from validation
    /// - `VerificationFailure` listing every violation
    /// - `CompilationFailure` from the runtime
    pub fn prepare(&self, def: &FunctionDefinition) -> Result<PreparedFunction> {
        def.validate()?;
        let runtime = self.runtime(def.language)?;
        let image = runtime.lower(def)?;
        self.verifier
            .extended(runtime.disallowed_packages().iter().copied())
            .check(def.language.display_name(), &image)?;
        let body = runtime.compile(def)?;
        debug!(
            target: "ferrule::sandbox",
            function = %def.key(),
            language = def.language.as_str(),
            "Prepared function"
        );
        Ok(PreparedFunction {
            definition: Arc::new(def.clone()),
            body,
        })
    }

    /// Run a prepared function with decoded arguments
    ///
    /// No NULL policy is applied here; see the engine's invoker.
    ///
    /// # Errors
    ///
    /// `ExecutionFault`, `ExecutionTimeout`, or `TypeMismatch` for a result
    /// that does not fit the return type.
    pub fn execute(&self, prepared: &PreparedFunction, args: Vec<Value>) -> Result<Value> {
        let def = &prepared.definition;
        let runtime = self.runtime(def.language)?;
        let outcome = ExecutionContext::new(prepared, self.limits.timeout)
            .bind(args)?
            .run(|args, deadline| runtime.invoke(&prepared.body, def, args, deadline));
        trace!(
            target: "ferrule::sandbox",
            function = %def.key(),
            state = ?outcome.state,
            "Invocation finished"
        );
        outcome.into_result()
    }
}
