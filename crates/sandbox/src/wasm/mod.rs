//! WebAssembly runtime
//!
//! Bodies are WAT text following the calling convention in [`abi`]. The
//! module is compiled once at creation time. Each invocation instantiates
//! it into a fresh store with a memory cap, a fuel budget and an epoch
//! deadline, so no guest state survives between calls.
//!
//! ## Interruption
//!
//! One ticker thread per runtime advances the engine epoch every
//! `wasm_epoch_tick`. A store's epoch deadline is the invocation's
//! remaining wall-clock time in ticks. Fuel bounds pure computation even if
//! the ticker lags.

mod abi;
mod lower;

use crate::limits::{Deadline, SandboxLimits};
use crate::runtime::{wrong_body, CompiledBody, Runtime};
use abi::CallError;
use ferrule_core::{Error, FunctionDefinition, Language, Result, Value};
use ferrule_verifier::ModuleImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};
use wasmtime::{
    Config, Engine, ExternType, Linker, Module, Store, StoreLimits, StoreLimitsBuilder, Trap,
};

/// Call prefixes rejected by the verifier for Wasm bodies
pub(crate) const WASM_DISALLOWED: &[&str] = &["host."];

/// Per-invocation store data
struct StoreState {
    limits: StoreLimits,
}

/// Background thread advancing the engine epoch
struct EpochTicker {
    shutdown_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine, tick: Duration) -> Result<Self> {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown_flag);
        let handle = thread::Builder::new()
            .name("ferrule-epoch".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    thread::sleep(tick);
                    engine.increment_epoch();
                }
            })?;
        Ok(Self {
            shutdown_flag,
            handle: Some(handle),
        })
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            // Ignore join errors (thread might have panicked)
            let _ = handle.join();
        }
    }
}

/// WebAssembly runtime
pub struct WasmRuntime {
    engine: Engine,
    limits: SandboxLimits,
    _ticker: EpochTicker,
}

impl std::fmt::Debug for WasmRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmRuntime")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl WasmRuntime {
    /// Create a runtime enforcing `limits`
    ///
    /// # Errors
    ///
    /// `Config` if the engine cannot be built, `Io` if the ticker thread
    /// cannot be spawned.
    pub fn new(limits: SandboxLimits) -> Result<Self> {
        let mut config = Config::new();
        config.consume_fuel(true);
        config.epoch_interruption(true);
        let engine =
            Engine::new(&config).map_err(|e| Error::Config(format!("wasm engine: {}", e)))?;
        let ticker = EpochTicker::start(engine.clone(), limits.wasm_epoch_tick)?;
        debug!(
            target: "ferrule::sandbox",
            tick_ms = limits.wasm_epoch_tick.as_millis() as u64,
            fuel = limits.wasm_fuel,
            "Wasm runtime started"
        );
        Ok(Self {
            engine,
            limits,
            _ticker: ticker,
        })
    }

    fn epoch_ticks(&self, deadline: &Deadline) -> u64 {
        let tick = self.limits.wasm_epoch_tick.as_nanos().max(1);
        let remaining = deadline.remaining().as_nanos();
        (remaining.div_ceil(tick) as u64).max(1)
    }

    fn classify(&self, def: &FunctionDefinition, deadline: &Deadline, error: CallError) -> Error {
        match error {
            CallError::Value(e) => e,
            CallError::Abi(message) => Error::ExecutionFault {
                function: def.key().to_string(),
                message,
            },
            CallError::Runtime(e) => {
                let interrupted = matches!(
                    e.downcast_ref::<Trap>(),
                    Some(Trap::OutOfFuel) | Some(Trap::Interrupt)
                );
                if interrupted || deadline.expired() {
                    Error::ExecutionTimeout {
                        function: def.key().to_string(),
                        elapsed_ms: deadline.elapsed_ms(),
                    }
                } else {
                    Error::ExecutionFault {
                        function: def.key().to_string(),
                        message: format!("{:#}", e),
                    }
                }
            }
        }
    }
}

impl Runtime for WasmRuntime {
    fn language(&self) -> Language {
        Language::Wasm
    }

    fn disallowed_packages(&self) -> &[&'static str] {
        WASM_DISALLOWED
    }

    fn lower(&self, def: &FunctionDefinition) -> Result<ModuleImage> {
        let bytes = lower::module_bytes(def)?;
        lower::lower(def, &bytes)
    }

    fn compile(&self, def: &FunctionDefinition) -> Result<CompiledBody> {
        let bytes = lower::module_bytes(def)?;
        let module = Module::new(&self.engine, &bytes)
            .map_err(|e| lower::compilation_failure(def, format!("{:#}", e)))?;

        if let Some(import) = module.imports().next() {
            return Err(lower::compilation_failure(
                def,
                format!("unresolvable import {}.{}", import.module(), import.name()),
            ));
        }
        let exported = |name: &str, memory: bool| {
            module.exports().any(|e| {
                e.name() == name
                    && match e.ty() {
                        ExternType::Memory(_) => memory,
                        ExternType::Func(_) => !memory,
                        _ => false,
                    }
            })
        };
        for (name, memory) in [
            (abi::MEMORY_EXPORT, true),
            (abi::MALLOC_EXPORT, false),
            (def.name.name.as_str(), false),
        ] {
            if !exported(name, memory) {
                return Err(lower::compilation_failure(
                    def,
                    format!("module does not export '{}'", name),
                ));
            }
        }
        Ok(CompiledBody::Wasm(module))
    }

    fn invoke(
        &self,
        body: &CompiledBody,
        def: &FunctionDefinition,
        args: &[Value],
        deadline: Deadline,
    ) -> Result<Value> {
        let module = match body {
            CompiledBody::Wasm(module) => module,
            other => return Err(wrong_body(def, other)),
        };

        let state = StoreState {
            limits: StoreLimitsBuilder::new()
                .memory_size(self.limits.memory_limit_bytes)
                .instances(1)
                .build(),
        };
        let mut store = Store::new(&self.engine, state);
        store.limiter(|s| &mut s.limits);
        store
            .set_fuel(self.limits.wasm_fuel)
            .map_err(|e| self.classify(def, &deadline, CallError::Runtime(e)))?;
        store.set_epoch_deadline(self.epoch_ticks(&deadline));

        let linker = Linker::<StoreState>::new(&self.engine);
        let result = linker
            .instantiate(&mut store, module)
            .map_err(CallError::Runtime)
            .and_then(|instance| abi::call(&instance, &mut store, def, args));

        result.map_err(|e| {
            let error = self.classify(def, &deadline, e);
            if let Error::ExecutionTimeout { .. } = error {
                warn!(
                    target: "ferrule::sandbox",
                    function = %def.key(),
                    fuel_left = store.get_fuel().unwrap_or(0),
                    "Wasm invocation interrupted"
                );
            }
            error
        })
    }
}
