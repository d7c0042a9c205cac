//! Execution sandbox for user-defined functions
//!
//! One [`Runtime`] per language (Lua via `mlua`, WebAssembly via
//! `wasmtime`), sharing the verifier and the value codec. Bodies get no
//! ambient capabilities and run under wall-clock, instruction and memory
//! bounds enforced on the host side.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod limits;
pub mod lua;
pub mod runtime;
pub mod sandbox;
pub mod wasm;

pub use context::{ExecutionContext, ExecutionOutcome, ExecutionState};
pub use limits::{Deadline, SandboxLimits};
pub use lua::{LuaChunk, LuaRuntime};
pub use runtime::{CompiledBody, Runtime};
pub use sandbox::{PreparedFunction, Sandbox};
pub use wasm::WasmRuntime;
