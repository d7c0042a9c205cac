//! Ferrule - sandboxed user-defined functions for CQL-compatible databases
//!
//! Ferrule stores, verifies and runs user-defined functions (UDFs) and
//! aggregates (UDAs) written in Lua or WebAssembly text.
//!
//! # Quick Start
//!
//! ```ignore
//! use ferrule::{CqlType, CreateMode, FunctionDefinition, FunctionName, FunctionService,
//!               GrantTable, Language, NullPolicy, Value};
//!
//! let service = FunctionService::open("/path/to/data", GrantTable::new().with_superuser("admin"))?;
//! service.create_function("admin", FunctionDefinition {
//!     name: FunctionName::new("ks", "twice"),
//!     arg_names: vec!["x".into()],
//!     arg_types: vec![CqlType::int()],
//!     return_type: CqlType::int(),
//!     null_policy: NullPolicy::ReturnsNullOnNull,
//!     language: Language::Lua,
//!     body: "return x * 2".into(),
//! }, CreateMode::Create)?;
//!
//! let out = service.execute("admin", "ks", "twice", &[CqlType::int()], vec![Value::Int(21)])?;
//! ```
//!
//! # Architecture
//!
//! All statements go through the [`FunctionService`], which checks
//! permissions, persists definitions and runs bodies in the sandbox. The
//! lower layers are re-exported for callers that need them directly.

pub use ferrule_core::{
    AggregateDefinition, CqlType, Error, FunctionDefinition, FunctionKey, FunctionName, Language,
    NativeType, NullPolicy, Result, RoutineKind, SchemaEntry, SchemaKey, UserType, Value,
};
pub use ferrule_durability::{FileMetadataStore, InMemoryMetadataStore, MetadataStore, SCHEMA_LOG_FILE};
pub use ferrule_engine::{
    AggregateDriver, AggregatePhase, CreateMode, CreateOutcome, DropPolicy, EngineConfig,
    FunctionRegistry, FunctionService, Invoker, Routine,
};
pub use ferrule_sandbox::{PreparedFunction, Sandbox, SandboxLimits};
pub use ferrule_security::{FunctionResource, GrantTable, Permission, PermissionCache, PermissionGate};
pub use ferrule_verifier::{ModuleImage, Verifier, Violations};

/// Wire codec and column storage contract
pub use ferrule_marshal as marshal;
