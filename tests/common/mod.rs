//! Shared test utilities for the integration suite.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Once;
use std::time::{Duration, Instant};

pub use ferrule::{
    AggregateDefinition, CqlType, CreateMode, EngineConfig, Error, FunctionDefinition,
    FunctionName, FunctionResource, FunctionService, GrantTable, Language, NullPolicy, Permission,
    UserType, Value,
};
use tempfile::TempDir;

/// Superuser role every test service is opened with
pub const ADMIN: &str = "cassandra";

/// Keyspace used by all tests
pub const KS: &str = "ks";

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness writer.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

// ============================================================================
// TestService - service in a temporary directory
// ============================================================================

/// A `FunctionService` backed by a schema log in a temp dir.
pub struct TestService {
    pub service: FunctionService,
    pub config: EngineConfig,
    pub dir: TempDir,
}

impl TestService {
    /// Service with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Service with an explicit configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let service = open(dir.path(), config.clone());
        TestService {
            service,
            config,
            dir,
        }
    }

    /// Open the service again from the same directory, reading back
    /// `ferrule.toml` and the schema log.
    pub fn reopen(&mut self) {
        self.service = FunctionService::open(self.dir.path(), grants())
            .expect("Failed to reopen service");
    }

    /// Create a function as the superuser.
    pub fn create(&self, def: FunctionDefinition) {
        self.service
            .create_function(ADMIN, def, CreateMode::Create)
            .expect("Failed to create function");
    }

    /// Call a function as the superuser.
    pub fn call(&self, name: &str, arg_types: &[CqlType], args: Vec<Value>) -> Result<Value, Error> {
        self.service.execute(ADMIN, KS, name, arg_types, args)
    }
}

impl std::ops::Deref for TestService {
    type Target = FunctionService;

    fn deref(&self) -> &FunctionService {
        &self.service
    }
}

/// Grant table with the test superuser.
pub fn grants() -> GrantTable {
    GrantTable::new().with_superuser(ADMIN)
}

fn open(path: &Path, config: EngineConfig) -> FunctionService {
    FunctionService::open_with_config(path, config, grants()).expect("Failed to open service")
}

// ============================================================================
// Definitions
// ============================================================================

/// Lua function in the test keyspace.
pub fn lua_fn(name: &str, args: &[(&str, CqlType)], ret: CqlType, body: &str) -> FunctionDefinition {
    FunctionDefinition {
        name: FunctionName::new(KS, name),
        arg_names: args.iter().map(|(n, _)| n.to_string()).collect(),
        arg_types: args.iter().map(|(_, t)| t.clone()).collect(),
        return_type: ret,
        null_policy: NullPolicy::CalledOnNull,
        language: Language::Lua,
        body: body.to_string(),
    }
}

/// Same as [`lua_fn`] with `RETURNS NULL ON NULL INPUT`.
pub fn lua_strict_fn(
    name: &str,
    args: &[(&str, CqlType)],
    ret: CqlType,
    body: &str,
) -> FunctionDefinition {
    FunctionDefinition {
        null_policy: NullPolicy::ReturnsNullOnNull,
        ..lua_fn(name, args, ret, body)
    }
}

/// Memory export and a bump allocator every Wasm test module needs.
pub const WASM_PRELUDE: &str = r#"
    (memory (export "memory") 1)
    (global $heap (mut i32) (i32.const 1024))
    (func $malloc (export "_scylla_malloc") (param $size i32) (result i32)
        (local $ptr i32)
        (local.set $ptr (global.get $heap))
        (global.set $heap (i32.add (global.get $heap) (local.get $size)))
        (local.get $ptr))
"#;

/// Wasm function whose module is `WASM_PRELUDE` plus `funcs`.
pub fn wasm_fn(name: &str, args: &[CqlType], ret: CqlType, funcs: &str) -> FunctionDefinition {
    FunctionDefinition {
        name: FunctionName::new(KS, name),
        arg_names: (0..args.len()).map(|i| format!("arg{}", i)).collect(),
        arg_types: args.to_vec(),
        return_type: ret,
        null_policy: NullPolicy::CalledOnNull,
        language: Language::Wasm,
        body: format!("(module {} {})", WASM_PRELUDE, funcs),
    }
}

/// Aggregate in the test keyspace.
pub fn aggregate(
    name: &str,
    arg_types: &[CqlType],
    sfunc: &str,
    stype: CqlType,
    finalfunc: Option<&str>,
    initcond: Value,
) -> AggregateDefinition {
    AggregateDefinition {
        name: FunctionName::new(KS, name),
        arg_types: arg_types.to_vec(),
        state_func: sfunc.to_string(),
        state_type: stype,
        final_func: finalfunc.map(str::to_string),
        initcond,
    }
}

// ============================================================================
// Eventual consistency
// ============================================================================

/// Retry `f` until it returns true or `timeout` passes.
pub fn eventually(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    loop {
        if f() {
            return true;
        }
        if start.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}
