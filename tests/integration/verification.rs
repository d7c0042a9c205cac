//! CREATE-time verification

use crate::common::*;

#[test]
fn os_execute_rejected_at_create() {
    let t = TestService::new();
    let def = lua_fn(
        "evil",
        &[("x", CqlType::int())],
        CqlType::int(),
        "os.execute('rm -rf /') return x",
    );
    let err = t
        .create_function(ADMIN, def, CreateMode::Create)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Lua UDF validation failed: [call to os.execute()]"
    );
    assert!(t.registry().is_empty());
}

#[test]
fn every_violation_is_reported() {
    let t = TestService::new();
    let body = r#"
        counter = x + 1
        limit = 10
        function helper() return 2 end
        io.write('x')
        local f = debug.getinfo
        return x + helper()
    "#;
    let err = t
        .create_function(
            ADMIN,
            lua_fn("noisy", &[("x", CqlType::int())], CqlType::int(), body),
            CreateMode::Create,
        )
        .unwrap_err();
    match err {
        Error::VerificationFailure {
            language,
            violations,
        } => {
            assert_eq!(language, "Lua");
            let mut sorted = violations.clone();
            sorted.sort();
            assert_eq!(violations, sorted);
            for expected in [
                "call to debug.getinfo()",
                "call to io.write()",
                "class declared as inner class",
                "field declared: counter",
                "field declared: limit",
                "initializer declared",
            ] {
                assert!(violations.iter().any(|v| v == expected), "{:?}", violations);
            }
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
}

#[test]
fn loaders_and_package_are_rejected() {
    let t = TestService::new();
    for body in [
        "local m = require('socket') return x",
        "return load('return 1')() + x",
        "package.path = '' return x",
        "return string.dump(tostring) and x",
    ] {
        let def = lua_fn("f", &[("x", CqlType::int())], CqlType::int(), body);
        assert!(
            matches!(
                t.create_function(ADMIN, def, CreateMode::Create),
                Err(Error::VerificationFailure { .. })
            ),
            "accepted: {}",
            body
        );
    }
}

#[test]
fn configured_prefix_is_rejected() {
    let mut config = EngineConfig::default();
    config.sandbox.disallowed_prefixes = vec!["string.rep".to_string()];
    let t = TestService::with_config(config);

    let def = lua_fn(
        "big",
        &[("x", CqlType::text())],
        CqlType::text(),
        "return string.rep(x, 1000000)",
    );
    assert!(matches!(
        t.create_function(ADMIN, def, CreateMode::Create),
        Err(Error::VerificationFailure { .. })
    ));

    let ok = lua_fn(
        "upper",
        &[("x", CqlType::text())],
        CqlType::text(),
        "return string.upper(x)",
    );
    t.create(ok);
}

#[test]
fn wasm_start_and_shared_memory_rejected() {
    let t = TestService::new();
    let start = wasm_fn(
        "boot",
        &[],
        CqlType::int(),
        r#"(func $init)
           (start $init)
           (func (export "boot") (result i64) (i64.const -1))"#,
    );
    let err = t
        .create_function(ADMIN, start, CreateMode::Create)
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Wasm UDF validation failed: [static initializer declared]"
    );

    let shared = FunctionDefinition {
        body: r#"(module
            (memory (export "memory") 1 1 shared)
            (func (export "_scylla_malloc") (param i32) (result i32) (i32.const 0))
            (func (export "wait") (result i64)
                (drop (memory.atomic.wait32 (i32.const 0) (i32.const 0) (i64.const 0)))
                (i64.const -1)))"#
            .to_string(),
        ..wasm_fn("wait", &[], CqlType::int(), "")
    };
    match t.create_function(ADMIN, shared, CreateMode::Create) {
        Err(Error::VerificationFailure { violations, .. }) => {
            assert!(violations.contains(&"use of synchronized".to_string()));
            assert!(violations.contains(&"call to core.Object.wait()".to_string()));
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
}

#[test]
fn wasm_host_imports_rejected() {
    let t = TestService::new();
    let def = FunctionDefinition {
        body: format!(
            r#"(module
                (import "env" "clock" (func $clock (result i64)))
                {}
                (func (export "now") (result i64) (call $clock)))"#,
            WASM_PRELUDE
        ),
        ..wasm_fn("now", &[], CqlType::bigint(), "")
    };
    match t.create_function(ADMIN, def, CreateMode::Create) {
        Err(Error::VerificationFailure { violations, .. }) => {
            assert_eq!(violations, vec!["call to host.env.clock()".to_string()]);
        }
        other => panic!("expected verification failure, got {:?}", other),
    }
}

#[test]
fn frozen_udt_in_signature_rejected() {
    let t = TestService::new();
    let udt = std::sync::Arc::new(UserType::new(
        KS,
        "point",
        vec![("x".to_string(), CqlType::int())],
    ));
    let def = lua_fn(
        "px",
        &[("p", CqlType::udt(udt).frozen())],
        CqlType::int(),
        "return p.x",
    );
    assert!(matches!(
        t.create_function(ADMIN, def, CreateMode::Create),
        Err(Error::FrozenSignatureViolation { .. })
    ));
}
