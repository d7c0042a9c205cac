//! Timeouts and faults in both runtimes

use crate::common::*;
use std::time::{Duration, Instant};

fn fast_timeout() -> TestService {
    let mut config = EngineConfig::default();
    config.sandbox.timeout_ms = 200;
    TestService::with_config(config)
}

fn wasm_identity(t: &TestService) {
    t.create(wasm_fn(
        "echo",
        &[CqlType::text()],
        CqlType::text(),
        r#"(func (export "echo") (param i64) (result i64) (local.get 0))"#,
    ));
}

#[test]
fn wasm_spin_times_out_and_registry_stays_usable() {
    let t = fast_timeout();
    wasm_identity(&t);
    t.create(wasm_fn(
        "spin",
        &[CqlType::int()],
        CqlType::int(),
        r#"(func (export "spin") (param i64) (result i64)
             (loop $forever (br $forever))
             (i64.const -1))"#,
    ));

    let start = Instant::now();
    let err = t
        .call("spin", &[CqlType::int()], vec![Value::Int(1)])
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionTimeout { .. }), "{:?}", err);
    assert!(err.is_execution_error());
    assert!(start.elapsed() < Duration::from_secs(10));

    assert_eq!(
        t.call("echo", &[CqlType::text()], vec![Value::Text("still here".into())])
            .unwrap(),
        Value::Text("still here".into())
    );
    assert_eq!(t.registry().len(), 2);
}

#[test]
fn wasm_trap_is_a_fault() {
    let t = TestService::new();
    wasm_identity(&t);
    t.create(wasm_fn(
        "trap",
        &[CqlType::int()],
        CqlType::int(),
        r#"(func (export "trap") (param i64) (result i64) (unreachable))"#,
    ));

    let err = t
        .call("trap", &[CqlType::int()], vec![Value::Int(1)])
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionFault { .. }), "{:?}", err);
    assert_eq!(
        t.call("echo", &[CqlType::text()], vec![Value::Null]).unwrap(),
        Value::Null
    );
}

#[test]
fn wasm_module_missing_export_fails_to_compile() {
    let t = TestService::new();
    let def = wasm_fn(
        "named",
        &[],
        CqlType::int(),
        r#"(func (export "other") (result i64) (i64.const -1))"#,
    );
    assert!(matches!(
        t.create_function(ADMIN, def, CreateMode::Create),
        Err(Error::CompilationFailure { .. })
    ));
    assert!(t.registry().is_empty());
}

#[test]
fn lua_infinite_loop_times_out() {
    let t = fast_timeout();
    t.create(lua_fn("loop", &[("x", CqlType::int())], CqlType::int(), "while true do end return x"));
    t.create(lua_fn("ok", &[("x", CqlType::int())], CqlType::int(), "return x"));

    let err = t
        .call("loop", &[CqlType::int()], vec![Value::Int(1)])
        .unwrap_err();
    assert!(matches!(err, Error::ExecutionTimeout { .. }), "{:?}", err);
    assert_eq!(t.call("ok", &[CqlType::int()], vec![Value::Int(5)]).unwrap(), Value::Int(5));
}

#[test]
fn lua_error_is_a_fault() {
    let t = TestService::new();
    t.create(lua_fn(
        "boom",
        &[("x", CqlType::int())],
        CqlType::int(),
        "error('bad input: ' .. x)",
    ));
    match t.call("boom", &[CqlType::int()], vec![Value::Int(7)]) {
        Err(Error::ExecutionFault { message, .. }) => assert!(message.contains("bad input: 7")),
        other => panic!("expected fault, got {:?}", other),
    }
}

#[test]
fn lua_globals_do_not_leak_between_calls() {
    let t = TestService::new();
    t.create(lua_fn(
        "count",
        &[("x", CqlType::int())],
        CqlType::int(),
        "local n = rawget(_ENV, 'n') or 0 rawset(_ENV, 'n', n + 1) return n + 1",
    ));
    for _ in 0..3 {
        assert_eq!(t.call("count", &[CqlType::int()], vec![Value::Int(0)]).unwrap(), Value::Int(1));
    }
}

#[test]
fn concurrent_calls_share_the_registry() {
    let t = TestService::new();
    t.create(lua_fn(
        "square",
        &[("x", CqlType::bigint())],
        CqlType::bigint(),
        "return x * x",
    ));
    std::thread::scope(|s| {
        for i in 0..8i64 {
            let t = &t;
            s.spawn(move || {
                for j in 0..20i64 {
                    let v = i * 100 + j;
                    assert_eq!(
                        t.call("square", &[CqlType::bigint()], vec![Value::Bigint(v)])
                            .unwrap(),
                        Value::Bigint(v * v)
                    );
                }
            });
        }
    });
}
