//! Restart and schema log recovery

use crate::common::*;
use ferrule::{DropPolicy, FunctionKey, SCHEMA_LOG_FILE};
use std::fs::OpenOptions;
use std::io::Write;

fn avg_state_type() -> CqlType {
    CqlType::tuple(vec![CqlType::bigint(), CqlType::bigint()])
}

fn define_average(t: &TestService) {
    t.create(lua_fn(
        "avg_state",
        &[("s", avg_state_type()), ("v", CqlType::int())],
        avg_state_type(),
        "return {s[1] + v, s[2] + 1}",
    ));
    t.create(lua_fn(
        "avg_final",
        &[("s", avg_state_type())],
        CqlType::bigint(),
        "if s[2] == 0 then return nil end return s[1] // s[2]",
    ));
    t.create_aggregate(
        ADMIN,
        aggregate(
            "my_avg",
            &[CqlType::int()],
            "avg_state",
            avg_state_type(),
            Some("avg_final"),
            Value::Tuple(vec![Value::Bigint(0), Value::Bigint(0)]),
        ),
        CreateMode::Create,
    )
    .expect("Failed to create aggregate");
}

fn powers_of_ten() -> Vec<Vec<Value>> {
    (0..8).map(|e| vec![Value::Int(10i32.pow(e))]).collect()
}

#[test]
fn aggregate_survives_restart() {
    let mut t = TestService::new();
    define_average(&t);
    let state_key = FunctionKey::new(FunctionName::new(KS, "avg_state"), &[avg_state_type(), CqlType::int()]);
    let before = t.registry().resolve_function(&state_key).unwrap().definition.clone();

    t.reopen();

    let after = t.registry().resolve_function(&state_key).unwrap().definition.clone();
    assert_eq!(before, after);
    assert_eq!(t.registry().len(), 3);
    assert_eq!(
        t.aggregate(ADMIN, KS, "my_avg", &[CqlType::int()], powers_of_ten())
            .unwrap(),
        Value::Bigint(1388888)
    );
    assert_eq!(
        t.aggregate(ADMIN, KS, "my_avg", &[CqlType::int()], Vec::new())
            .unwrap(),
        Value::Null
    );
}

#[test]
fn drops_survive_restart() {
    let mut t = TestService::new();
    define_average(&t);
    t.create(lua_fn("gone", &[("x", CqlType::int())], CqlType::int(), "return x"));
    t.drop_aggregate(ADMIN, KS, "my_avg", None, false).unwrap();
    t.drop_function(ADMIN, KS, "gone", None, false).unwrap();

    t.reopen();

    assert_eq!(t.registry().len(), 2);
    assert!(matches!(
        t.call("gone", &[CqlType::int()], vec![Value::Int(1)]),
        Err(Error::NotFound { .. })
    ));
    // The state function is no longer held by an aggregate
    t.drop_function(ADMIN, KS, "avg_state", None, false).unwrap();
}

#[test]
fn replaced_body_survives_restart() {
    let mut t = TestService::new();
    t.create(lua_fn("v", &[], CqlType::int(), "return 1"));
    t.create_function(
        ADMIN,
        lua_fn("v", &[], CqlType::int(), "return 2"),
        CreateMode::CreateOrReplace,
    )
    .unwrap();

    t.reopen();
    assert_eq!(t.call("v", &[], vec![]).unwrap(), Value::Int(2));
}

#[test]
fn torn_tail_is_discarded() {
    let mut t = TestService::new();
    t.create(lua_fn("one", &[], CqlType::int(), "return 1"));
    t.create(lua_fn("two", &[], CqlType::int(), "return 2"));

    // A crash halfway through appending a record leaves a short length-prefixed tail
    let log = t.dir.path().join(SCHEMA_LOG_FILE);
    let mut file = OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(&[200, 0, 0, 0, 1, 0x92]).unwrap();
    drop(file);
    let torn_len = std::fs::metadata(&log).unwrap().len();

    t.reopen();
    assert_eq!(t.call("one", &[], vec![]).unwrap(), Value::Int(1));
    assert_eq!(t.call("two", &[], vec![]).unwrap(), Value::Int(2));
    assert_eq!(std::fs::metadata(&log).unwrap().len(), torn_len - 6);

    // The log keeps working after recovery
    t.create(lua_fn("three", &[], CqlType::int(), "return 3"));
    t.reopen();
    assert_eq!(t.registry().len(), 3);
}

#[test]
fn partially_written_last_record_is_lost_alone() {
    let mut t = TestService::new();
    t.create(lua_fn("kept", &[], CqlType::int(), "return 1"));
    let log = t.dir.path().join(SCHEMA_LOG_FILE);
    let kept_len = std::fs::metadata(&log).unwrap().len();
    t.create(lua_fn("lost", &[], CqlType::int(), "return 2"));

    let full_len = std::fs::metadata(&log).unwrap().len();
    let file = OpenOptions::new().write(true).open(&log).unwrap();
    file.set_len(full_len - 3).unwrap();
    drop(file);

    t.reopen();
    assert_eq!(t.call("kept", &[], vec![]).unwrap(), Value::Int(1));
    assert!(matches!(t.call("lost", &[], vec![]), Err(Error::NotFound { .. })));
    assert_eq!(std::fs::metadata(&log).unwrap().len(), kept_len);
}

#[test]
fn config_is_read_back_on_open() {
    let config = EngineConfig {
        drop_policy: "cascade".to_string(),
        ..EngineConfig::default()
    };
    let mut t = TestService::with_config(config);
    t.reopen();
    assert_eq!(t.drop_policy(), DropPolicy::Cascade);

    define_average(&t);
    let dropped = t
        .drop_function(ADMIN, KS, "avg_final", None, false)
        .unwrap()
        .unwrap();
    assert_eq!(dropped.cascaded.len(), 1);

    t.reopen();
    assert_eq!(t.registry().len(), 1);
}
