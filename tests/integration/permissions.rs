//! Grants, drops and eventually-consistent revocation

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;

const USER: &str = "alice";
const SETTLE: Duration = Duration::from_secs(3);

/// Service whose permission decisions are cached briefly
fn cached_service() -> TestService {
    let config = EngineConfig {
        permissions_validity_ms: 100,
        ..EngineConfig::default()
    };
    TestService::with_config(config)
}

/// Service that consults the grant table on every check
fn uncached_service() -> TestService {
    let config = EngineConfig {
        permissions_validity_ms: 0,
        ..EngineConfig::default()
    };
    TestService::with_config(config)
}

fn int_fn(name: &str, args: usize) -> FunctionDefinition {
    let params: Vec<(String, CqlType)> = (0..args).map(|i| (format!("a{}", i), CqlType::int())).collect();
    let params: Vec<(&str, CqlType)> = params.iter().map(|(n, t)| (n.as_str(), t.clone())).collect();
    lua_fn(name, &params, CqlType::bigint(), "return 42")
}

#[test]
fn descriptors_round_trip_for_quoted_names() {
    let t = uncached_service();
    let udt = Arc::new(UserType::new(
        KS,
        "we[i]rd^t/y\"pe",
        vec![("f".to_string(), CqlType::int())],
    ));
    let name = "fun[with]^odd/\"chars\"";
    t.create(lua_fn(name, &[("u", CqlType::udt(udt.clone()))], CqlType::int(), "return 1"));

    let resource = FunctionResource::function(KS, name, &[CqlType::udt(udt)]);
    assert_eq!(FunctionResource::from_name(&resource.name()).unwrap(), resource);

    t.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
    let listed = t.list_permissions(Some(USER), Some(Permission::Execute));
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].resource, resource);
    assert_eq!(
        listed[0].resource.to_string(),
        r#"<function ks."fun[with]^odd/""chars"""(frozen<"we[i]rd^t/y""pe">)>"#
    );

    assert!(t.revoke(ADMIN, USER, Permission::Execute, &resource).unwrap());
    assert!(t.list_permissions(Some(USER), None).is_empty());
}

#[test]
fn create_on_function_is_not_applicable() {
    let t = uncached_service();
    t.create(int_fn("f", 1));
    let resource = FunctionResource::function(KS, "f", &[CqlType::int()]);
    assert!(matches!(
        t.grant(ADMIN, USER, Permission::Create, &resource),
        Err(Error::InvalidResource { .. })
    ));
    for permission in [Permission::Alter, Permission::Drop, Permission::Authorize, Permission::Execute] {
        t.grant(ADMIN, USER, permission, &resource).unwrap();
    }
    assert_eq!(t.list_permissions(Some(USER), None).len(), 4);
}

#[test]
fn grant_on_missing_function_fails() {
    let t = uncached_service();
    let resource = FunctionResource::function(KS, "ghost", &[CqlType::int()]);
    assert!(matches!(
        t.grant(ADMIN, USER, Permission::Execute, &resource),
        Err(Error::InvalidResource { .. })
    ));
    t.grant(ADMIN, USER, Permission::Execute, &FunctionResource::All).unwrap();
    t.revoke(ADMIN, USER, Permission::Execute, &FunctionResource::All).unwrap();
}

#[test]
fn drop_of_overloaded_name_needs_a_signature() {
    let t = cached_service();
    t.create(int_fn("fun43", 1));
    t.create(int_fn("fun43", 2));
    let one = [CqlType::int()];
    let two = [CqlType::int(), CqlType::int()];

    t.grant(ADMIN, USER, Permission::Drop, &FunctionResource::function(KS, "fun43", &one))
        .unwrap();
    assert!(matches!(
        t.drop_function(USER, KS, "fun43", None, false),
        Err(Error::AmbiguousSignature { .. })
    ));
    assert!(t
        .drop_function(USER, KS, "fun43", Some(&two), false)
        .unwrap_err()
        .is_permission_error());

    t.grant(ADMIN, USER, Permission::Drop, &FunctionResource::function(KS, "fun43", &two))
        .unwrap();
    assert!(matches!(
        t.drop_function(USER, KS, "fun43", None, false),
        Err(Error::AmbiguousSignature { .. })
    ));
    assert!(eventually(SETTLE, || t
        .drop_function(USER, KS, "fun43", Some(&one), false)
        .is_ok()));
    assert!(eventually(SETTLE, || t
        .drop_function(USER, KS, "fun43", None, false)
        .is_ok()));
    assert!(t.registry().is_empty());
}

#[test]
fn revoked_execute_becomes_unauthorized_eventually() {
    let t = cached_service();
    t.create(int_fn("fun42", 1));
    let resource = FunctionResource::function(KS, "fun42", &[CqlType::int()]);
    let call = || t.execute(USER, KS, "fun42", &[CqlType::int()], vec![Value::Int(1)]);

    t.grant(ADMIN, USER, Permission::Execute, &FunctionResource::Keyspace(KS.to_string()))
        .unwrap();
    assert!(eventually(SETTLE, || call().is_ok()));
    assert_eq!(call().unwrap(), Value::Bigint(42));

    t.revoke(ADMIN, USER, Permission::Execute, &FunctionResource::Keyspace(KS.to_string()))
        .unwrap();
    assert!(eventually(SETTLE, || call()
        .map_err(|e| e.is_permission_error())
        .err()
        .unwrap_or(false)));

    // Function-level grant works the same way
    t.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
    assert!(eventually(SETTLE, || call().is_ok()));
}

#[test]
fn create_or_replace_needs_alter() {
    let t = uncached_service();
    t.grant(ADMIN, USER, Permission::Create, &FunctionResource::All).unwrap();
    assert!(t
        .create_function(USER, int_fn("fun42", 1), CreateMode::CreateOrReplace)
        .unwrap_err()
        .is_permission_error());

    t.grant(ADMIN, USER, Permission::Alter, &FunctionResource::Keyspace(KS.to_string()))
        .unwrap();
    t.create_function(USER, int_fn("fun42", 1), CreateMode::CreateOrReplace)
        .unwrap();
    t.create_function(USER, int_fn("fun42", 1), CreateMode::CreateOrReplace)
        .unwrap();
}

#[test]
fn aggregate_needs_execute_on_itself() {
    let t = uncached_service();
    t.create(lua_fn(
        "acc",
        &[("s", CqlType::bigint()), ("v", CqlType::bigint())],
        CqlType::bigint(),
        "return s + v",
    ));
    t.create_aggregate(
        ADMIN,
        aggregate("sum64", &[CqlType::bigint()], "acc", CqlType::bigint(), None, Value::Bigint(0)),
        CreateMode::Create,
    )
    .unwrap();

    let rows = || (1..=3).map(|v| vec![Value::Bigint(v)]).collect::<Vec<_>>();
    assert!(t
        .aggregate(USER, KS, "sum64", &[CqlType::bigint()], rows())
        .unwrap_err()
        .is_permission_error());

    t.grant(
        ADMIN,
        USER,
        Permission::Execute,
        &FunctionResource::function(KS, "sum64", &[CqlType::bigint()]),
    )
    .unwrap();
    assert_eq!(
        t.aggregate(USER, KS, "sum64", &[CqlType::bigint()], rows()).unwrap(),
        Value::Bigint(6)
    );
}

#[test]
fn dropping_a_function_forgets_its_grants() {
    let t = uncached_service();
    t.create(int_fn("f", 1));
    let resource = FunctionResource::function(KS, "f", &[CqlType::int()]);
    t.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();

    t.drop_function(ADMIN, KS, "f", None, false).unwrap();
    t.create(int_fn("f", 1));
    assert!(t.list_permissions(Some(USER), None).is_empty());
    assert!(t
        .execute(USER, KS, "f", &[CqlType::int()], vec![Value::Int(1)])
        .unwrap_err()
        .is_permission_error());
}

#[test]
fn recreated_function_does_not_inherit_cached_execute() {
    let t = TestService::with_config(EngineConfig {
        permissions_validity_ms: 60_000,
        ..EngineConfig::default()
    });
    t.create(int_fn("f", 1));
    let resource = FunctionResource::function(KS, "f", &[CqlType::int()]);
    let call = || t.execute(USER, KS, "f", &[CqlType::int()], vec![Value::Int(1)]);

    t.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
    assert_eq!(call().unwrap(), Value::Bigint(42));

    t.drop_function(ADMIN, KS, "f", None, false).unwrap();
    t.create(int_fn("f", 1));
    assert!(call().unwrap_err().is_permission_error());

    t.grant(ADMIN, USER, Permission::Execute, &resource).unwrap();
    assert_eq!(call().unwrap(), Value::Bigint(42));
    t.revoke(ADMIN, USER, Permission::Execute, &resource).unwrap();
    assert!(call().unwrap_err().is_permission_error());
}
