//! Marshaling, NULL policy and frozen collections

use crate::common::*;
use ferrule::marshal;
use std::sync::Arc;

#[test]
fn returns_null_on_null_input() {
    let t = TestService::new();
    t.create(lua_strict_fn(
        "inc",
        &[("x", CqlType::int())],
        CqlType::int(),
        "return x + 1",
    ));
    assert_eq!(t.call("inc", &[CqlType::int()], vec![Value::Int(41)]).unwrap(), Value::Int(42));
    assert_eq!(t.call("inc", &[CqlType::int()], vec![Value::Null]).unwrap(), Value::Null);
}

#[test]
fn called_on_null_input_sees_nil() {
    let t = TestService::new();
    t.create(lua_fn(
        "is_null",
        &[("x", CqlType::int())],
        CqlType::boolean(),
        "return x == nil",
    ));
    assert_eq!(
        t.call("is_null", &[CqlType::int()], vec![Value::Null]).unwrap(),
        Value::Boolean(true)
    );
    assert_eq!(
        t.call("is_null", &[CqlType::int()], vec![Value::Int(0)]).unwrap(),
        Value::Boolean(false)
    );
}

#[test]
fn frozen_and_non_frozen_collections_see_empty_differently() {
    let t = TestService::new();
    let body = "if l == nil then return -1 end return #l";
    t.create(lua_fn(
        "len_plain",
        &[("l", CqlType::list(CqlType::int()))],
        CqlType::int(),
        body,
    ));
    t.create(lua_fn(
        "len_frozen",
        &[("l", CqlType::list(CqlType::int()).frozen())],
        CqlType::int(),
        body,
    ));

    let empty = vec![Value::List(vec![])];
    assert_eq!(
        t.call("len_plain", &[CqlType::list(CqlType::int())], empty.clone()).unwrap(),
        Value::Int(-1)
    );
    // Signature lookup ignores top-level frozen-ness
    assert_eq!(
        t.call("len_frozen", &[CqlType::list(CqlType::int())], empty).unwrap(),
        Value::Int(0)
    );
    let three = vec![Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)])];
    assert_eq!(
        t.call("len_plain", &[CqlType::list(CqlType::int())], three).unwrap(),
        Value::Int(3)
    );
}

#[test]
fn frozen_and_plain_signatures_collide() {
    let t = TestService::new();
    t.create(lua_fn(
        "f",
        &[("s", CqlType::set(CqlType::int()).frozen())],
        CqlType::int(),
        "return 1",
    ));
    let plain = lua_fn("f", &[("s", CqlType::set(CqlType::int()))], CqlType::int(), "return 2");
    assert!(matches!(
        t.create_function(ADMIN, plain, CreateMode::Create),
        Err(Error::AlreadyExists { .. })
    ));
}

#[test]
fn empty_non_frozen_return_is_null() {
    let t = TestService::new();
    t.create(lua_fn(
        "nothing",
        &[("x", CqlType::int())],
        CqlType::map(CqlType::text(), CqlType::int()),
        "return {}",
    ));
    t.create(lua_fn(
        "nothing_frozen",
        &[("x", CqlType::int())],
        CqlType::map(CqlType::text(), CqlType::int()).frozen(),
        "return {}",
    ));
    assert_eq!(t.call("nothing", &[CqlType::int()], vec![Value::Int(1)]).unwrap(), Value::Null);
    assert_eq!(
        t.call("nothing_frozen", &[CqlType::int()], vec![Value::Int(1)]).unwrap(),
        Value::Map(vec![])
    );
}

#[test]
fn set_results_are_ordered_and_unique() {
    let t = TestService::new();
    t.create(lua_fn(
        "digits",
        &[("l", CqlType::list(CqlType::int()))],
        CqlType::set(CqlType::int()),
        "local out = {} for _, v in ipairs(l) do out[v % 10] = true end return out",
    ));
    let input = [13, 2, 33, 7, 2].iter().map(|v| Value::Int(*v)).collect();
    assert_eq!(
        t.call("digits", &[CqlType::list(CqlType::int())], vec![Value::List(input)])
            .unwrap(),
        Value::Set(vec![Value::Int(2), Value::Int(3), Value::Int(7)])
    );
}

#[test]
fn map_argument_round_trip() {
    let t = TestService::new();
    let ty = CqlType::map(CqlType::text(), CqlType::bigint());
    t.create(lua_fn(
        "total",
        &[("m", ty.clone())],
        CqlType::bigint(),
        "local s = 0 for _, v in pairs(m) do s = s + v end return s",
    ));
    let m = Value::Map(vec![
        (Value::Text("a".into()), Value::Bigint(40)),
        (Value::Text("b".into()), Value::Bigint(2)),
    ]);
    assert_eq!(t.call("total", &[ty], vec![m]).unwrap(), Value::Bigint(42));
}

#[test]
fn user_defined_type_argument() {
    let t = TestService::new();
    let point = Arc::new(UserType::new(
        KS,
        "point",
        vec![("x".to_string(), CqlType::int()), ("y".to_string(), CqlType::int())],
    ));
    let ty = CqlType::udt(point);
    t.create(lua_fn("norm1", &[("p", ty.clone())], CqlType::int(), "return math.abs(p.x) + math.abs(p.y)"));
    let p = Value::UserDefined(vec![
        ("x".to_string(), Value::Int(-3)),
        ("y".to_string(), Value::Int(4)),
    ]);
    assert_eq!(t.call("norm1", &[ty], vec![p]).unwrap(), Value::Int(7));
}

#[test]
fn serialized_calls_use_the_wire_format() {
    let t = TestService::new();
    let ty = CqlType::list(CqlType::text());
    t.create(lua_fn(
        "shout",
        &[("l", ty.clone())],
        ty.clone(),
        "local out = {} for i, v in ipairs(l) do out[i] = string.upper(v) end return out",
    ));

    let arg = marshal::encode(
        &Value::List(vec![Value::Text("a".into()), Value::Text("b".into())]),
        &ty,
    )
    .unwrap();
    let out = t
        .execute_serialized(ADMIN, KS, "shout", &[ty.clone()], vec![arg])
        .unwrap();
    assert_eq!(
        marshal::decode(out.as_deref(), &ty).unwrap(),
        Value::List(vec![Value::Text("A".into()), Value::Text("B".into())])
    );

    // An empty non-frozen list is a missing cell both ways
    let empty = t
        .execute_serialized(ADMIN, KS, "shout", &[ty], vec![None])
        .unwrap();
    assert_eq!(empty, None);
}

#[test]
fn wrong_argument_type_is_rejected() {
    let t = TestService::new();
    t.create(lua_fn("id", &[("x", CqlType::int())], CqlType::int(), "return x"));
    assert!(t
        .call("id", &[CqlType::int()], vec![Value::Text("seven".into())])
        .is_err());
    assert!(matches!(
        t.call("id", &[CqlType::text()], vec![Value::Text("seven".into())]),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn wrong_return_type_is_a_mismatch() {
    let t = TestService::new();
    t.create(lua_fn("bad", &[("x", CqlType::int())], CqlType::int(), "return 'text'"));
    let err = t.call("bad", &[CqlType::int()], vec![Value::Int(1)]).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. } | Error::Marshal { .. }), "{:?}", err);
}

mod props {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn lua_text_list_passes_through_unchanged(
            items in proptest::collection::vec("[a-z ]{0,12}", 1..8)
        ) {
            let t = TestService::new();
            let ty = CqlType::list(CqlType::text()).frozen();
            t.create(lua_fn("echo", &[("x", ty.clone())], ty.clone(), "return x"));
            let value = Value::List(items.into_iter().map(Value::Text).collect());
            prop_assert_eq!(t.call("echo", &[ty], vec![value.clone()]).unwrap(), value);
        }

        #[test]
        fn lua_bigint_arithmetic_matches_rust(a in -(1i64 << 40)..(1i64 << 40), b in -(1i64 << 40)..(1i64 << 40)) {
            let t = TestService::new();
            t.create(lua_fn(
                "mix",
                &[("a", CqlType::bigint()), ("b", CqlType::bigint())],
                CqlType::bigint(),
                "return a * 3 - b",
            ));
            prop_assert_eq!(
                t.call("mix", &[CqlType::bigint(), CqlType::bigint()], vec![Value::Bigint(a), Value::Bigint(b)])
                    .unwrap(),
                Value::Bigint(a * 3 - b)
            );
        }
    }
}
