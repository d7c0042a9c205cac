//! CQL value ordering
//!
//! Sets and map keys are stored sorted and unique. Runtimes hand back
//! elements in whatever order their own containers produce, so the codec
//! canonicalizes them with [`compare`] before encoding.

use ferrule_core::Value;
use std::cmp::Ordering;

/// Compare two values of the same CQL type
///
/// `Null` sorts first. Floats use IEEE-754 total order. Values of different
/// variants are ordered by variant so the function stays total.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Ascii(x), Value::Ascii(y)) | (Value::Text(x), Value::Text(y)) => {
            x.as_bytes().cmp(y.as_bytes())
        }
        (Value::Blob(x), Value::Blob(y)) => x.cmp(y),
        (Value::Boolean(x), Value::Boolean(y)) => x.cmp(y),
        (Value::Tinyint(x), Value::Tinyint(y)) => x.cmp(y),
        (Value::Smallint(x), Value::Smallint(y)) => x.cmp(y),
        (Value::Int(x), Value::Int(y)) => x.cmp(y),
        (Value::Bigint(x), Value::Bigint(y))
        | (Value::Counter(x), Value::Counter(y))
        | (Value::Timestamp(x), Value::Timestamp(y))
        | (Value::Time(x), Value::Time(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (Value::Float(x), Value::Float(y)) => x.total_cmp(y),
        (Value::Double(x), Value::Double(y)) => x.total_cmp(y),
        (Value::Uuid(x), Value::Uuid(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Value::Timeuuid(x), Value::Timeuuid(y)) => timeuuid_timestamp(x.as_bytes())
            .cmp(&timeuuid_timestamp(y.as_bytes()))
            .then_with(|| x.as_bytes().cmp(y.as_bytes())),
        (Value::Inet(x), Value::Inet(y)) => x.cmp(y),
        (Value::List(x), Value::List(y))
        | (Value::Set(x), Value::Set(y))
        | (Value::Tuple(x), Value::Tuple(y)) => compare_seq(x.iter(), y.iter()),
        (Value::Map(x), Value::Map(y)) => {
            for ((xk, xv), (yk, yv)) in x.iter().zip(y.iter()) {
                let ord = compare(xk, yk).then_with(|| compare(xv, yv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::UserDefined(x), Value::UserDefined(y)) => {
            compare_seq(x.iter().map(|(_, v)| v), y.iter().map(|(_, v)| v))
        }
        _ => rank(a).cmp(&rank(b)),
    }
}

fn compare_seq<'a>(
    mut x: impl Iterator<Item = &'a Value>,
    mut y: impl Iterator<Item = &'a Value>,
) -> Ordering {
    loop {
        match (x.next(), y.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ord = compare(a, b);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// 60-bit RFC 4122 timestamp of a version 1 UUID
fn timeuuid_timestamp(bytes: &[u8; 16]) -> u64 {
    let low = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
    let mid = u16::from_be_bytes([bytes[4], bytes[5]]) as u64;
    let high = (u16::from_be_bytes([bytes[6], bytes[7]]) & 0x0fff) as u64;
    (high << 48) | (mid << 32) | low
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Ascii(_) => 1,
        Value::Text(_) => 2,
        Value::Blob(_) => 3,
        Value::Boolean(_) => 4,
        Value::Tinyint(_) => 5,
        Value::Smallint(_) => 6,
        Value::Int(_) => 7,
        Value::Bigint(_) => 8,
        Value::Counter(_) => 9,
        Value::Float(_) => 10,
        Value::Double(_) => 11,
        Value::Timestamp(_) => 12,
        Value::Date(_) => 13,
        Value::Time(_) => 14,
        Value::Uuid(_) => 15,
        Value::Timeuuid(_) => 16,
        Value::Inet(_) => 17,
        Value::List(_) => 18,
        Value::Set(_) => 19,
        Value::Map(_) => 20,
        Value::Tuple(_) => 21,
        Value::UserDefined(_) => 22,
    }
}

/// Sort and deduplicate set elements
pub fn canonical_set(mut elements: Vec<Value>) -> Vec<Value> {
    elements.sort_by(compare);
    elements.dedup_by(|a, b| compare(a, b) == Ordering::Equal);
    elements
}

/// Sort map entries by key; the last entry wins for duplicate keys
pub fn canonical_map(entries: Vec<(Value, Value)>) -> Vec<(Value, Value)> {
    let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
    for (k, v) in entries {
        match out.binary_search_by(|(existing, _)| compare(existing, &k)) {
            Ok(pos) => out[pos].1 = v,
            Err(pos) => out.insert(pos, (k, v)),
        }
    }
    out
}
