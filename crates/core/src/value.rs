//! Runtime-neutral values
//!
//! `Value` is what the marshaling layer decodes CQL cells into and what the
//! runtimes convert to and from their own value models.
//!
//! ## Null vs empty
//!
//! An empty collection (`List(vec![])`) is a value, distinct from `Null`.
//! Whether a column can actually hold an empty collection depends on its
//! type; see `ferrule_marshal::column`.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A CQL value
///
/// Float equality follows IEEE-754 (`NaN != NaN`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    Null,
    /// `ascii`
    Ascii(String),
    /// `text` / `varchar`
    Text(String),
    /// `blob`
    Blob(Vec<u8>),
    /// `boolean`
    Boolean(bool),
    /// `tinyint`
    Tinyint(i8),
    /// `smallint`
    Smallint(i16),
    /// `int`
    Int(i32),
    /// `bigint`
    Bigint(i64),
    /// `counter`
    Counter(i64),
    /// `float`
    Float(f32),
    /// `double`
    Double(f64),
    /// `timestamp`, milliseconds since epoch
    Timestamp(i64),
    /// `date`, days with 2^31 as the epoch
    Date(u32),
    /// `time`, nanoseconds since midnight
    Time(i64),
    /// `uuid`
    Uuid(Uuid),
    /// `timeuuid`
    Timeuuid(Uuid),
    /// `inet`
    Inet(IpAddr),
    /// `list<T>`
    List(Vec<Value>),
    /// `set<T>`, sorted and unique once it has passed through the codec
    Set(Vec<Value>),
    /// `map<K, V>`, key-ordered pairs
    Map(Vec<(Value, Value)>),
    /// `tuple<...>`, components may be `Null`
    Tuple(Vec<Value>),
    /// User-defined type instance, fields in declaration order
    UserDefined(Vec<(String, Value)>),
}

impl Value {
    /// Name of the variant, used in type mismatch errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Ascii(_) => "ascii",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Boolean(_) => "boolean",
            Value::Tinyint(_) => "tinyint",
            Value::Smallint(_) => "smallint",
            Value::Int(_) => "int",
            Value::Bigint(_) => "bigint",
            Value::Counter(_) => "counter",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Uuid(_) => "uuid",
            Value::Timeuuid(_) => "timeuuid",
            Value::Inet(_) => "inet",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Tuple(_) => "tuple",
            Value::UserDefined(_) => "user type",
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// True for a list, set or map with no elements
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Value::List(v) | Value::Set(v) => v.is_empty(),
            Value::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    /// Widen any integer variant to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Tinyint(v) => Some(*v as i64),
            Value::Smallint(v) => Some(*v as i64),
            Value::Int(v) => Some(*v as i64),
            Value::Bigint(v) | Value::Counter(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string slice for ascii/text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) | Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Bigint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}
