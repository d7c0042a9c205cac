//! CQL type model
//!
//! This module defines:
//! - NativeType: the fixed set of scalar CQL types
//! - UserType: a user-defined type (keyspace, name, named fields)
//! - CqlType: native, collection, tuple and user-defined types
//!
//! ## Frozen-ness
//!
//! Collections and user-defined types carry a `frozen` flag. Tuples are
//! always frozen. Function signatures ignore top-level frozen-ness, so
//! `f(frozen<list<int>>)` and `f(list<int>)` name the same overload; see
//! [`CqlType::unfrozen`] and [`CqlType::matches`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Scalar CQL types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum NativeType {
    /// US-ASCII string
    Ascii,
    /// 64-bit signed integer
    Bigint,
    /// Arbitrary bytes
    Blob,
    /// true/false
    Boolean,
    /// 64-bit distributed counter
    Counter,
    /// Days since epoch, unsigned 32-bit with 2^31 as the epoch
    Date,
    /// 64-bit IEEE-754 float
    Double,
    /// 32-bit IEEE-754 float
    Float,
    /// IPv4 or IPv6 address
    Inet,
    /// 32-bit signed integer
    Int,
    /// 16-bit signed integer
    Smallint,
    /// UTF-8 string (alias `varchar`)
    Text,
    /// Nanoseconds since midnight
    Time,
    /// Milliseconds since epoch
    Timestamp,
    /// Version 1 UUID
    Timeuuid,
    /// 8-bit signed integer
    Tinyint,
    /// Any UUID
    Uuid,
}

impl NativeType {
    /// Every native type, in CQL name order
    pub const ALL: [NativeType; 17] = [
        NativeType::Ascii,
        NativeType::Bigint,
        NativeType::Blob,
        NativeType::Boolean,
        NativeType::Counter,
        NativeType::Date,
        NativeType::Double,
        NativeType::Float,
        NativeType::Inet,
        NativeType::Int,
        NativeType::Smallint,
        NativeType::Text,
        NativeType::Time,
        NativeType::Timestamp,
        NativeType::Timeuuid,
        NativeType::Tinyint,
        NativeType::Uuid,
    ];

    /// CQL keyword for this type
    pub fn cql_name(&self) -> &'static str {
        match self {
            NativeType::Ascii => "ascii",
            NativeType::Bigint => "bigint",
            NativeType::Blob => "blob",
            NativeType::Boolean => "boolean",
            NativeType::Counter => "counter",
            NativeType::Date => "date",
            NativeType::Double => "double",
            NativeType::Float => "float",
            NativeType::Inet => "inet",
            NativeType::Int => "int",
            NativeType::Smallint => "smallint",
            NativeType::Text => "text",
            NativeType::Time => "time",
            NativeType::Timestamp => "timestamp",
            NativeType::Timeuuid => "timeuuid",
            NativeType::Tinyint => "tinyint",
            NativeType::Uuid => "uuid",
        }
    }

    /// Parse a CQL keyword (case-insensitive, `varchar` is `text`)
    pub fn from_cql_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower == "varchar" {
            return Some(NativeType::Text);
        }
        Self::ALL.iter().copied().find(|t| t.cql_name() == lower)
    }

    /// Serialized width for fixed-width types, `None` for variable-width ones
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            NativeType::Boolean | NativeType::Tinyint => Some(1),
            NativeType::Smallint => Some(2),
            NativeType::Int | NativeType::Float | NativeType::Date => Some(4),
            NativeType::Bigint
            | NativeType::Counter
            | NativeType::Double
            | NativeType::Time
            | NativeType::Timestamp => Some(8),
            NativeType::Uuid | NativeType::Timeuuid => Some(16),
            NativeType::Ascii | NativeType::Blob | NativeType::Inet | NativeType::Text => None,
        }
    }
}

impl fmt::Display for NativeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cql_name())
    }
}

/// A user-defined type
///
/// Field order is significant: it is the serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserType {
    /// Keyspace the type lives in
    pub keyspace: String,
    /// Type name, case preserved
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<(String, CqlType)>,
}

impl UserType {
    /// Create a new user-defined type
    pub fn new(
        keyspace: impl Into<String>,
        name: impl Into<String>,
        fields: Vec<(String, CqlType)>,
    ) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
            fields,
        }
    }

    /// Look up the type of a field by name
    pub fn field_type(&self, field: &str) -> Option<&CqlType> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }
}

/// A CQL data type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CqlType {
    /// Scalar type
    Native(NativeType),
    /// `list<element>`
    List {
        /// Element type
        element: Box<CqlType>,
        /// Declared `frozen<...>`
        frozen: bool,
    },
    /// `set<element>`
    Set {
        /// Element type
        element: Box<CqlType>,
        /// Declared `frozen<...>`
        frozen: bool,
    },
    /// `map<key, value>`
    Map {
        /// Key type
        key: Box<CqlType>,
        /// Value type
        value: Box<CqlType>,
        /// Declared `frozen<...>`
        frozen: bool,
    },
    /// `tuple<...>`, always frozen
    Tuple(Vec<CqlType>),
    /// Reference to a user-defined type
    UserDefined {
        /// The type definition
        udt: Arc<UserType>,
        /// Declared `frozen<...>`
        frozen: bool,
    },
}

impl CqlType {
    /// Non-frozen `list<element>`
    pub fn list(element: CqlType) -> Self {
        CqlType::List {
            element: Box::new(element),
            frozen: false,
        }
    }

    /// Non-frozen `set<element>`
    pub fn set(element: CqlType) -> Self {
        CqlType::Set {
            element: Box::new(element),
            frozen: false,
        }
    }

    /// Non-frozen `map<key, value>`
    pub fn map(key: CqlType, value: CqlType) -> Self {
        CqlType::Map {
            key: Box::new(key),
            value: Box::new(value),
            frozen: false,
        }
    }

    /// `tuple<elements...>`
    pub fn tuple(elements: Vec<CqlType>) -> Self {
        CqlType::Tuple(elements)
    }

    /// Non-frozen reference to a user-defined type
    pub fn udt(udt: Arc<UserType>) -> Self {
        CqlType::UserDefined { udt, frozen: false }
    }

    /// Same type wrapped in `frozen<...>`
    ///
    /// Native types and tuples are returned unchanged.
    pub fn frozen(self) -> Self {
        self.with_frozen(true)
    }

    /// Same type with top-level frozen-ness stripped
    pub fn unfrozen(&self) -> Self {
        self.clone().with_frozen(false)
    }

    fn with_frozen(self, flag: bool) -> Self {
        match self {
            CqlType::List { element, .. } => CqlType::List {
                element,
                frozen: flag,
            },
            CqlType::Set { element, .. } => CqlType::Set {
                element,
                frozen: flag,
            },
            CqlType::Map { key, value, .. } => CqlType::Map {
                key,
                value,
                frozen: flag,
            },
            CqlType::UserDefined { udt, .. } => CqlType::UserDefined { udt, frozen: flag },
            other => other,
        }
    }

    /// True when the value is stored as a single opaque cell
    pub fn is_frozen(&self) -> bool {
        match self {
            CqlType::Native(_) | CqlType::Tuple(_) => true,
            CqlType::List { frozen, .. }
            | CqlType::Set { frozen, .. }
            | CqlType::Map { frozen, .. }
            | CqlType::UserDefined { frozen, .. } => *frozen,
        }
    }

    /// True for list, set and map types
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            CqlType::List { .. } | CqlType::Set { .. } | CqlType::Map { .. }
        )
    }

    /// True for a collection declared without `frozen`
    ///
    /// Such columns cannot hold an empty collection: empty is stored as NULL.
    pub fn is_multi_cell_collection(&self) -> bool {
        self.is_collection() && !self.is_frozen()
    }

    /// True for a user-defined type reference
    pub fn is_user_defined(&self) -> bool {
        matches!(self, CqlType::UserDefined { .. })
    }

    /// Equality modulo top-level frozen-ness
    pub fn matches(&self, other: &CqlType) -> bool {
        self.unfrozen() == other.unfrozen()
    }

    /// Shorthand for `CqlType::Native(NativeType::Int)`
    pub fn int() -> Self {
        CqlType::Native(NativeType::Int)
    }

    /// Shorthand for `CqlType::Native(NativeType::Bigint)`
    pub fn bigint() -> Self {
        CqlType::Native(NativeType::Bigint)
    }

    /// Shorthand for `CqlType::Native(NativeType::Text)`
    pub fn text() -> Self {
        CqlType::Native(NativeType::Text)
    }

    /// Shorthand for `CqlType::Native(NativeType::Double)`
    pub fn double() -> Self {
        CqlType::Native(NativeType::Double)
    }

    /// Shorthand for `CqlType::Native(NativeType::Boolean)`
    pub fn boolean() -> Self {
        CqlType::Native(NativeType::Boolean)
    }
}

impl From<NativeType> for CqlType {
    fn from(t: NativeType) -> Self {
        CqlType::Native(t)
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (inner, frozen) = match self {
            CqlType::Native(n) => return write!(f, "{}", n),
            CqlType::Tuple(elements) => {
                f.write_str("tuple<")?;
                write_list(f, elements)?;
                return f.write_str(">");
            }
            CqlType::List { element, frozen } => (format!("list<{}>", element), *frozen),
            CqlType::Set { element, frozen } => (format!("set<{}>", element), *frozen),
            CqlType::Map { key, value, frozen } => {
                (format!("map<{}, {}>", key, value), *frozen)
            }
            CqlType::UserDefined { udt, frozen } => (quote_identifier(&udt.name), *frozen),
        };
        if frozen {
            write!(f, "frozen<{}>", inner)
        } else {
            f.write_str(&inner)
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, types: &[CqlType]) -> fmt::Result {
    for (i, ty) in types.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", ty)?;
    }
    Ok(())
}

/// Quote a CQL identifier when it is not a plain lower-case identifier
///
/// Embedded double quotes are doubled.
///
/// # Example
///
/// ```
/// use ferrule_core::types::quote_identifier;
///
/// assert_eq!(quote_identifier("plain_name"), "plain_name");
/// assert_eq!(quote_identifier("Mixed"), "\"Mixed\"");
/// assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase())
        .unwrap_or(false)
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}
