//! Function and aggregate definitions
//!
//! This module defines:
//! - FunctionName: keyspace-qualified routine name
//! - Signature: argument types with top-level frozen-ness stripped
//! - FunctionKey: (name, signature), the identity of a function or aggregate
//! - FunctionDefinition / AggregateDefinition: the schema objects
//! - SchemaEntry / SchemaKey: what the metadata store persists

use crate::error::{Error, Result};
use crate::types::{quote_identifier, CqlType};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Keyspace-qualified routine name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct FunctionName {
    /// Owning keyspace
    pub keyspace: String,
    /// Routine name, case preserved
    pub name: String,
}

impl FunctionName {
    /// Create a new function name
    pub fn new(keyspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            keyspace: keyspace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_identifier(&self.keyspace),
            quote_identifier(&self.name)
        )
    }
}

/// Ordered argument types identifying an overload
///
/// Top-level frozen-ness is stripped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(Vec<CqlType>);

impl Signature {
    /// Build a signature from declared argument types
    pub fn new(types: &[CqlType]) -> Self {
        Self(types.iter().map(CqlType::unfrozen).collect())
    }

    /// Argument types
    pub fn types(&self) -> &[CqlType] {
        &self.0
    }

    /// Number of arguments
    pub fn arity(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, ty) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", ty)?;
        }
        f.write_str(")")
    }
}

/// Identity of a function or aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionKey {
    /// Qualified name
    pub name: FunctionName,
    /// Argument types
    pub signature: Signature,
}

impl FunctionKey {
    /// Create a key from a name and declared argument types
    pub fn new(name: FunctionName, arg_types: &[CqlType]) -> Self {
        Self {
            name,
            signature: Signature::new(arg_types),
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name, self.signature)
    }
}

/// Behaviour when any argument is NULL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullPolicy {
    /// The body runs and receives the runtime's absent value
    CalledOnNull,
    /// The result is NULL and the body does not run
    ReturnsNullOnNull,
}

/// Body language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum Language {
    /// Lua 5.4 source text
    Lua,
    /// WebAssembly text format
    Wasm,
}

impl Language {
    /// Lower-case name used in `LANGUAGE` clauses and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Lua => "lua",
            Language::Wasm => "wasm",
        }
    }

    /// Capitalized name used in verifier messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Lua => "Lua",
            Language::Wasm => "Wasm",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lua" => Ok(Language::Lua),
            "wasm" | "xwasm" => Ok(Language::Wasm),
            other => Err(Error::Config(format!("unsupported language '{}'", other))),
        }
    }
}

/// A user-defined scalar function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Qualified name
    pub name: FunctionName,
    /// Parameter names, one per argument type
    pub arg_names: Vec<String>,
    /// Declared argument types (frozen-ness preserved)
    pub arg_types: Vec<CqlType>,
    /// Declared return type
    pub return_type: CqlType,
    /// NULL argument handling
    pub null_policy: NullPolicy,
    /// Body language
    pub language: Language,
    /// Body source
    pub body: String,
}

impl FunctionDefinition {
    /// Identity of this function
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.name.clone(), &self.arg_types)
    }

    /// Argument signature with frozen-ness stripped
    pub fn signature(&self) -> Signature {
        Signature::new(&self.arg_types)
    }

    /// Check structural rules that do not depend on the registry
    ///
    /// # Errors
    ///
    /// - `InvalidDefinition` if names are empty, duplicated, or do not line up with types
    /// - `FrozenSignatureViolation` if a user-defined argument or return type is frozen
    pub fn validate(&self) -> Result<()> {
        if self.name.name.is_empty() || self.name.keyspace.is_empty() {
            return Err(Error::invalid_definition(
                &self.name,
                "keyspace and name must not be empty",
            ));
        }
        if self.arg_names.len() != self.arg_types.len() {
            return Err(Error::invalid_definition(
                &self.name,
                format!(
                    "{} argument names for {} argument types",
                    self.arg_names.len(),
                    self.arg_types.len()
                ),
            ));
        }
        let mut seen = HashSet::new();
        for arg in &self.arg_names {
            if !seen.insert(arg.as_str()) {
                return Err(Error::invalid_definition(
                    &self.name,
                    format!("duplicate argument name {}", arg),
                ));
            }
        }
        for (arg, ty) in self.arg_names.iter().zip(&self.arg_types) {
            if ty.is_user_defined() && ty.is_frozen() {
                return Err(Error::FrozenSignatureViolation {
                    function: self.name.to_string(),
                    position: arg.clone(),
                    type_name: ty.to_string(),
                });
            }
        }
        if self.return_type.is_user_defined() && self.return_type.is_frozen() {
            return Err(Error::FrozenSignatureViolation {
                function: self.name.to_string(),
                position: "return".to_string(),
                type_name: self.return_type.to_string(),
            });
        }
        Ok(())
    }
}

/// A user-defined aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDefinition {
    /// Qualified name
    pub name: FunctionName,
    /// Input argument types, one per aggregated column
    pub arg_types: Vec<CqlType>,
    /// State function name, same keyspace
    pub state_func: String,
    /// State type
    pub state_type: CqlType,
    /// Optional final function name, same keyspace
    pub final_func: Option<String>,
    /// Initial state, may be `Null`
    pub initcond: Value,
}

impl AggregateDefinition {
    /// Identity of this aggregate
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(self.name.clone(), &self.arg_types)
    }

    /// Key of the state function: `(keyspace, sfunc, [STYPE] ++ args)`
    pub fn state_function_key(&self) -> FunctionKey {
        let mut types = Vec::with_capacity(self.arg_types.len() + 1);
        types.push(self.state_type.clone());
        types.extend(self.arg_types.iter().cloned());
        FunctionKey::new(
            FunctionName::new(self.name.keyspace.clone(), self.state_func.clone()),
            &types,
        )
    }

    /// Key of the final function, if any: `(keyspace, finalfunc, [STYPE])`
    pub fn final_function_key(&self) -> Option<FunctionKey> {
        self.final_func.as_ref().map(|ff| {
            FunctionKey::new(
                FunctionName::new(self.name.keyspace.clone(), ff.clone()),
                std::slice::from_ref(&self.state_type),
            )
        })
    }

    /// True when `key` is this aggregate's state or final function
    pub fn depends_on(&self, key: &FunctionKey) -> bool {
        self.state_function_key() == *key || self.final_function_key().as_ref() == Some(key)
    }
}

/// Kind of schema object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutineKind {
    /// Scalar function
    Function,
    /// Aggregate
    Aggregate,
}

impl RoutineKind {
    /// Lower-case name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineKind::Function => "function",
            RoutineKind::Aggregate => "aggregate",
        }
    }
}

/// A persisted schema object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SchemaEntry {
    /// Scalar function definition
    Function(FunctionDefinition),
    /// Aggregate definition
    Aggregate(AggregateDefinition),
}

impl SchemaEntry {
    /// Key identifying this entry in the metadata store
    pub fn schema_key(&self) -> SchemaKey {
        match self {
            SchemaEntry::Function(f) => SchemaKey {
                kind: RoutineKind::Function,
                key: f.key(),
            },
            SchemaEntry::Aggregate(a) => SchemaKey {
                kind: RoutineKind::Aggregate,
                key: a.key(),
            },
        }
    }
}

/// Identity of a persisted schema object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaKey {
    /// Function or aggregate
    pub kind: RoutineKind,
    /// Name and signature
    pub key: FunctionKey,
}
