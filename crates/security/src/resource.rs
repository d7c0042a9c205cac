//! Function resources
//!
//! The permission hierarchy for routines has three levels:
//!
//! | Level | Descriptor | Display |
//! |-------|------------|---------|
//! | all functions | `functions` | `<all functions>` |
//! | one keyspace | `functions/ks` | `<all functions in ks>` |
//! | one overload | `functions/ks/name[T1^T2]` | `<function ks.name(t1, t2)>` |
//!
//! `Ti` are fully-qualified type names. Parsing splits the keyspace at the
//! first `/` and the argument list at the last `[`; qualified type names
//! never contain `[`, so function names may contain any character.
//!
//! In the display form names are quoted as CQL identifiers when needed,
//! and user-type arguments show as `frozen<...>` since a routine only ever
//! receives them frozen.

use crate::permission::Permission;
use ferrule_core::types::quote_identifier;
use ferrule_core::{
    parse_qualified_name, qualified_name, CqlType, Error, FunctionKey, FunctionName, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Root descriptor of the function hierarchy
pub const ROOT_NAME: &str = "functions";

const SEPARATOR: char = '/';
const ARG_SEPARATOR: &str = "^";

/// A node in the function permission hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionResource {
    /// Every function in every keyspace
    All,
    /// Every function in one keyspace
    Keyspace(String),
    /// One overload
    Function {
        /// Owning keyspace
        keyspace: String,
        /// Function name
        name: String,
        /// Argument types, top-level frozen-ness stripped
        arg_types: Vec<CqlType>,
    },
}

impl FunctionResource {
    /// Resource for one overload
    pub fn function(keyspace: impl Into<String>, name: impl Into<String>, arg_types: &[CqlType]) -> Self {
        FunctionResource::Function {
            keyspace: keyspace.into(),
            name: name.into(),
            arg_types: arg_types.iter().map(CqlType::unfrozen).collect(),
        }
    }

    /// Resource for the routine identified by `key`
    pub fn from_key(key: &FunctionKey) -> Self {
        FunctionResource::Function {
            keyspace: key.name.keyspace.clone(),
            name: key.name.name.clone(),
            arg_types: key.signature.types().to_vec(),
        }
    }

    /// Key of the overload, for function resources
    pub fn key(&self) -> Option<FunctionKey> {
        match self {
            FunctionResource::Function {
                keyspace,
                name,
                arg_types,
            } => Some(FunctionKey::new(
                FunctionName::new(keyspace.clone(), name.clone()),
                arg_types,
            )),
            _ => None,
        }
    }

    /// Enclosing resource, `None` for the root
    pub fn parent(&self) -> Option<FunctionResource> {
        match self {
            FunctionResource::All => None,
            FunctionResource::Keyspace(_) => Some(FunctionResource::All),
            FunctionResource::Function { keyspace, .. } => {
                Some(FunctionResource::Keyspace(keyspace.clone()))
            }
        }
    }

    /// This resource followed by its ancestors up to the root
    pub fn chain(&self) -> impl Iterator<Item = FunctionResource> {
        std::iter::successors(Some(self.clone()), |r| r.parent())
    }

    /// Permissions that may be granted on this resource
    ///
    /// CREATE makes no sense on a function that already exists.
    pub fn applicable_permissions(&self) -> &'static [Permission] {
        const FUNCTION: [Permission; 4] = [
            Permission::Alter,
            Permission::Drop,
            Permission::Authorize,
            Permission::Execute,
        ];
        match self {
            FunctionResource::All | FunctionResource::Keyspace(_) => &Permission::ALL,
            FunctionResource::Function { .. } => &FUNCTION,
        }
    }

    /// Canonical descriptor
    pub fn name(&self) -> String {
        match self {
            FunctionResource::All => ROOT_NAME.to_string(),
            FunctionResource::Keyspace(ks) => format!("{}{}{}", ROOT_NAME, SEPARATOR, ks),
            FunctionResource::Function {
                keyspace,
                name,
                arg_types,
            } => {
                let args: Vec<String> = arg_types.iter().map(qualified_name).collect();
                format!(
                    "{root}{sep}{keyspace}{sep}{name}[{args}]",
                    root = ROOT_NAME,
                    sep = SEPARATOR,
                    args = args.join(ARG_SEPARATOR),
                )
            }
        }
    }

    /// Parse a canonical descriptor
    ///
    /// # Errors
    ///
    /// `InvalidResource` for anything [`FunctionResource::name`] cannot
    /// produce.
    pub fn from_name(descriptor: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidResource {
            resource: descriptor.to_string(),
            reason: reason.to_string(),
        };

        let rest = descriptor
            .strip_prefix(ROOT_NAME)
            .ok_or_else(|| invalid("not a function resource"))?;
        if rest.is_empty() {
            return Ok(FunctionResource::All);
        }
        let rest = rest
            .strip_prefix(SEPARATOR)
            .ok_or_else(|| invalid("expected '/' after root"))?;

        let (keyspace, function) = match rest.split_once(SEPARATOR) {
            None => (rest, None),
            Some((ks, f)) => (ks, Some(f)),
        };
        if keyspace.is_empty() {
            return Err(invalid("empty keyspace"));
        }
        let function = match function {
            None => return Ok(FunctionResource::Keyspace(keyspace.to_string())),
            Some(f) => f,
        };

        let open = function
            .rfind('[')
            .ok_or_else(|| invalid("missing argument list"))?;
        let name = &function[..open];
        let args = function[open + 1..]
            .strip_suffix(']')
            .ok_or_else(|| invalid("unterminated argument list"))?;
        if name.is_empty() {
            return Err(invalid("empty function name"));
        }
        let arg_types = if args.is_empty() {
            Vec::new()
        } else {
            args.split(ARG_SEPARATOR)
                .map(parse_qualified_name)
                .collect::<Result<Vec<_>>>()
                .map_err(|e| invalid(&e.to_string()))?
        };
        Ok(FunctionResource::function(keyspace, name, &arg_types))
    }
}

impl fmt::Display for FunctionResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionResource::All => f.write_str("<all functions>"),
            FunctionResource::Keyspace(ks) => write!(f, "<all functions in {}>", ks),
            FunctionResource::Function {
                keyspace,
                name,
                arg_types,
            } => {
                let args: Vec<String> = arg_types
                    .iter()
                    .map(|t| match t {
                        CqlType::UserDefined { .. } => t.clone().frozen().to_string(),
                        _ => t.to_string(),
                    })
                    .collect();
                write!(
                    f,
                    "<function {}.{}({})>",
                    quote_identifier(keyspace),
                    quote_identifier(name),
                    args.join(", ")
                )
            }
        }
    }
}
