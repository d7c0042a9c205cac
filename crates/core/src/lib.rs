//! Core types for Ferrule
//!
//! This crate defines the foundational types used throughout the system:
//! - CqlType / NativeType / UserType: the CQL type model
//! - Qualified marshal type names and their parser
//! - Value: runtime-neutral CQL values
//! - FunctionDefinition / AggregateDefinition and their keys
//! - Error: the error taxonomy shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod function;
pub mod type_name;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use function::{
    AggregateDefinition, FunctionDefinition, FunctionKey, FunctionName, Language, NullPolicy,
    RoutineKind, SchemaEntry, SchemaKey, Signature,
};
pub use type_name::{parse_qualified_name, qualified_name};
pub use types::{CqlType, NativeType, UserType};
pub use value::Value;
