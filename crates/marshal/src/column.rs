//! Column storage contract
//!
//! A non-frozen collection column is stored cell by cell, so an empty
//! collection has no cells and reads back as NULL. Frozen collections are
//! a single cell and keep their emptiness. The same rule applies to values
//! a function returns through a non-frozen collection return type, which
//! is why `f(list<int>)` sees NULL where `f(frozen<list<int>>)` sees `[]`.

use crate::wire;
use ferrule_core::{CqlType, Result, Value};

/// Apply the storage contract to a value of type `ty`
pub fn normalize(value: Value, ty: &CqlType) -> Value {
    if ty.is_multi_cell_collection() && value.is_empty_collection() {
        Value::Null
    } else {
        value
    }
}

/// Serialize a value as it would be written to a column of type `ty`
///
/// # Errors
///
/// Propagates codec errors from [`wire::encode`].
pub fn store(value: &Value, ty: &CqlType) -> Result<Option<Vec<u8>>> {
    if ty.is_multi_cell_collection() && value.is_empty_collection() {
        return Ok(None);
    }
    wire::encode(value, ty)
}

/// Deserialize a column cell of type `ty`
///
/// # Errors
///
/// Propagates codec errors from [`wire::decode`].
pub fn load(bytes: Option<&[u8]>, ty: &CqlType) -> Result<Value> {
    Ok(normalize(wire::decode(bytes, ty)?, ty))
}
