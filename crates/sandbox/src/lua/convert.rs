//! Value conversion between [`Value`] and Lua
//!
//! | CQL | Lua |
//! |-----|-----|
//! | integer types, date, time, timestamp | integer |
//! | float, double | number |
//! | text, ascii, blob, uuid, timeuuid, inet | string |
//! | list, tuple | sequence |
//! | set | `{[elem] = true}` (a sequence is also accepted on return) |
//! | map | table |
//! | user type | table keyed by field name |
//!
//! NULL is `nil` in both directions.

use ferrule_core::{CqlType, Error, NativeType, Result, Value};
use ferrule_marshal::order;
use mlua::{Lua, Table, Value as LuaValue};

/// Convert an argument value into a Lua value owned by `lua`
pub(crate) fn to_lua<'lua>(lua: &'lua Lua, value: &Value) -> mlua::Result<LuaValue<'lua>> {
    let converted = match value {
        Value::Null => LuaValue::Nil,
        Value::Ascii(s) | Value::Text(s) => LuaValue::String(lua.create_string(s)?),
        Value::Blob(b) => LuaValue::String(lua.create_string(b)?),
        Value::Boolean(b) => LuaValue::Boolean(*b),
        Value::Tinyint(v) => LuaValue::Integer(*v as i64),
        Value::Smallint(v) => LuaValue::Integer(*v as i64),
        Value::Int(v) => LuaValue::Integer(*v as i64),
        Value::Date(v) => LuaValue::Integer(*v as i64),
        Value::Bigint(v) | Value::Counter(v) | Value::Timestamp(v) | Value::Time(v) => {
            LuaValue::Integer(*v)
        }
        Value::Float(v) => LuaValue::Number(*v as f64),
        Value::Double(v) => LuaValue::Number(*v),
        Value::Uuid(u) | Value::Timeuuid(u) => LuaValue::String(lua.create_string(u.to_string())?),
        Value::Inet(addr) => LuaValue::String(lua.create_string(addr.to_string())?),
        Value::List(items) | Value::Tuple(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        Value::Set(items) => {
            let table = lua.create_table()?;
            for item in items {
                table.raw_set(to_lua(lua, item)?, true)?;
            }
            LuaValue::Table(table)
        }
        Value::Map(entries) => {
            let table = lua.create_table()?;
            for (k, v) in entries {
                table.raw_set(to_lua(lua, k)?, to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
        Value::UserDefined(fields) => {
            let table = lua.create_table()?;
            for (name, v) in fields {
                table.raw_set(name.as_str(), to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    };
    Ok(converted)
}

/// Convert a Lua return value into a value of type `ty`
///
/// # Errors
///
/// `TypeMismatch` when the Lua value does not fit `ty`, `Marshal` when it
/// fits but is out of range.
pub(crate) fn from_lua(value: LuaValue<'_>, ty: &CqlType) -> Result<Value> {
    if let LuaValue::Nil = value {
        return Ok(Value::Null);
    }
    match ty {
        CqlType::Native(native) => native_from_lua(value, *native, ty),
        CqlType::List { element, .. } => {
            let table = as_table(value, ty)?;
            Ok(Value::List(sequence(&table, element, ty)?))
        }
        CqlType::Set { element, .. } => {
            let table = as_table(value, ty)?;
            let items = if table.raw_len() > 0 {
                sequence(&table, element, ty)?
            } else {
                let mut keys = Vec::new();
                for pair in table.clone().pairs::<LuaValue, LuaValue>() {
                    let (k, present) = pair.map_err(|e| lua_error(ty, e))?;
                    if matches!(present, LuaValue::Nil | LuaValue::Boolean(false)) {
                        continue;
                    }
                    keys.push(from_lua(k, element)?);
                }
                keys
            };
            Ok(Value::Set(order::canonical_set(items)))
        }
        CqlType::Map {
            key: key_ty,
            value: value_ty,
            ..
        } => {
            let table = as_table(value, ty)?;
            let mut entries = Vec::new();
            for pair in table.clone().pairs::<LuaValue, LuaValue>() {
                let (k, v) = pair.map_err(|e| lua_error(ty, e))?;
                entries.push((from_lua(k, key_ty)?, from_lua(v, value_ty)?));
            }
            Ok(Value::Map(order::canonical_map(entries)))
        }
        CqlType::Tuple(types) => {
            let table = as_table(value, ty)?;
            let mut items = Vec::with_capacity(types.len());
            for (i, item_ty) in types.iter().enumerate() {
                let item: LuaValue = table.raw_get(i + 1).map_err(|e| lua_error(ty, e))?;
                items.push(from_lua(item, item_ty)?);
            }
            Ok(Value::Tuple(items))
        }
        CqlType::UserDefined { udt, .. } => {
            let table = as_table(value, ty)?;
            let mut fields = Vec::with_capacity(udt.fields.len());
            for (name, field_ty) in &udt.fields {
                let field: LuaValue = table
                    .raw_get(name.as_str())
                    .map_err(|e| lua_error(ty, e))?;
                fields.push((name.clone(), from_lua(field, field_ty)?));
            }
            Ok(Value::UserDefined(fields))
        }
    }
}

fn as_table<'lua>(value: LuaValue<'lua>, ty: &CqlType) -> Result<Table<'lua>> {
    match value {
        LuaValue::Table(t) => Ok(t),
        other => Err(Error::type_mismatch(ty, other.type_name())),
    }
}

fn sequence(table: &Table<'_>, element: &CqlType, ty: &CqlType) -> Result<Vec<Value>> {
    let len = table.raw_len();
    let mut items = Vec::with_capacity(len);
    for i in 1..=len {
        let item: LuaValue = table.raw_get(i).map_err(|e| lua_error(ty, e))?;
        items.push(from_lua(item, element)?);
    }
    Ok(items)
}

fn lua_error(ty: &CqlType, e: mlua::Error) -> Error {
    Error::marshal(ty, e.to_string())
}

fn integer(value: &LuaValue<'_>) -> Option<i64> {
    match value {
        LuaValue::Integer(i) => Some(*i),
        LuaValue::Number(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => Some(*f as i64),
        _ => None,
    }
}

fn number(value: &LuaValue<'_>) -> Option<f64> {
    match value {
        LuaValue::Integer(i) => Some(*i as f64),
        LuaValue::Number(f) => Some(*f),
        _ => None,
    }
}

fn native_from_lua(value: LuaValue<'_>, native: NativeType, ty: &CqlType) -> Result<Value> {
    let mismatch = |v: &LuaValue| Error::type_mismatch(ty, v.type_name());
    let out_of_range = || Error::marshal(ty, "value out of range");
    let converted = match native {
        NativeType::Boolean => match value {
            LuaValue::Boolean(b) => Value::Boolean(b),
            ref other => return Err(mismatch(other)),
        },
        NativeType::Tinyint => {
            let i = integer(&value).ok_or_else(|| mismatch(&value))?;
            Value::Tinyint(i8::try_from(i).map_err(|_| out_of_range())?)
        }
        NativeType::Smallint => {
            let i = integer(&value).ok_or_else(|| mismatch(&value))?;
            Value::Smallint(i16::try_from(i).map_err(|_| out_of_range())?)
        }
        NativeType::Int => {
            let i = integer(&value).ok_or_else(|| mismatch(&value))?;
            Value::Int(i32::try_from(i).map_err(|_| out_of_range())?)
        }
        NativeType::Date => {
            let i = integer(&value).ok_or_else(|| mismatch(&value))?;
            Value::Date(u32::try_from(i).map_err(|_| out_of_range())?)
        }
        NativeType::Bigint => Value::Bigint(integer(&value).ok_or_else(|| mismatch(&value))?),
        NativeType::Counter => Value::Counter(integer(&value).ok_or_else(|| mismatch(&value))?),
        NativeType::Timestamp => {
            Value::Timestamp(integer(&value).ok_or_else(|| mismatch(&value))?)
        }
        NativeType::Time => Value::Time(integer(&value).ok_or_else(|| mismatch(&value))?),
        NativeType::Float => Value::Float(number(&value).ok_or_else(|| mismatch(&value))? as f32),
        NativeType::Double => Value::Double(number(&value).ok_or_else(|| mismatch(&value))?),
        NativeType::Blob => match value {
            LuaValue::String(s) => Value::Blob(s.as_bytes().to_vec()),
            ref other => return Err(mismatch(other)),
        },
        NativeType::Ascii
        | NativeType::Text
        | NativeType::Uuid
        | NativeType::Timeuuid
        | NativeType::Inet => {
            let text = match value {
                LuaValue::String(ref s) => s
                    .to_str()
                    .map_err(|e| lua_error(ty, e))?
                    .to_string(),
                ref other => return Err(mismatch(other)),
            };
            match native {
                NativeType::Ascii => Value::Ascii(text),
                NativeType::Text => Value::Text(text),
                NativeType::Uuid => Value::Uuid(
                    text.parse()
                        .map_err(|_| Error::marshal(ty, format!("invalid uuid '{}'", text)))?,
                ),
                NativeType::Timeuuid => Value::Timeuuid(
                    text.parse()
                        .map_err(|_| Error::marshal(ty, format!("invalid uuid '{}'", text)))?,
                ),
                _ => Value::Inet(
                    text.parse()
                        .map_err(|_| Error::marshal(ty, format!("invalid address '{}'", text)))?,
                ),
            }
        }
    };
    Ok(converted)
}
