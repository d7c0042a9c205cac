//! CQL value codec
//!
//! # Layouts
//!
//! ```text
//! native      big-endian fixed width, or raw bytes for text/blob/inet
//! list / set  i32 count, then count × (i32 len | bytes)
//! map         i32 count, then count × (i32 len | key bytes | i32 len | value bytes)
//! tuple / udt components back to back as (i32 len | bytes), len -1 = NULL
//! ```
//!
//! Collections always use [`COLLECTION_WIRE_VERSION`] (32-bit counts and
//! lengths), whatever protocol version the client negotiated.
//!
//! `encode` returns `None` for `Null`; `decode` maps `None` back to `Null`.
//! A zero-length cell of a fixed-width native type, or of a tuple or
//! user-defined type, decodes to `Null`; the one exception is the empty
//! tuple type, whose only value encodes to zero bytes. Tuples are encoded
//! with exactly as many components as their type, while decoding pads
//! cells written with fewer trailing components with `Null`.

use crate::order;
use ferrule_core::{CqlType, Error, NativeType, Result, Value};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use uuid::Uuid;

/// Wire format version used for every collection encoding
pub const COLLECTION_WIRE_VERSION: u8 = 4;

const NANOS_PER_DAY: i64 = 86_400_000_000_000;

/// Serialize a value as `ty`
///
/// Sets and map keys are sorted and deduplicated on the way out.
///
/// # Errors
///
/// - `TypeMismatch` if the value variant does not fit `ty`
/// - `Marshal` for values the type cannot represent (non-ASCII `ascii`,
///   NULL inside a collection, out-of-range `time`)
pub fn encode(value: &Value, ty: &CqlType) -> Result<Option<Vec<u8>>> {
    if value.is_null() {
        return Ok(None);
    }
    let mut out = Vec::new();
    encode_into(&mut out, value, ty)?;
    Ok(Some(out))
}

/// Deserialize a cell of type `ty`
///
/// # Errors
///
/// Returns `Marshal` when the bytes are malformed for `ty`.
pub fn decode(bytes: Option<&[u8]>, ty: &CqlType) -> Result<Value> {
    match bytes {
        None => Ok(Value::Null),
        Some(b) => decode_cell(b, ty),
    }
}

fn encode_into(out: &mut Vec<u8>, value: &Value, ty: &CqlType) -> Result<()> {
    match ty {
        CqlType::Native(native) => encode_native(out, value, *native, ty),
        CqlType::List { element, .. } => match value {
            Value::List(items) => encode_elements(out, items.iter(), element, ty),
            _ => Err(Error::type_mismatch(ty, value.kind())),
        },
        CqlType::Set { element, .. } => {
            let items = match value {
                Value::Set(items) => items,
                _ => return Err(Error::type_mismatch(ty, value.kind())),
            };
            let sorted = order::canonical_set(items.clone());
            encode_elements(out, sorted.iter(), element, ty)
        }
        CqlType::Map {
            key: key_ty,
            value: value_ty,
            ..
        } => {
            let entries = match value {
                Value::Map(entries) => order::canonical_map(entries.clone()),
                _ => return Err(Error::type_mismatch(ty, value.kind())),
            };
            write_count(out, entries.len(), ty)?;
            for (k, v) in &entries {
                write_element(out, k, key_ty, ty)?;
                write_element(out, v, value_ty, ty)?;
            }
            Ok(())
        }
        CqlType::Tuple(types) => {
            let items = match value {
                Value::Tuple(items) => items,
                _ => return Err(Error::type_mismatch(ty, value.kind())),
            };
            if items.len() != types.len() {
                return Err(Error::type_mismatch(
                    ty,
                    format!("tuple of {} components", items.len()),
                ));
            }
            for (item, item_ty) in items.iter().zip(types) {
                write_component(out, item, item_ty)?;
            }
            Ok(())
        }
        CqlType::UserDefined { udt, .. } => {
            let fields = match value {
                Value::UserDefined(fields) => fields,
                _ => return Err(Error::type_mismatch(ty, value.kind())),
            };
            if let Some((unknown, _)) = fields.iter().find(|(n, _)| udt.field_type(n).is_none()) {
                return Err(Error::type_mismatch(ty, format!("field {}", unknown)));
            }
            for (name, field_ty) in &udt.fields {
                let field_value = fields
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v)
                    .unwrap_or(&Value::Null);
                write_component(out, field_value, field_ty)?;
            }
            Ok(())
        }
    }
}

fn encode_native(out: &mut Vec<u8>, value: &Value, native: NativeType, ty: &CqlType) -> Result<()> {
    match (native, value) {
        (NativeType::Ascii, Value::Ascii(s)) => {
            if !s.is_ascii() {
                return Err(Error::marshal(ty, "non-ASCII character in ascii value"));
            }
            out.extend_from_slice(s.as_bytes());
        }
        (NativeType::Text, Value::Text(s)) => out.extend_from_slice(s.as_bytes()),
        (NativeType::Blob, Value::Blob(b)) => out.extend_from_slice(b),
        (NativeType::Boolean, Value::Boolean(b)) => out.push(u8::from(*b)),
        (NativeType::Tinyint, Value::Tinyint(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Smallint, Value::Smallint(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Int, Value::Int(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Bigint, Value::Bigint(v))
        | (NativeType::Counter, Value::Counter(v))
        | (NativeType::Timestamp, Value::Timestamp(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Time, Value::Time(v)) => {
            if !(0..NANOS_PER_DAY).contains(v) {
                return Err(Error::marshal(ty, format!("time {} out of range", v)));
            }
            out.extend_from_slice(&v.to_be_bytes());
        }
        (NativeType::Float, Value::Float(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Double, Value::Double(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Date, Value::Date(v)) => out.extend_from_slice(&v.to_be_bytes()),
        (NativeType::Uuid, Value::Uuid(u)) => out.extend_from_slice(u.as_bytes()),
        (NativeType::Timeuuid, Value::Timeuuid(u)) => {
            if u.get_version_num() != 1 {
                return Err(Error::marshal(ty, "timeuuid must be a version 1 UUID"));
            }
            out.extend_from_slice(u.as_bytes());
        }
        (NativeType::Inet, Value::Inet(IpAddr::V4(a))) => out.extend_from_slice(&a.octets()),
        (NativeType::Inet, Value::Inet(IpAddr::V6(a))) => out.extend_from_slice(&a.octets()),
        _ => return Err(Error::type_mismatch(ty, value.kind())),
    }
    Ok(())
}

fn encode_elements<'a>(
    out: &mut Vec<u8>,
    items: impl ExactSizeIterator<Item = &'a Value>,
    element: &CqlType,
    ty: &CqlType,
) -> Result<()> {
    write_count(out, items.len(), ty)?;
    for item in items {
        write_element(out, item, element, ty)?;
    }
    Ok(())
}

fn write_count(out: &mut Vec<u8>, count: usize, ty: &CqlType) -> Result<()> {
    let count = i32::try_from(count).map_err(|_| Error::marshal(ty, "too many elements"))?;
    out.extend_from_slice(&count.to_be_bytes());
    Ok(())
}

/// Collection element: NULL is not representable
fn write_element(out: &mut Vec<u8>, value: &Value, ty: &CqlType, collection: &CqlType) -> Result<()> {
    if value.is_null() {
        return Err(Error::marshal(collection, "collection elements cannot be null"));
    }
    write_component(out, value, ty)
}

/// Length-prefixed component, -1 for NULL
fn write_component(out: &mut Vec<u8>, value: &Value, ty: &CqlType) -> Result<()> {
    match encode(value, ty)? {
        None => out.extend_from_slice(&(-1i32).to_be_bytes()),
        Some(bytes) => {
            let len = i32::try_from(bytes.len()).map_err(|_| Error::marshal(ty, "value too large"))?;
            out.extend_from_slice(&len.to_be_bytes());
            out.extend_from_slice(&bytes);
        }
    }
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    ty: &'a CqlType,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], ty: &'a CqlType) -> Self {
        Self { bytes, pos: 0, ty }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_i32(&mut self) -> Result<i32> {
        let end = self.pos + 4;
        let raw = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| Error::marshal(self.ty, "truncated length"))?;
        self.pos = end;
        Ok(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count).map_err(|_| Error::marshal(self.ty, format!("negative count {}", count)))
    }

    /// Length-prefixed cell, `None` for NULL
    fn read_cell(&mut self) -> Result<Option<&'a [u8]>> {
        let len = self.read_i32()?;
        if len < 0 {
            return Ok(None);
        }
        let end = self.pos + len as usize;
        let cell = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| Error::marshal(self.ty, "truncated value"))?;
        self.pos = end;
        Ok(Some(cell))
    }

    fn read_element(&mut self, element: &CqlType) -> Result<Value> {
        match self.read_cell()? {
            None => Err(Error::marshal(self.ty, "collection elements cannot be null")),
            Some(cell) => decode_cell(cell, element),
        }
    }

    fn finish(&self) -> Result<()> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(Error::marshal(
                self.ty,
                format!("{} trailing bytes", self.remaining()),
            ))
        }
    }
}

fn decode_cell(bytes: &[u8], ty: &CqlType) -> Result<Value> {
    match ty {
        CqlType::Native(native) => decode_native(bytes, *native, ty),
        CqlType::List { element, .. } => {
            let mut reader = Reader::new(bytes, ty);
            let count = reader.read_count()?;
            let mut items = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                items.push(reader.read_element(element)?);
            }
            reader.finish()?;
            Ok(Value::List(items))
        }
        CqlType::Set { element, .. } => {
            let mut reader = Reader::new(bytes, ty);
            let count = reader.read_count()?;
            let mut items = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                items.push(reader.read_element(element)?);
            }
            reader.finish()?;
            Ok(Value::Set(items))
        }
        CqlType::Map {
            key: key_ty,
            value: value_ty,
            ..
        } => {
            let mut reader = Reader::new(bytes, ty);
            let count = reader.read_count()?;
            let mut entries = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                let k = reader.read_element(key_ty)?;
                let v = reader.read_element(value_ty)?;
                entries.push((k, v));
            }
            reader.finish()?;
            Ok(Value::Map(entries))
        }
        CqlType::Tuple(types) => {
            if bytes.is_empty() && !types.is_empty() {
                return Ok(Value::Null);
            }
            let mut reader = Reader::new(bytes, ty);
            let mut items = Vec::with_capacity(types.len());
            for item_ty in types {
                if reader.remaining() == 0 {
                    items.push(Value::Null);
                    continue;
                }
                items.push(decode(reader.read_cell()?, item_ty)?);
            }
            reader.finish()?;
            Ok(Value::Tuple(items))
        }
        CqlType::UserDefined { udt, .. } => {
            if bytes.is_empty() {
                return Ok(Value::Null);
            }
            let mut reader = Reader::new(bytes, ty);
            let mut fields = Vec::with_capacity(udt.fields.len());
            for (name, field_ty) in &udt.fields {
                let v = if reader.remaining() == 0 {
                    Value::Null
                } else {
                    decode(reader.read_cell()?, field_ty)?
                };
                fields.push((name.clone(), v));
            }
            reader.finish()?;
            Ok(Value::UserDefined(fields))
        }
    }
}

fn decode_native(bytes: &[u8], native: NativeType, ty: &CqlType) -> Result<Value> {
    if let Some(width) = native.fixed_width() {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        if bytes.len() != width {
            return Err(Error::marshal(
                ty,
                format!("expected {} bytes, got {}", width, bytes.len()),
            ));
        }
    }
    let value = match native {
        NativeType::Ascii => {
            if !bytes.is_ascii() {
                return Err(Error::marshal(ty, "non-ASCII byte in ascii value"));
            }
            Value::Ascii(String::from_utf8_lossy(bytes).into_owned())
        }
        NativeType::Text => Value::Text(
            String::from_utf8(bytes.to_vec()).map_err(|_| Error::marshal(ty, "invalid UTF-8"))?,
        ),
        NativeType::Blob => Value::Blob(bytes.to_vec()),
        NativeType::Boolean => Value::Boolean(bytes[0] != 0),
        NativeType::Tinyint => Value::Tinyint(bytes[0] as i8),
        NativeType::Smallint => Value::Smallint(i16::from_be_bytes([bytes[0], bytes[1]])),
        NativeType::Int => Value::Int(i32::from_be_bytes(array4(bytes))),
        NativeType::Float => Value::Float(f32::from_be_bytes(array4(bytes))),
        NativeType::Date => Value::Date(u32::from_be_bytes(array4(bytes))),
        NativeType::Bigint => Value::Bigint(i64::from_be_bytes(array8(bytes))),
        NativeType::Counter => Value::Counter(i64::from_be_bytes(array8(bytes))),
        NativeType::Timestamp => Value::Timestamp(i64::from_be_bytes(array8(bytes))),
        NativeType::Double => Value::Double(f64::from_be_bytes(array8(bytes))),
        NativeType::Time => {
            let nanos = i64::from_be_bytes(array8(bytes));
            if !(0..NANOS_PER_DAY).contains(&nanos) {
                return Err(Error::marshal(ty, format!("time {} out of range", nanos)));
            }
            Value::Time(nanos)
        }
        NativeType::Uuid => Value::Uuid(uuid_from(bytes, ty)?),
        NativeType::Timeuuid => {
            let u = uuid_from(bytes, ty)?;
            if u.get_version_num() != 1 {
                return Err(Error::marshal(ty, "timeuuid must be a version 1 UUID"));
            }
            Value::Timeuuid(u)
        }
        NativeType::Inet => match bytes.len() {
            4 => Value::Inet(IpAddr::V4(Ipv4Addr::new(
                bytes[0], bytes[1], bytes[2], bytes[3],
            ))),
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Value::Inet(IpAddr::V6(Ipv6Addr::from(octets)))
            }
            0 => Value::Null,
            n => return Err(Error::marshal(ty, format!("inet address of {} bytes", n))),
        },
    };
    Ok(value)
}

fn array4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn array8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

fn uuid_from(bytes: &[u8], ty: &CqlType) -> Result<Uuid> {
    Uuid::from_slice(bytes).map_err(|e| Error::marshal(ty, e.to_string()))
}
