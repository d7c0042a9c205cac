//! Fully-qualified type names
//!
//! Types are named by marshal class, e.g.
//! `org.apache.cassandra.db.marshal.ListType(org.apache.cassandra.db.marshal.Int32Type)`.
//! These names appear in permission resource descriptors, where `[`, `]`,
//! `^` and `/` are separators. User-defined type names and field names are
//! hex-encoded so a qualified name never contains any of them.

use crate::error::{Error, Result};
use crate::types::{CqlType, NativeType, UserType};
use std::sync::Arc;

/// Package prefix of every marshal class name
pub const MARSHAL_PREFIX: &str = "org.apache.cassandra.db.marshal.";

/// Marshal class of a native type, without the package prefix
pub fn native_class(t: NativeType) -> &'static str {
    match t {
        NativeType::Ascii => "AsciiType",
        NativeType::Bigint => "LongType",
        NativeType::Blob => "BytesType",
        NativeType::Boolean => "BooleanType",
        NativeType::Counter => "CounterColumnType",
        NativeType::Date => "SimpleDateType",
        NativeType::Double => "DoubleType",
        NativeType::Float => "FloatType",
        NativeType::Inet => "InetAddressType",
        NativeType::Int => "Int32Type",
        NativeType::Smallint => "ShortType",
        NativeType::Text => "UTF8Type",
        NativeType::Time => "TimeType",
        NativeType::Timestamp => "TimestampType",
        NativeType::Timeuuid => "TimeUUIDType",
        NativeType::Tinyint => "ByteType",
        NativeType::Uuid => "UUIDType",
    }
}

/// Fully-qualified marshal name of a type
///
/// # Example
///
/// ```
/// use ferrule_core::types::CqlType;
/// use ferrule_core::type_name::qualified_name;
///
/// assert_eq!(
///     qualified_name(&CqlType::int()),
///     "org.apache.cassandra.db.marshal.Int32Type"
/// );
/// ```
pub fn qualified_name(ty: &CqlType) -> String {
    let mut out = String::new();
    write_qualified(&mut out, ty);
    out
}

fn write_qualified(out: &mut String, ty: &CqlType) {
    let frozen_wrapper = !matches!(ty, CqlType::Native(_) | CqlType::Tuple(_)) && ty.is_frozen();
    if frozen_wrapper {
        out.push_str(MARSHAL_PREFIX);
        out.push_str("FrozenType(");
    }
    out.push_str(MARSHAL_PREFIX);
    match ty {
        CqlType::Native(n) => out.push_str(native_class(*n)),
        CqlType::List { element, .. } => {
            out.push_str("ListType(");
            write_qualified(out, element);
            out.push(')');
        }
        CqlType::Set { element, .. } => {
            out.push_str("SetType(");
            write_qualified(out, element);
            out.push(')');
        }
        CqlType::Map { key, value, .. } => {
            out.push_str("MapType(");
            write_qualified(out, key);
            out.push(',');
            write_qualified(out, value);
            out.push(')');
        }
        CqlType::Tuple(elements) => {
            out.push_str("TupleType(");
            for (i, e) in elements.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_qualified(out, e);
            }
            out.push(')');
        }
        CqlType::UserDefined { udt, .. } => {
            out.push_str("UserType(");
            out.push_str(&udt.keyspace);
            out.push(',');
            out.push_str(&hex_encode(&udt.name));
            for (field, field_type) in &udt.fields {
                out.push(',');
                out.push_str(&hex_encode(field));
                out.push(':');
                write_qualified(out, field_type);
            }
            out.push(')');
        }
    }
    if frozen_wrapper {
        out.push(')');
    }
}

/// Parse a fully-qualified marshal name back into a type
///
/// The package prefix is optional on every class name.
///
/// # Errors
///
/// Returns `Error::Marshal` for unknown classes, wrong arity or trailing input.
pub fn parse_qualified_name(name: &str) -> Result<CqlType> {
    let mut parser = Parser { src: name, pos: 0 };
    let ty = parser.parse_type()?;
    if parser.pos != name.len() {
        return Err(parser.error("trailing characters"));
    }
    Ok(ty)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> Error {
        Error::marshal(self.src, format!("{} at offset {}", reason, self.pos))
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn expect(&mut self, c: u8) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c as char)))
        }
    }

    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, b'(' | b')' | b',' | b':') {
                break;
            }
            self.pos += 1;
        }
        &self.src[start..self.pos]
    }

    fn parse_type(&mut self) -> Result<CqlType> {
        let class = self.token();
        let short = class.strip_prefix(MARSHAL_PREFIX).unwrap_or(class);
        match short {
            "ListType" => {
                let mut args = self.parse_args(1)?;
                Ok(CqlType::list(args.remove(0)))
            }
            "SetType" => {
                let mut args = self.parse_args(1)?;
                Ok(CqlType::set(args.remove(0)))
            }
            "MapType" => {
                let mut args = self.parse_args(2)?;
                let value = args.remove(1);
                Ok(CqlType::map(args.remove(0), value))
            }
            "FrozenType" => {
                let mut args = self.parse_args(1)?;
                Ok(args.remove(0).frozen())
            }
            "TupleType" => {
                self.expect(b'(')?;
                let mut elements = Vec::new();
                if self.peek() != Some(b')') {
                    loop {
                        elements.push(self.parse_type()?);
                        if self.peek() == Some(b',') {
                            self.pos += 1;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(b')')?;
                Ok(CqlType::Tuple(elements))
            }
            "UserType" => self.parse_user_type(),
            _ => NativeType::ALL
                .iter()
                .copied()
                .find(|t| native_class(*t) == short)
                .map(CqlType::Native)
                .ok_or_else(|| self.error(&format!("unknown type class {}", short))),
        }
    }

    fn parse_args(&mut self, arity: usize) -> Result<Vec<CqlType>> {
        self.expect(b'(')?;
        let mut args = Vec::with_capacity(arity);
        for i in 0..arity {
            if i > 0 {
                self.expect(b',')?;
            }
            args.push(self.parse_type()?);
        }
        self.expect(b')')?;
        Ok(args)
    }

    fn parse_user_type(&mut self) -> Result<CqlType> {
        self.expect(b'(')?;
        let keyspace = self.token().to_string();
        self.expect(b',')?;
        let name = self.hex_token()?;
        let mut fields = Vec::new();
        while self.peek() == Some(b',') {
            self.pos += 1;
            let field = self.hex_token()?;
            self.expect(b':')?;
            fields.push((field, self.parse_type()?));
        }
        self.expect(b')')?;
        Ok(CqlType::udt(Arc::new(UserType::new(keyspace, name, fields))))
    }

    fn hex_token(&mut self) -> Result<String> {
        let token = self.token();
        hex_decode(token).ok_or_else(|| self.error("invalid hex name"))
    }
}

/// Lower-case hex encoding of a UTF-8 name
pub fn hex_encode(s: &str) -> String {
    s.bytes().map(|b| format!("{:02x}", b)).collect()
}

/// Decode a hex-encoded UTF-8 name
pub fn hex_decode(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}
