//! Argument passing convention for WebAssembly bodies
//!
//! A module exports its linear memory as `memory`, an allocator
//! `_scylla_malloc(size: i32) -> i32`, and the function under its own name.
//! Every argument and the result are serialized cells placed in guest
//! memory and passed as one `i64`: the size in the high 32 bits and the
//! address in the low 32 bits. A negative size is NULL.
//!
//! Modules may export a `_scylla_abi` global holding the address of a
//! little-endian `u32` ABI version. Version 2 modules also export
//! `_scylla_free(ptr: i32)`, which is called on the result buffer once it
//! has been copied out. Without the global the version is 1.

use ferrule_core::{FunctionDefinition, Value};
use wasmtime::{AsContextMut, Instance, Memory, Val};

pub(crate) const MEMORY_EXPORT: &str = "memory";
pub(crate) const MALLOC_EXPORT: &str = "_scylla_malloc";
pub(crate) const FREE_EXPORT: &str = "_scylla_free";
pub(crate) const ABI_VERSION_EXPORT: &str = "_scylla_abi";

/// Encoded NULL argument or result
pub(crate) const NULL_CELL: i64 = -1;

/// Pack a size and address into the argument word
pub(crate) fn pack(size: u32, ptr: u32) -> i64 {
    ((size as i64) << 32) | ptr as i64
}

/// Split an argument word into size and address; `None` for NULL
pub(crate) fn unpack(word: i64) -> Option<(u32, u32)> {
    let size = (word >> 32) as i32;
    if size < 0 {
        None
    } else {
        Some((size as u32, word as u32))
    }
}

/// Failure inside the guest or at the host/guest boundary
pub(crate) enum CallError {
    /// Trap or host error raised by wasmtime
    Runtime(wasmtime::Error),
    /// The module broke the calling convention
    Abi(String),
    /// Marshal or type error on our side
    Value(ferrule_core::Error),
}

impl From<wasmtime::Error> for CallError {
    fn from(e: wasmtime::Error) -> Self {
        CallError::Runtime(e)
    }
}

impl From<ferrule_core::Error> for CallError {
    fn from(e: ferrule_core::Error) -> Self {
        CallError::Value(e)
    }
}

fn memory(instance: &Instance, store: &mut impl AsContextMut) -> std::result::Result<Memory, CallError> {
    instance
        .get_memory(&mut *store, MEMORY_EXPORT)
        .ok_or_else(|| CallError::Abi(format!("module does not export '{}'", MEMORY_EXPORT)))
}

/// ABI version advertised by the module
pub(crate) fn abi_version(
    instance: &Instance,
    store: &mut impl AsContextMut,
) -> std::result::Result<u32, CallError> {
    let global = match instance.get_global(&mut *store, ABI_VERSION_EXPORT) {
        Some(g) => g,
        None => return Ok(1),
    };
    let addr = match global.get(&mut *store) {
        Val::I32(addr) => addr as u32 as usize,
        _ => return Err(CallError::Abi(format!("'{}' is not an i32", ABI_VERSION_EXPORT))),
    };
    let mut word = [0u8; 4];
    memory(instance, store)?
        .read(&mut *store, addr, &mut word)
        .map_err(|e| CallError::Abi(e.to_string()))?;
    Ok(u32::from_le_bytes(word))
}

/// Copy a serialized cell into guest memory and return its argument word
fn place_argument(
    instance: &Instance,
    store: &mut impl AsContextMut,
    cell: Option<Vec<u8>>,
) -> std::result::Result<i64, CallError> {
    let bytes = match cell {
        Some(bytes) => bytes,
        None => return Ok(NULL_CELL),
    };
    let malloc = instance.get_typed_func::<i32, i32>(&mut *store, MALLOC_EXPORT)?;
    let size = i32::try_from(bytes.len())
        .map_err(|_| CallError::Abi("argument larger than guest address space".to_string()))?;
    let ptr = malloc.call(&mut *store, size)? as u32;
    memory(instance, store)?
        .write(&mut *store, ptr as usize, &bytes)
        .map_err(|e| CallError::Abi(e.to_string()))?;
    Ok(pack(size as u32, ptr))
}

/// Call the function exported under the definition's name
pub(crate) fn call(
    instance: &Instance,
    store: &mut impl AsContextMut,
    def: &FunctionDefinition,
    args: &[Value],
) -> std::result::Result<Value, CallError> {
    let version = abi_version(instance, store)?;
    let func = instance
        .get_func(&mut *store, &def.name.name)
        .ok_or_else(|| CallError::Abi(format!("module does not export '{}'", def.name.name)))?;

    let mut params = Vec::with_capacity(args.len());
    for (arg, ty) in args.iter().zip(&def.arg_types) {
        let cell = ferrule_marshal::encode(arg, ty)?;
        params.push(Val::I64(place_argument(instance, store, cell)?));
    }
    let mut results = [Val::I64(0)];
    func.call(&mut *store, &params, &mut results)?;
    let word = results[0]
        .i64()
        .ok_or_else(|| CallError::Abi("function must return i64".to_string()))?;

    let (size, ptr) = match unpack(word) {
        Some(cell) => cell,
        None => return Ok(Value::Null),
    };
    let mut buf = vec![0u8; size as usize];
    memory(instance, store)?
        .read(&mut *store, ptr as usize, &mut buf)
        .map_err(|e| CallError::Abi(e.to_string()))?;
    if version >= 2 {
        let free = instance.get_typed_func::<i32, ()>(&mut *store, FREE_EXPORT)?;
        free.call(&mut *store, ptr as i32)?;
    }
    Ok(ferrule_marshal::decode(Some(&buf), &def.return_type)?)
}
