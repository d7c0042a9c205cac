//! Lowering of a WebAssembly module to a verifier image
//!
//! - imported functions become calls to `host.<module>.<name>`
//! - exported mutable globals become fields, plus an initializer when
//!   the initial value is computed rather than a constant
//! - the start function is a static initializer
//! - a shared memory is treated as a monitor
//! - `memory.atomic.wait*` and `memory.atomic.notify` map to the
//!   `core.Object` wait and notify methods

use ferrule_core::{Error, FunctionDefinition, Language, Result};
use ferrule_verifier::{Instruction, ModuleImage, Routine, RoutineRole, OBJECT_OWNER};
use std::collections::HashMap;
use wasmparser::{ConstExpr, ExternalKind, Operator, Parser, Payload, TypeRef};

/// Owner prefix given to host imports
pub(crate) const HOST_OWNER: &str = "host";

/// Binary form of a WAT body
pub(crate) fn module_bytes(def: &FunctionDefinition) -> Result<Vec<u8>> {
    wat::parse_str(&def.body).map_err(|e| compilation_failure(def, e.to_string()))
}

pub(crate) fn compilation_failure(def: &FunctionDefinition, reason: String) -> Error {
    Error::CompilationFailure {
        language: Language::Wasm.display_name().to_string(),
        function: def.key().to_string(),
        reason,
    }
}

pub(crate) fn lower(def: &FunctionDefinition, bytes: &[u8]) -> Result<ModuleImage> {
    let invalid = |e: wasmparser::BinaryReaderError| compilation_failure(def, e.to_string());

    let mut image = ModuleImage::new(def.name.name.clone());
    let mut imported_funcs: Vec<(String, String)> = Vec::new();
    let mut mutable_globals: Vec<bool> = Vec::new();
    let mut computed_globals: Vec<bool> = Vec::new();
    let mut shared_memory = false;
    let mut export_names: HashMap<u32, String> = HashMap::new();
    let mut start: Option<u32> = None;
    let mut defined = 0u32;

    for payload in Parser::new(0).parse_all(bytes) {
        match payload.map_err(invalid)? {
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(invalid)?;
                    match import.ty {
                        TypeRef::Func(_) => imported_funcs
                            .push((import.module.to_string(), import.name.to_string())),
                        TypeRef::Global(global) => {
                            mutable_globals.push(global.mutable);
                            computed_globals.push(false);
                        }
                        TypeRef::Memory(memory) => shared_memory |= memory.shared,
                        _ => {}
                    }
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    shared_memory |= memory.map_err(invalid)?.shared;
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global.map_err(invalid)?;
                    mutable_globals.push(global.ty.mutable);
                    computed_globals.push(!is_plain_constant(&global.init_expr));
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(invalid)?;
                    match export.kind {
                        ExternalKind::Global
                            if mutable_globals
                                .get(export.index as usize)
                                .copied()
                                .unwrap_or(false) =>
                        {
                            let computed = computed_globals
                                .get(export.index as usize)
                                .copied()
                                .unwrap_or(false);
                            if computed {
                                image.routines.push(Routine::new(
                                    export.name.to_string(),
                                    RoutineRole::Initializer,
                                ));
                            }
                            image.fields.push(export.name.to_string());
                        }
                        ExternalKind::Func => {
                            export_names.insert(export.index, export.name.to_string());
                        }
                        _ => {}
                    }
                }
            }
            Payload::StartSection { func, .. } => start = Some(func),
            Payload::CodeSectionEntry(body) => {
                let index = imported_funcs.len() as u32 + defined;
                defined += 1;

                let name = export_names
                    .get(&index)
                    .cloned()
                    .unwrap_or_else(|| format!("func{}", index));
                let role = if start == Some(index) {
                    RoutineRole::StaticInitializer
                } else if name == def.name.name {
                    RoutineRole::Entry
                } else {
                    RoutineRole::Helper
                };
                let mut routine = Routine::new(name, role);

                let mut reader = body.get_operators_reader().map_err(invalid)?;
                while !reader.eof() {
                    match reader.read().map_err(invalid)? {
                        Operator::Call { function_index } => {
                            match imported_funcs.get(function_index as usize) {
                                Some((module, field)) => routine.call(
                                    format!("{}.{}", HOST_OWNER, module),
                                    field.clone(),
                                    0,
                                ),
                                None => routine.push(Instruction::Other),
                            }
                        }
                        Operator::MemoryAtomicWait32 { .. } | Operator::MemoryAtomicWait64 { .. } => {
                            routine.call(OBJECT_OWNER, "wait", 2)
                        }
                        Operator::MemoryAtomicNotify { .. } => {
                            routine.call(OBJECT_OWNER, "notify", 0)
                        }
                        _ => {}
                    }
                }
                image.routines.push(routine);
            }
            _ => {}
        }
    }

    if shared_memory {
        image.routines.push(
            Routine::new("shared-memory", RoutineRole::Helper).with(Instruction::MonitorEnter),
        );
    }
    Ok(image)
}

fn is_plain_constant(expr: &ConstExpr<'_>) -> bool {
    let mut reader = expr.get_operators_reader();
    let value = reader.read();
    let end = reader.read();
    matches!(
        value,
        Ok(Operator::I32Const { .. }
            | Operator::I64Const { .. }
            | Operator::F32Const { .. }
            | Operator::F64Const { .. }
            | Operator::V128Const { .. }
            | Operator::RefNull { .. })
    ) && matches!(end, Ok(Operator::End))
}
