//! Language-neutral module image
//!
//! Each runtime lowers a compiled function body into a [`ModuleImage`]:
//! the fields and nested units it declares, and the routines it defines
//! with a coarse instruction list. The verifier only ever looks at this
//! image, never at runtime-specific representations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Target of a call instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSite {
    /// Dotted owner path, e.g. `os` or `core.Object`
    pub owner: String,
    /// Member being called
    pub name: String,
    /// Number of arguments at the call site, when known
    pub arity: usize,
}

impl CallSite {
    /// Create a call site
    pub fn new(owner: impl Into<String>, name: impl Into<String>, arity: usize) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            arity,
        }
    }

    /// `owner.name`
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }

    /// True when the owner names a nested unit declared elsewhere
    pub fn is_nested_reference(&self) -> bool {
        self.owner.contains('$')
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}()", self.owner, self.name)
    }
}

/// Coarse instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// Call into another routine or library
    Invoke(CallSite),
    /// Acquire a monitor or shared-memory lock
    MonitorEnter,
    /// Release a monitor
    MonitorExit,
    /// Anything the verifier does not inspect
    Other,
}

/// What a routine is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutineRole {
    /// The function's entry point
    Entry,
    /// Helper called from the entry point
    Helper,
    /// Per-instance initializer
    Initializer,
    /// Runs once when the module is loaded
    StaticInitializer,
}

/// A routine with its instructions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routine {
    /// Routine name
    pub name: String,
    /// Role
    pub role: RoutineRole,
    /// Instructions in program order
    pub instructions: Vec<Instruction>,
}

impl Routine {
    /// Create an empty routine
    pub fn new(name: impl Into<String>, role: RoutineRole) -> Self {
        Self {
            name: name.into(),
            role,
            instructions: Vec::new(),
        }
    }

    /// Append an instruction
    pub fn push(&mut self, instruction: Instruction) {
        self.instructions.push(instruction);
    }

    /// Append a call instruction
    pub fn call(&mut self, owner: impl Into<String>, name: impl Into<String>, arity: usize) {
        self.push(Instruction::Invoke(CallSite::new(owner, name, arity)));
    }

    /// Builder form of [`Routine::push`]
    pub fn with(mut self, instruction: Instruction) -> Self {
        self.push(instruction);
        self
    }
}

/// Lowered form of a function body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleImage {
    /// Module name, usually the function name
    pub name: String,
    /// Declared persistent fields
    pub fields: Vec<String>,
    /// Declared nested units
    pub nested_units: Vec<String>,
    /// Routines
    pub routines: Vec<Routine>,
}

impl ModuleImage {
    /// Create an empty image
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Add a declared field
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.fields.push(field.into());
        self
    }

    /// Add a declared nested unit
    pub fn with_nested_unit(mut self, unit: impl Into<String>) -> Self {
        self.nested_units.push(unit.into());
        self
    }

    /// Add a routine
    pub fn with_routine(mut self, routine: Routine) -> Self {
        self.routines.push(routine);
        self
    }

    /// Every call site in every routine
    pub fn call_sites(&self) -> impl Iterator<Item = &CallSite> {
        self.routines
            .iter()
            .flat_map(|r| r.instructions.iter())
            .filter_map(|i| match i {
                Instruction::Invoke(site) => Some(site),
                _ => None,
            })
    }
}
