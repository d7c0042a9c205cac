//! Static verifier for user-defined function bodies
//!
//! Runtimes lower a compiled body into a [`ModuleImage`]; [`Verifier`]
//! rejects images that declare state, synchronize, call root object
//! methods, reach for network or raw memory, or call into disallowed
//! library prefixes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod image;
pub mod verifier;

pub use image::{CallSite, Instruction, ModuleImage, Routine, RoutineRole};
pub use verifier::{Verifier, Violations, OBJECT_OWNER};
