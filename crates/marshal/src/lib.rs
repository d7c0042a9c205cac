//! Type marshaling between CQL cells and runtime values
//!
//! - [`wire`]: the byte codec (`encode` / `decode`)
//! - [`column`]: the empty-collection storage contract
//! - [`order`]: CQL value ordering for sets and map keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod column;
pub mod order;
pub mod wire;

pub use wire::{decode, encode, COLLECTION_WIRE_VERSION};
