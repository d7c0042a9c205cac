//! Access control for user-defined functions and aggregates.
//!
//! This crate provides the [`Permission`] and [`FunctionResource`] types,
//! the [`PermissionGate`] the engine consults before every operation, an
//! in-memory [`GrantTable`], and a [`PermissionCache`] through which
//! revocations propagate eventually.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod gate;
pub mod permission;
pub mod resource;

pub use cache::PermissionCache;
pub use gate::{GrantTable, PermissionGate, PermissionGrant};
pub use permission::Permission;
pub use resource::{FunctionResource, ROOT_NAME};
