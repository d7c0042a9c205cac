//! Integration Tests
//!
//! End-to-end tests through `FunctionService`, organized by concern:
//! - Verification: what CREATE rejects before anything is stored
//! - Types: marshaling, NULL policy and frozen collections
//! - Permissions: grants, drops and eventually-consistent revocation
//! - Durability: restart and schema log recovery
//! - Execution: timeouts and faults in both runtimes

#[path = "../common/mod.rs"]
mod common;

mod durability;
mod execution;
mod permissions;
mod types;
mod verification;
