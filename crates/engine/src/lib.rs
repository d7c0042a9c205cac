//! Function engine
//!
//! This crate ties the lower layers together:
//! - Registry: functions and aggregates keyed by name and signature
//! - Invoker: NULL policy, argument checks and result normalization around the sandbox
//! - Aggregate driver: SFUNC / FINALFUNC sequencing
//! - FunctionService: permission checks, persistence and replay
//! - Configuration via `ferrule.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregate;
pub mod config;
pub mod invoke;
pub mod registry;
pub mod service;

pub use aggregate::{AggregateDriver, AggregatePhase};
pub use config::{EngineConfig, SandboxConfig, CONFIG_FILE_NAME};
pub use invoke::Invoker;
pub use registry::{DropPolicy, DroppedFunction, FunctionRegistry, Routine};
pub use service::{CreateMode, CreateOutcome, FunctionService};
