//! Durability layer for Ferrule
//!
//! This crate handles everything that touches disk:
//!
//! - Schema log: append-only file of CRC-framed records, one per define or drop
//! - Recovery: replay on open, truncating a torn or corrupt tail
//! - Compaction: rewrite the log with only live entries
//!
//! The engine talks to it through the [`MetadataStore`] trait, which also has
//! a volatile [`InMemoryMetadataStore`] implementation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod record;
pub mod store;

pub use record::{RecordError, SchemaRecord, SCHEMA_RECORD_FORMAT_VERSION};
pub use store::{FileMetadataStore, InMemoryMetadataStore, MetadataStore, SCHEMA_LOG_FILE};
