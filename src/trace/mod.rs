//! Shared trace data types and schemas.
//!
//! This module provides the canonical record types produced by the trackers and
//! consumed by the collectors and the SQLite writer. Both the ingestion path
//! (`simtrace`) and the analysis path (`simtrace-analyze`) use these types and
//! table names, keeping the two in agreement.
//!
//! # Module Organization
//!
//! - [`models`]: Record structs for instructions, memory accesses and cycle counts
//! - [`schema`]: Column definitions and stage-label normalisation
//! - [`constants`]: Shared constants (line grammars, defaults, table names)

pub mod constants;
pub mod models;
pub mod schema;

// Re-export commonly used types
pub use models::*;
pub use schema::*;
