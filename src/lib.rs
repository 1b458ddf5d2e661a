//! Simtrace library - shared modules for the simtrace and simtrace-analyze binaries.
//!
//! This library turns a Multi2Sim GPU timing trace into a queryable SQLite
//! database and provides the analyses run against that database.
//!
//! # Modules
//!
//! - [`classify`] - Trace line classification
//! - [`instruction`], [`memory`], [`cycle`] - Entity lifecycle trackers
//! - [`record`] - Batch collectors, including the threaded writer
//! - [`sqlite`] - Bounded persistent writer and database schema
//! - [`ingest`] - Orchestrator driving a trace through the trackers
//! - [`analyze`] - Read-only analysis of an ingested database
//! - [`validate`] - Consistency checks of an ingested database
//!
//! # Example
//!
//! ```no_run
//! use simtrace::ingest::{ingest_to_sqlite, IngestConfig};
//! use std::path::Path;
//!
//! ingest_to_sqlite(
//!     Path::new("./trace.log.gz"),
//!     Path::new("./trace.db"),
//!     &IngestConfig::default(),
//!     None,
//! )
//! .expect("Failed to ingest trace");
//! ```

pub mod analyze;
pub mod classify;
pub mod cycle;
pub mod error;
pub mod history;
pub mod ingest;
pub mod instruction;
pub mod memory;
pub mod record;
pub mod sqlite;
pub mod trace;
pub mod validate;

// Re-export for convenience
pub use analyze::AnalyzeDb;
pub use error::{EntityKind, StoreError, TrackError};
pub use ingest::{ingest_to_sqlite, ErrorPolicy, IngestConfig, IngestOutcome, Ingestor};
pub use record::{RecordCollector, RunStatus, RunSummary};
pub use sqlite::{CycleLayout, SqliteStore};
pub use validate::{validate_database, ValidationError, ValidationResult, ValidationWarning};
