//! Record collection for finalized trace entities.
//!
//! This module provides the sink the orchestrator flushes batches into,
//! either directly or through a bounded writer thread.

pub mod collector;
pub mod threaded;

pub use collector::{CollectedData, InMemoryCollector, RecordCollector, RunStatus, RunSummary};
pub use threaded::ThreadedCollector;
