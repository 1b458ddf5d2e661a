//! RecordCollector trait for streaming finalized entities to storage.
//!
//! The trackers never talk to storage directly. Whenever one of their buffers
//! crosses the flush threshold the orchestrator hands the whole batch to a
//! collector, which owns it from then on.

use anyhow::Result;
use serde::Serialize;

use crate::trace::{CycleStageBatch, IncompleteEntity, InstructionRecord, MemoryAccessRecord};

/// Final state of an ingestion run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Running,
    Complete,
    Aborted,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Complete => "complete",
            RunStatus::Aborted => "aborted",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "complete" => Some(RunStatus::Complete),
            "aborted" => Some(RunStatus::Aborted),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Counters describing one ingestion run, persisted when the run finishes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub trace: String,
    pub status: RunStatus,
    pub lines: u64,
    pub unmatched_lines: u64,
    pub skipped_errors: u64,
    pub instructions: u64,
    pub memory_accesses: u64,
    pub cycle_rows: u64,
    pub incomplete: u64,
    pub last_cycle: u64,
    /// Error that ended the run, if any.
    pub error: Option<String>,
}

/// Trait for collecting finalized records during ingestion.
///
/// Every call receives a complete, immutable batch. Implementations decide
/// their own commit boundaries, but must not hold on to partial state across
/// [`finish`](RecordCollector::finish).
pub trait RecordCollector {
    /// Add a batch of closed instructions.
    fn add_instructions(&mut self, records: Vec<InstructionRecord>) -> Result<()>;

    /// Add a batch of closed memory accesses.
    fn add_memory_accesses(&mut self, records: Vec<MemoryAccessRecord>) -> Result<()>;

    /// Add closed cycle rows of one compute unit.
    fn add_cycle_stages(&mut self, batch: CycleStageBatch) -> Result<()>;

    /// Add entities that were still open when the trace ended.
    fn add_incomplete(&mut self, entities: Vec<IncompleteEntity>) -> Result<()>;

    /// Record the outcome of the run. No batches follow this call.
    fn finish(&mut self, summary: &RunSummary) -> Result<()>;
}

/// Everything an [`InMemoryCollector`] has received.
#[derive(Clone, Debug, Default)]
pub struct CollectedData {
    pub instructions: Vec<InstructionRecord>,
    pub memory_accesses: Vec<MemoryAccessRecord>,
    pub cycle_batches: Vec<CycleStageBatch>,
    pub incomplete: Vec<IncompleteEntity>,
    /// Size of every instruction batch, in arrival order.
    pub instruction_batch_sizes: Vec<usize>,
    /// Size of every memory access batch, in arrival order.
    pub memory_batch_sizes: Vec<usize>,
    pub summary: Option<RunSummary>,
}

/// A simple in-memory collector that keeps every batch.
///
/// This is useful for testing, where batch boundaries need to be inspected.
#[derive(Debug, Default)]
pub struct InMemoryCollector {
    data: CollectedData,
}

impl InMemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_data(self) -> CollectedData {
        self.data
    }

    pub fn data(&self) -> &CollectedData {
        &self.data
    }
}

impl RecordCollector for InMemoryCollector {
    fn add_instructions(&mut self, records: Vec<InstructionRecord>) -> Result<()> {
        self.data.instruction_batch_sizes.push(records.len());
        self.data.instructions.extend(records);
        Ok(())
    }

    fn add_memory_accesses(&mut self, records: Vec<MemoryAccessRecord>) -> Result<()> {
        self.data.memory_batch_sizes.push(records.len());
        self.data.memory_accesses.extend(records);
        Ok(())
    }

    fn add_cycle_stages(&mut self, batch: CycleStageBatch) -> Result<()> {
        self.data.cycle_batches.push(batch);
        Ok(())
    }

    fn add_incomplete(&mut self, entities: Vec<IncompleteEntity>) -> Result<()> {
        self.data.incomplete.extend(entities);
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.data.summary = Some(summary.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_names() {
        for status in [
            RunStatus::Running,
            RunStatus::Complete,
            RunStatus::Aborted,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("done"), None);
        assert_eq!(
            serde_json::to_string(&RunStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_in_memory_collector_batches() {
        let mut collector = InMemoryCollector::new();
        collector.add_instructions(Vec::new()).unwrap();
        collector.add_memory_accesses(Vec::new()).unwrap();
        collector
            .finish(&RunSummary {
                status: RunStatus::Complete,
                ..Default::default()
            })
            .unwrap();

        let data = collector.into_data();
        assert_eq!(data.instruction_batch_sizes, vec![0]);
        assert_eq!(data.memory_batch_sizes, vec![0]);
        assert_eq!(data.summary.map(|s| s.status), Some(RunStatus::Complete));
    }
}
