//! Collector that persists batches on a dedicated writer thread.
//!
//! The ingesting thread keeps parsing while the writer commits earlier
//! batches. Batches travel over a bounded channel, so a slow writer blocks the
//! producer instead of letting closed records pile up in memory.

use std::sync::mpsc::{sync_channel, SyncSender};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;

use super::collector::{RecordCollector, RunSummary};
use crate::trace::{CycleStageBatch, IncompleteEntity, InstructionRecord, MemoryAccessRecord};

/// Name of the writer thread.
pub const WRITER_THREAD_NAME: &str = "trace_writer";

enum Batch {
    Instructions(Vec<InstructionRecord>),
    MemoryAccesses(Vec<MemoryAccessRecord>),
    CycleStages(CycleStageBatch),
    Incomplete(Vec<IncompleteEntity>),
    Finish(RunSummary),
}

/// Forwards every batch to an inner collector running on its own thread.
pub struct ThreadedCollector<C: RecordCollector + Send + 'static> {
    sender: Option<SyncSender<Batch>>,
    handle: Option<JoinHandle<Result<C>>>,
    finished: Option<C>,
}

impl<C: RecordCollector + Send + 'static> ThreadedCollector<C> {
    /// Spawn the writer thread. At most `queue_depth` batches wait in the
    /// channel before `add_*` calls block.
    pub fn spawn(mut inner: C, queue_depth: usize) -> Result<Self> {
        let (tx, rx) = sync_channel::<Batch>(queue_depth.max(1));
        let handle = thread::Builder::new()
            .name(WRITER_THREAD_NAME.to_string())
            .spawn(move || {
                for batch in rx {
                    match batch {
                        Batch::Instructions(records) => inner.add_instructions(records)?,
                        Batch::MemoryAccesses(records) => inner.add_memory_accesses(records)?,
                        Batch::CycleStages(batch) => inner.add_cycle_stages(batch)?,
                        Batch::Incomplete(entities) => inner.add_incomplete(entities)?,
                        Batch::Finish(summary) => inner.finish(&summary)?,
                    }
                }
                debug!("writer thread drained");
                Ok(inner)
            })
            .context("Failed to spawn writer thread")?;

        Ok(Self {
            sender: Some(tx),
            handle: Some(handle),
            finished: None,
        })
    }

    fn send(&mut self, batch: Batch) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("writer thread has already stopped"))?;
        if sender.send(batch).is_err() {
            // The receiver only goes away when the thread returned early
            return Err(self.join().err().unwrap_or_else(|| {
                anyhow!("writer thread stopped without reporting an error")
            }));
        }
        Ok(())
    }

    /// Close the channel and wait for the writer to drain it.
    fn join(&mut self) -> Result<C> {
        drop(self.sender.take());
        let Some(handle) = self.handle.take() else {
            bail!("writer thread has already stopped");
        };
        match handle.join() {
            Ok(result) => result.context("Writer thread failed"),
            Err(_) => bail!("writer thread panicked"),
        }
    }

    /// Return the inner collector, waiting for the writer if it is still running.
    pub fn into_inner(mut self) -> Result<C> {
        match self.finished.take() {
            Some(inner) => Ok(inner),
            None => self.join(),
        }
    }
}

impl<C: RecordCollector + Send + 'static> RecordCollector for ThreadedCollector<C> {
    fn add_instructions(&mut self, records: Vec<InstructionRecord>) -> Result<()> {
        self.send(Batch::Instructions(records))
    }

    fn add_memory_accesses(&mut self, records: Vec<MemoryAccessRecord>) -> Result<()> {
        self.send(Batch::MemoryAccesses(records))
    }

    fn add_cycle_stages(&mut self, batch: CycleStageBatch) -> Result<()> {
        self.send(Batch::CycleStages(batch))
    }

    fn add_incomplete(&mut self, entities: Vec<IncompleteEntity>) -> Result<()> {
        self.send(Batch::Incomplete(entities))
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.send(Batch::Finish(summary.clone()))?;
        self.finished = Some(self.join()?);
        Ok(())
    }
}

impl<C: RecordCollector + Send + 'static> Drop for ThreadedCollector<C> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{InMemoryCollector, RunStatus};

    /// Fails on the first instruction batch.
    struct FailingCollector;

    impl RecordCollector for FailingCollector {
        fn add_instructions(&mut self, _: Vec<InstructionRecord>) -> Result<()> {
            bail!("disk full")
        }
        fn add_memory_accesses(&mut self, _: Vec<MemoryAccessRecord>) -> Result<()> {
            Ok(())
        }
        fn add_cycle_stages(&mut self, _: CycleStageBatch) -> Result<()> {
            Ok(())
        }
        fn add_incomplete(&mut self, _: Vec<IncompleteEntity>) -> Result<()> {
            Ok(())
        }
        fn finish(&mut self, _: &RunSummary) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_batches_reach_inner_collector() {
        let mut collector = ThreadedCollector::spawn(InMemoryCollector::new(), 1).unwrap();
        for _ in 0..5 {
            collector.add_instructions(Vec::new()).unwrap();
        }
        collector.add_cycle_stages(CycleStageBatch::default()).unwrap();
        collector
            .finish(&RunSummary {
                status: RunStatus::Complete,
                ..Default::default()
            })
            .unwrap();

        let data = collector.into_inner().unwrap().into_data();
        assert_eq!(data.instruction_batch_sizes.len(), 5);
        assert_eq!(data.cycle_batches.len(), 1);
        assert_eq!(data.summary.map(|s| s.status), Some(RunStatus::Complete));
    }

    #[test]
    fn test_writer_error_surfaces() {
        let mut collector = ThreadedCollector::spawn(FailingCollector, 1).unwrap();
        let mut result = Ok(());
        // The failure shows up on a later send or at finish at the latest
        for _ in 0..4 {
            result = collector.add_instructions(Vec::new());
            if result.is_err() {
                break;
            }
        }
        let result = result.and_then(|_| collector.finish(&RunSummary::default()));
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("disk full"));
    }
}
