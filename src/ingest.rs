//! Ingestion orchestrator.
//!
//! Reads a trace strictly in order, keeps the global clock, routes every
//! classified event to its tracker and hands full buffers to a
//! [`RecordCollector`]. At end of stream everything still buffered is drained;
//! on abort or cancellation only fully closed records are flushed and the run
//! is marked as such.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Error, Result};
use clap::ValueEnum;
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use serde::Serialize;

use crate::classify::{classify_line, TraceEvent};
use crate::cycle::CycleStageAggregator;
use crate::error::TrackError;
use crate::instruction::InstructionTracker;
use crate::memory::{MemoryAccessTracker, MemoryOpen};
use crate::record::{RecordCollector, RunStatus, RunSummary, ThreadedCollector};
use crate::sqlite::{run_status, CycleLayout, SqliteStore};
use crate::trace::constants::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_QUEUE_DEPTH};
use crate::trace::{CycleStageBatch, InstructionRecord, MemoryAccessRecord};

const READ_BUFFER_SIZE: usize = 256 * 1024;

/// What to do when an event references an entity out of order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Stop the run and mark it aborted.
    #[default]
    Abort,
    /// Count the error, log it and keep going.
    Skip,
}

/// Ingestion settings.
#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Closed records buffered per tracker before a forced batch write.
    pub flush_threshold: usize,
    /// Batches queued for the writer thread before the reader blocks.
    pub queue_depth: usize,
    /// Persist batches on a dedicated writer thread.
    pub threaded: bool,
    pub error_policy: ErrorPolicy,
    pub cycle_layout: CycleLayout,
    /// Re-ingest even if the output already holds a complete run.
    pub force: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            threaded: false,
            error_policy: ErrorPolicy::Abort,
            cycle_layout: CycleLayout::Normalized,
            force: false,
        }
    }
}

/// Drives one trace through the trackers into a collector.
pub struct Ingestor<C: RecordCollector> {
    error_policy: ErrorPolicy,
    collector: C,
    instructions: InstructionTracker,
    memory: MemoryAccessTracker,
    cycles: CycleStageAggregator,
    clock: u64,
    summary: RunSummary,
    cancel: Option<Arc<AtomicBool>>,
}

impl<C: RecordCollector> Ingestor<C> {
    pub fn new(config: &IngestConfig, collector: C) -> Self {
        Self {
            error_policy: config.error_policy,
            collector,
            instructions: InstructionTracker::new(config.flush_threshold),
            memory: MemoryAccessTracker::new(config.flush_threshold),
            cycles: CycleStageAggregator::new(config.flush_threshold),
            clock: 0,
            summary: RunSummary::default(),
            cancel: None,
        }
    }

    /// Name recorded as the run's trace.
    pub fn with_trace_name(mut self, name: impl Into<String>) -> Self {
        self.summary.trace = name.into();
        self
    }

    /// Stop cleanly once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn into_collector(self) -> C {
        self.collector
    }

    /// Classify and apply one line, flushing any buffer that became full.
    ///
    /// Tracking errors go through the error policy; storage errors are
    /// always returned.
    pub fn process_line(&mut self, line: &str) -> Result<()> {
        self.summary.lines += 1;
        let Some(event) = classify_line(line) else {
            self.summary.unmatched_lines += 1;
            return Ok(());
        };

        if let Err(err) = self.apply(event) {
            match self.error_policy {
                ErrorPolicy::Abort => {
                    return Err(err).with_context(|| format!("line {}", self.summary.lines));
                }
                ErrorPolicy::Skip => {
                    self.summary.skipped_errors += 1;
                    warn!("line {}: {err}, skipping", self.summary.lines);
                }
            }
        }
        self.flush_full()
    }

    fn apply(&mut self, event: TraceEvent) -> Result<(), TrackError> {
        let cycle = self.clock;
        match event {
            TraceEvent::ClockTick { cycle: next } => {
                if next < cycle {
                    return Err(TrackError::ClockRegression {
                        from: cycle,
                        to: next,
                    });
                }
                self.clock = next;
                self.cycles.advance(next);
            }
            TraceEvent::InstructionOpened { key, stage, meta } => {
                self.instructions
                    .open(key, cycle, &stage, meta, &mut self.cycles)?;
            }
            TraceEvent::InstructionTransitioned { key, stage } => {
                self.instructions
                    .transition(key, cycle, &stage, &mut self.cycles)?;
            }
            TraceEvent::InstructionClosed { key } => {
                self.instructions.close(key, cycle, &mut self.cycles)?;
            }
            TraceEvent::MemoryOpened {
                id,
                module,
                access_type,
                address,
                action,
            } => {
                self.memory.open(
                    &id,
                    cycle,
                    MemoryOpen {
                        module,
                        access_type,
                        address,
                        action,
                    },
                )?;
            }
            TraceEvent::MemoryUpdated { id, module, action } => {
                self.memory.update(&id, cycle, &module, &action)?;
            }
            TraceEvent::MemoryClosed { id } => {
                self.memory.close(&id, cycle)?;
            }
        }
        Ok(())
    }

    fn write_instructions(&mut self, batch: Vec<InstructionRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.summary.instructions += batch.len() as u64;
        debug!("flushing {} instructions", batch.len());
        self.collector
            .add_instructions(batch)
            .context("Failed to flush instructions")
    }

    fn write_memory_accesses(&mut self, batch: Vec<MemoryAccessRecord>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        self.summary.memory_accesses += batch.len() as u64;
        debug!("flushing {} memory accesses", batch.len());
        self.collector
            .add_memory_accesses(batch)
            .context("Failed to flush memory accesses")
    }

    fn write_cycle_stages(&mut self, batches: Vec<CycleStageBatch>) -> Result<()> {
        for batch in batches {
            self.summary.cycle_rows += batch.rows.len() as u64;
            debug!("flushing {} cycles of cu {}", batch.rows.len(), batch.cu);
            self.collector
                .add_cycle_stages(batch)
                .context("Failed to flush cycle stages")?;
        }
        Ok(())
    }

    /// Hand over every buffer that reached the flush threshold.
    fn flush_full(&mut self) -> Result<()> {
        if let Some(batch) = self.instructions.take_full_batch() {
            self.write_instructions(batch)?;
        }
        if let Some(batch) = self.memory.take_full_batch() {
            self.write_memory_accesses(batch)?;
        }
        let batches = self.cycles.take_full_batches();
        self.write_cycle_stages(batches)
    }

    /// Hand over every closed record, leaving open ones and current cycles alone.
    fn flush_closed(&mut self) -> Result<()> {
        let batch = self.instructions.take_closed();
        self.write_instructions(batch)?;
        let batch = self.memory.take_closed();
        self.write_memory_accesses(batch)?;
        let batches = self.cycles.take_closed();
        self.write_cycle_stages(batches)
    }

    /// Flush everything at end of stream.
    ///
    /// Entities that never closed are reported as incomplete rather than
    /// written as regular records.
    pub fn drain_all(&mut self) -> Result<()> {
        let mut incomplete = self.instructions.drain_open();
        incomplete.extend(self.memory.drain_open());
        for entity in &incomplete {
            warn!(
                "{} {} never closed (opened at cycle {}, last seen at cycle {} in {})",
                entity.kind, entity.key, entity.start, entity.last_cycle, entity.last_stage
            );
        }

        let batch = self.instructions.take_closed();
        self.write_instructions(batch)?;
        let batch = self.memory.take_closed();
        self.write_memory_accesses(batch)?;
        let batches = self.cycles.drain_all();
        self.write_cycle_stages(batches)?;

        if !incomplete.is_empty() {
            self.summary.incomplete += incomplete.len() as u64;
            self.collector
                .add_incomplete(incomplete)
                .context("Failed to record incomplete entities")?;
        }
        Ok(())
    }

    /// Flush closed records and record the run as stopped by `err`.
    fn stop(&mut self, status: RunStatus, err: Error) -> Error {
        if let Err(flush_err) = self.flush_closed() {
            warn!("Failed to flush closed records: {flush_err:#}");
        }
        self.summary.status = status;
        self.summary.last_cycle = self.clock;
        self.summary.error = Some(format!("{err:#}"));
        if let Err(finish_err) = self.collector.finish(&self.summary) {
            warn!("Failed to record run status: {finish_err:#}");
        }
        err
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Ingest the whole stream and finish the collector.
    pub fn run<R: BufRead>(&mut self, mut reader: R) -> Result<RunSummary> {
        let mut buf = Vec::new();
        loop {
            if self.cancelled() {
                return Err(self.stop(RunStatus::Cancelled, anyhow!("ingestion cancelled")));
            }

            buf.clear();
            let read = match reader.read_until(b'\n', &mut buf) {
                Ok(read) => read,
                Err(err) => {
                    let err = Error::new(err).context("Failed to read trace");
                    return Err(self.stop(RunStatus::Aborted, err));
                }
            };
            if read == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            if let Err(err) = self.process_line(line.trim_end_matches(['\n', '\r'])) {
                return Err(self.stop(RunStatus::Aborted, err));
            }
        }

        if let Err(err) = self.drain_all() {
            return Err(self.stop(RunStatus::Aborted, err));
        }
        self.summary.status = RunStatus::Complete;
        self.summary.last_cycle = self.clock;
        self.collector
            .finish(&self.summary)
            .context("Failed to finish run")?;

        info!(
            "Ingested {} lines up to cycle {}: {} instructions, {} memory accesses, {} cycle rows",
            self.summary.lines,
            self.summary.last_cycle,
            self.summary.instructions,
            self.summary.memory_accesses,
            self.summary.cycle_rows
        );
        if self.summary.skipped_errors > 0 {
            warn!("Skipped {} out-of-order events", self.summary.skipped_errors);
        }
        Ok(self.summary.clone())
    }
}

/// Open a trace for reading, decompressing `.gz` files on the fly.
pub fn open_trace(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    if name.ends_with(".gz") {
        let decoder = MultiGzDecoder::new(reader);
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, decoder)))
    } else {
        Ok(Box::new(reader))
    }
}

/// Result of [`ingest_to_sqlite`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The output already held a complete run and `force` was not set.
    AlreadyComplete,
    Ingested(RunSummary),
}

/// Ingest `trace` into a fresh SQLite database at `output`.
pub fn ingest_to_sqlite(
    trace: &Path,
    output: &Path,
    config: &IngestConfig,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<IngestOutcome> {
    if !config.force && run_status(output)? == Some(RunStatus::Complete) {
        info!(
            "{} already holds a complete run, skipping (use --force to re-ingest)",
            output.display()
        );
        return Ok(IngestOutcome::AlreadyComplete);
    }

    let reader = open_trace(trace)?;
    let name = trace.display().to_string();
    let store = SqliteStore::create(output, config.cycle_layout, &name)?;
    info!(
        "Ingesting {} (flush threshold {}, {:?} cycle layout)",
        name, config.flush_threshold, config.cycle_layout
    );

    let summary = if config.threaded {
        let collector = ThreadedCollector::spawn(store, config.queue_depth)?;
        run_ingestor(config, collector, name, cancel, reader)?
    } else {
        run_ingestor(config, store, name, cancel, reader)?
    };
    Ok(IngestOutcome::Ingested(summary))
}

fn run_ingestor<C: RecordCollector, R: BufRead>(
    config: &IngestConfig,
    collector: C,
    name: String,
    cancel: Option<Arc<AtomicBool>>,
    reader: R,
) -> Result<RunSummary> {
    let mut ingestor = Ingestor::new(config, collector).with_trace_name(name);
    if let Some(flag) = cancel {
        ingestor = ingestor.with_cancel_flag(flag);
    }
    ingestor.run(reader)
}
