//! Instruction lifecycle tracking.
//!
//! Instructions are opened by `si.new_inst`, move through pipeline stages with
//! `si.inst` and are closed by `si.end_inst`. Open instructions are keyed by
//! `(cu, id)` because the simulator reuses ids across compute units. Closed
//! instructions are buffered until the buffer reaches the flush threshold.

use std::collections::HashMap;

use log::trace;

use crate::cycle::StageObserver;
use crate::error::{EntityKind, TrackError};
use crate::history;
use crate::trace::constants::END_STAGE;
use crate::trace::{
    IncompleteEntity, InstructionKey, InstructionMeta, InstructionRecord, ScalarVector,
    StageEntry, UnitAction,
};

/// Scalar instructions start with `s`, everything else runs on the SIMD units.
pub fn scalar_vector(asm: &str) -> ScalarVector {
    if asm.starts_with('s') {
        ScalarVector::Scalar
    } else {
        ScalarVector::Vector
    }
}

/// Classify the functional unit and memory action of an instruction.
pub fn unit_action(asm: &str) -> UnitAction {
    if asm.starts_with("ds") {
        return if asm.contains("read") {
            UnitAction::LdsLoad
        } else if asm.contains("write") {
            UnitAction::LdsStore
        } else {
            UnitAction::LdsOther
        };
    }
    if asm.contains("load") {
        UnitAction::MemLoad
    } else if asm.contains("store") {
        UnitAction::MemStore
    } else {
        UnitAction::Other
    }
}

/// An instruction between its open and close events.
#[derive(Debug)]
struct OpenInstruction {
    meta: InstructionMeta,
    inst_order: u64,
    start: u64,
    history: Vec<StageEntry>,
}

/// Tracks in-flight instructions and buffers closed ones.
#[derive(Debug)]
pub struct InstructionTracker {
    open: HashMap<InstructionKey, OpenInstruction>,
    closed: Vec<InstructionRecord>,
    flush_threshold: usize,
    opened_total: u64,
}

impl InstructionTracker {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            open: HashMap::new(),
            closed: Vec::new(),
            flush_threshold: flush_threshold.max(1),
            opened_total: 0,
        }
    }

    /// Open a new instruction at `cycle` in its first `stage`.
    pub fn open(
        &mut self,
        key: InstructionKey,
        cycle: u64,
        stage: &str,
        meta: InstructionMeta,
        observer: &mut dyn StageObserver,
    ) -> Result<(), TrackError> {
        if self.open.contains_key(&key) {
            return Err(TrackError::DuplicateKey {
                kind: EntityKind::Instruction,
                key: key.to_string(),
            });
        }

        self.opened_total += 1;
        self.open.insert(
            key,
            OpenInstruction {
                meta,
                inst_order: self.opened_total,
                start: cycle,
                history: vec![StageEntry {
                    cycle,
                    stage: stage.to_string(),
                }],
            },
        );
        observer.observe(key.cu, cycle, stage);
        Ok(())
    }

    /// Record that an open instruction entered `stage` at `cycle`.
    pub fn transition(
        &mut self,
        key: InstructionKey,
        cycle: u64,
        stage: &str,
        observer: &mut dyn StageObserver,
    ) -> Result<(), TrackError> {
        let inst = self.open.get_mut(&key).ok_or_else(|| TrackError::UnknownKey {
            kind: EntityKind::Instruction,
            key: key.to_string(),
        })?;
        inst.history.push(StageEntry {
            cycle,
            stage: stage.to_string(),
        });
        observer.observe(key.cu, cycle, stage);
        Ok(())
    }

    /// Close an instruction at `cycle` and derive its timing fields.
    ///
    /// The finalized record is moved to the closed buffer and returned.
    pub fn close(
        &mut self,
        key: InstructionKey,
        cycle: u64,
        observer: &mut dyn StageObserver,
    ) -> Result<&InstructionRecord, TrackError> {
        let OpenInstruction {
            meta,
            inst_order,
            start,
            mut history,
        } = self.open.remove(&key).ok_or_else(|| TrackError::UnknownKey {
            kind: EntityKind::Instruction,
            key: key.to_string(),
        })?;

        let (runs, buckets) = history::compress(&history, cycle);
        history.push(StageEntry {
            cycle,
            stage: END_STAGE.to_string(),
        });
        observer.observe(key.cu, cycle, END_STAGE);

        let record = InstructionRecord {
            key,
            scalar_vector: scalar_vector(&meta.asm),
            unit_action: unit_action(&meta.asm),
            meta,
            inst_order,
            start,
            end: cycle,
            length: cycle.saturating_sub(start),
            history,
            runs,
            buckets,
        };
        trace!(
            "instruction {key} closed: length={} buckets={:?}",
            record.length,
            record.buckets
        );

        if self.closed.is_empty() {
            self.closed.reserve(self.flush_threshold);
        }
        self.closed.push(record);
        Ok(&self.closed[self.closed.len() - 1])
    }

    /// Take the closed buffer if it has reached the flush threshold.
    pub fn take_full_batch(&mut self) -> Option<Vec<InstructionRecord>> {
        if self.closed.len() >= self.flush_threshold {
            Some(std::mem::take(&mut self.closed))
        } else {
            None
        }
    }

    /// Take every buffered closed instruction.
    pub fn take_closed(&mut self) -> Vec<InstructionRecord> {
        std::mem::take(&mut self.closed)
    }

    /// Remove every still-open instruction, reporting each as incomplete.
    ///
    /// Entities are sorted by key so repeated runs report them identically.
    pub fn drain_open(&mut self) -> Vec<IncompleteEntity> {
        let mut open: Vec<_> = self.open.drain().collect();
        open.sort_by_key(|(key, _)| *key);
        open.into_iter()
            .map(|(key, inst)| {
                let last = inst.history.last();
                IncompleteEntity {
                    kind: EntityKind::Instruction,
                    key: key.to_string(),
                    cu: Some(key.cu),
                    start: inst.start,
                    last_cycle: last.map_or(inst.start, |entry| entry.cycle),
                    last_stage: last.map(|entry| entry.stage.clone()).unwrap_or_default(),
                }
            })
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}
