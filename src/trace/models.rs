//! Trace record structs shared between simtrace and simtrace-analyze.
//!
//! These structs represent the finalized entities handed from the trackers to a
//! [`RecordCollector`](crate::record::RecordCollector). Once a record has been
//! handed over it is never mutated again.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::error::EntityKind;

/// Composite key of an instruction.
///
/// Instruction ids are only unique within a compute unit, so the key always
/// carries both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct InstructionKey {
    pub cu: u32,
    pub id: u64,
}

impl InstructionKey {
    pub fn new(cu: u32, id: u64) -> Self {
        Self { cu, id }
    }
}

impl fmt::Display for InstructionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.cu, self.id)
    }
}

/// Static metadata carried by an `si.new_inst` line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstructionMeta {
    pub ib: u32,
    pub wg: u32,
    pub wf: u32,
    pub uop_id: u64,
    pub asm: String,
}

/// Scalar or vector instruction, decided from the assembly mnemonic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ScalarVector {
    Scalar,
    Vector,
}

impl ScalarVector {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarVector::Scalar => "S",
            ScalarVector::Vector => "V",
        }
    }
}

/// Functional unit and action of an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UnitAction {
    LdsLoad,
    LdsStore,
    LdsOther,
    MemLoad,
    MemStore,
    Other,
}

impl UnitAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitAction::LdsLoad => "LDS LD",
            UnitAction::LdsStore => "LDS ST",
            UnitAction::LdsOther => "LDS OT",
            UnitAction::MemLoad => "MEM LD",
            UnitAction::MemStore => "MEM ST",
            UnitAction::Other => "OTHER",
        }
    }

    /// Display color used when plotting this unit.
    pub fn color(&self) -> &'static str {
        match self {
            UnitAction::LdsLoad => "#2ca02c",
            UnitAction::LdsStore => "#98df8a",
            UnitAction::LdsOther => "#bcbd22",
            UnitAction::MemLoad => "#d62728",
            UnitAction::MemStore => "#1f77b4",
            UnitAction::Other => "#7f7f7f",
        }
    }
}

/// One `(cycle, stage)` observation in an instruction's life.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageEntry {
    pub cycle: u64,
    pub stage: String,
}

/// A run of consecutive identical stages, compressed to its duration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageRun {
    pub duration: u64,
    pub stage: String,
}

/// Cycles spent in each timing bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BucketDurations {
    pub fetch: u64,
    pub stall: u64,
    pub issue: u64,
    pub active: u64,
}

impl BucketDurations {
    pub fn total(&self) -> u64 {
        self.fetch + self.stall + self.issue + self.active
    }
}

/// A closed instruction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InstructionRecord {
    pub key: InstructionKey,
    pub meta: InstructionMeta,
    /// 1-based order in which the instruction was opened.
    pub inst_order: u64,
    pub start: u64,
    pub end: u64,
    pub length: u64,
    /// Full history, terminated by an `end` entry at the close cycle.
    pub history: Vec<StageEntry>,
    pub runs: Vec<StageRun>,
    pub buckets: BucketDurations,
    pub scalar_vector: ScalarVector,
    pub unit_action: UnitAction,
}

/// One module visit of a memory access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryEntry {
    pub cycle: u64,
    pub module: String,
    pub action: String,
}

/// A closed memory access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryAccessRecord {
    pub id: String,
    pub module: String,
    pub access_type: String,
    pub address: String,
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub history: Vec<MemoryEntry>,
    pub miss: u64,
}

/// Stage occurrence counts of one compute unit during one cycle.
///
/// Keys are normalised stage column names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleStageRow {
    pub cu: u32,
    pub cycle: u64,
    pub counts: BTreeMap<String, u64>,
}

/// Closed cycle rows of one compute unit, with every stage column known so far.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleStageBatch {
    pub cu: u32,
    pub stages: Vec<String>,
    pub rows: Vec<CycleStageRow>,
}

/// An entity still open when the trace ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IncompleteEntity {
    pub kind: EntityKind,
    pub key: String,
    pub cu: Option<u32>,
    pub start: u64,
    pub last_cycle: u64,
    pub last_stage: String,
}
