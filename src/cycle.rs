//! Per-cycle stage occupancy aggregation.
//!
//! Every stage observation reported by the instruction tracker increments a
//! counter for `(cu, cycle, stage)`. Each compute unit keeps one "current"
//! cycle that is still accumulating; once the clock moves past it the row is
//! closed, becomes immutable and waits in the unit's closed buffer until it is
//! flushed.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::trace::{stage_column_name, CycleStageBatch, CycleStageRow};

/// Receiver of stage transitions reported by the instruction tracker.
pub trait StageObserver {
    fn observe(&mut self, cu: u32, cycle: u64, stage: &str);
}

#[derive(Debug, Default)]
struct UnitCycles {
    /// Normalised stage columns seen on this unit. Only ever grows.
    stages: BTreeSet<String>,
    current: Option<CycleStageRow>,
    closed: Vec<CycleStageRow>,
}

impl UnitCycles {
    fn close_current(&mut self) {
        if let Some(row) = self.current.take() {
            self.closed.push(row);
        }
    }

    fn batch(&mut self, cu: u32) -> CycleStageBatch {
        CycleStageBatch {
            cu,
            stages: self.stages.iter().cloned().collect(),
            rows: std::mem::take(&mut self.closed),
        }
    }
}

/// Accumulates per-cycle stage counts for every compute unit.
#[derive(Debug)]
pub struct CycleStageAggregator {
    units: BTreeMap<u32, UnitCycles>,
    /// Units whose closed buffer reached the flush threshold.
    full: BTreeSet<u32>,
    flush_threshold: usize,
}

impl CycleStageAggregator {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            units: BTreeMap::new(),
            full: BTreeSet::new(),
            flush_threshold: flush_threshold.max(1),
        }
    }

    /// Count one occurrence of `stage` on `cu` during `cycle`.
    pub fn observe(&mut self, cu: u32, cycle: u64, stage: &str) {
        let column = stage_column_name(stage);
        let unit = self.units.entry(cu).or_default();

        if unit.current.as_ref().is_some_and(|row| row.cycle != cycle) {
            unit.close_current();
            if unit.closed.len() >= self.flush_threshold {
                self.full.insert(cu);
            }
        }

        if !unit.stages.contains(&column) {
            debug!("cu {cu}: new stage column {column} at cycle {cycle}");
            unit.stages.insert(column.clone());
        }

        let row = unit.current.get_or_insert_with(|| CycleStageRow {
            cu,
            cycle,
            counts: BTreeMap::new(),
        });
        *row.counts.entry(column).or_insert(0) += 1;
    }

    /// Close every unit's current cycle that lies before `cycle`.
    pub fn advance(&mut self, cycle: u64) {
        for (cu, unit) in self.units.iter_mut() {
            if unit.current.as_ref().is_some_and(|row| row.cycle < cycle) {
                unit.close_current();
                if unit.closed.len() >= self.flush_threshold {
                    self.full.insert(*cu);
                }
            }
        }
    }

    /// Take the closed rows of every unit that reached the flush threshold.
    pub fn take_full_batches(&mut self) -> Vec<CycleStageBatch> {
        let full = std::mem::take(&mut self.full);
        full.into_iter()
            .filter_map(|cu| self.units.get_mut(&cu).map(|unit| unit.batch(cu)))
            .filter(|batch| !batch.rows.is_empty())
            .collect()
    }

    /// Take every closed row, leaving current cycles in place.
    pub fn take_closed(&mut self) -> Vec<CycleStageBatch> {
        self.full.clear();
        self.units
            .iter_mut()
            .map(|(cu, unit)| unit.batch(*cu))
            .filter(|batch| !batch.rows.is_empty())
            .collect()
    }

    /// Close every current cycle and take all rows.
    pub fn drain_all(&mut self) -> Vec<CycleStageBatch> {
        for unit in self.units.values_mut() {
            unit.close_current();
        }
        self.take_closed()
    }

    /// Stage columns known for `cu`, in column order.
    pub fn stages(&self, cu: u32) -> Vec<&str> {
        self.units
            .get(&cu)
            .map(|unit| unit.stages.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

impl StageObserver for CycleStageAggregator {
    fn observe(&mut self, cu: u32, cycle: u64, stage: &str) {
        CycleStageAggregator::observe(self, cu, cycle, stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(row: &CycleStageRow) -> Vec<(&str, u64)> {
        row.counts.iter().map(|(k, v)| (k.as_str(), *v)).collect()
    }

    #[test]
    fn test_counts_within_cycle() {
        let mut agg = CycleStageAggregator::new(16);
        agg.observe(0, 10, "f");
        agg.observe(0, 10, "f");
        agg.observe(0, 10, "su-r");

        assert!(agg.take_closed().is_empty());

        let batches = agg.drain_all();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].stages, vec!["f", "su_r"]);
        assert_eq!(counts(&batches[0].rows[0]), vec![("f", 2), ("su_r", 1)]);
    }

    #[test]
    fn test_advance_closes_past_cycles() {
        let mut agg = CycleStageAggregator::new(16);
        agg.observe(0, 10, "f");
        agg.observe(1, 10, "i");
        agg.advance(10);
        assert!(agg.take_closed().is_empty());

        agg.advance(11);
        let batches = agg.take_closed();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].cu, 0);
        assert_eq!(batches[1].cu, 1);
        assert_eq!(batches[1].rows[0].cycle, 10);
    }

    #[test]
    fn test_new_cycle_closes_previous() {
        let mut agg = CycleStageAggregator::new(16);
        agg.observe(0, 1, "f");
        agg.observe(0, 2, "i");

        let closed = agg.take_closed();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].rows.len(), 1);
        assert_eq!(closed[0].rows[0].cycle, 1);
    }

    #[test]
    fn test_stage_set_only_grows() {
        let mut agg = CycleStageAggregator::new(16);
        agg.observe(3, 1, "f");
        agg.observe(3, 2, "su-r");
        agg.drain_all();
        agg.observe(3, 3, "i");
        assert_eq!(agg.stages(3), vec!["f", "i", "su_r"]);
        assert!(agg.stages(4).is_empty());

        // Later batches still carry the columns of earlier cycles
        let batches = agg.drain_all();
        assert_eq!(batches[0].stages, vec!["f", "i", "su_r"]);
        assert_eq!(counts(&batches[0].rows[0]), vec![("i", 1)]);
    }

    #[test]
    fn test_full_batches() {
        let mut agg = CycleStageAggregator::new(2);
        agg.observe(0, 1, "f");
        agg.observe(0, 2, "f");
        assert!(agg.take_full_batches().is_empty());

        agg.observe(0, 3, "f");
        let full = agg.take_full_batches();
        assert_eq!(full.len(), 1);
        assert_eq!(full[0].rows.len(), 2);
        assert!(agg.take_full_batches().is_empty());
    }
}
