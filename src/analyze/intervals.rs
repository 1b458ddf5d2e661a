//! Busy-interval analysis of a compute unit.
//!
//! Every instruction occupies `[start, start + length)`. Overlapping or
//! touching ranges are merged, and the merged ranges give the cycles during
//! which the unit had at least one instruction in flight.

use anyhow::Result;
use rusqlite::params;
use serde::Serialize;

use super::AnalyzeDb;

/// Half-open cycle range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Interval {
    pub start: u64,
    pub end: u64,
}

impl Interval {
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge intervals into disjoint, sorted ranges.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_unstable();
    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => last.end = last.end.max(interval.end),
            _ => merged.push(interval),
        }
    }
    merged
}

/// Busy ranges of one compute unit.
#[derive(Debug, Serialize)]
pub struct BusyIntervals {
    pub cu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_action: Option<String>,
    pub instructions: u64,
    pub busy_cycles: u64,
    /// Last cycle any instruction of the unit was in flight.
    pub last_cycle: u64,
    pub intervals: Vec<Interval>,
}

impl AnalyzeDb {
    /// Merge the lifetimes of a compute unit's instructions, optionally only
    /// those with the given `unit_action` (e.g. `MEM LD`).
    pub fn busy_intervals(&self, cu: u32, unit_action: Option<&str>) -> Result<BusyIntervals> {
        let mut stmt = self.connection().prepare(
            "SELECT start, length FROM instruction \
             WHERE cu = ?1 AND (?2 IS NULL OR unit_action = ?2) \
             ORDER BY inst_order",
        )?;
        let intervals = stmt
            .query_map(params![cu, unit_action], |row| {
                let start = row.get::<_, i64>(0)? as u64;
                let length = row.get::<_, i64>(1)? as u64;
                Ok(Interval {
                    start,
                    end: start + length,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let instructions = intervals.len() as u64;
        let last_cycle = intervals.iter().map(|i| i.end).max().unwrap_or(0);
        let merged = merge_intervals(intervals);
        Ok(BusyIntervals {
            cu,
            unit_action: unit_action.map(str::to_string),
            instructions,
            busy_cycles: merged.iter().map(Interval::len).sum(),
            last_cycle,
            intervals: merged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sample_db;
    use super::*;

    fn iv(start: u64, end: u64) -> Interval {
        Interval { start, end }
    }

    #[test]
    fn test_touching_intervals_merge() {
        let merged = merge_intervals(vec![iv(0, 4), iv(4, 6)]);
        assert_eq!(merged, vec![iv(0, 6)]);
        assert_eq!(merged[0].len(), 6);
    }

    #[test]
    fn test_merge_unsorted_and_nested() {
        let merged = merge_intervals(vec![iv(10, 12), iv(0, 5), iv(1, 2), iv(3, 8), iv(20, 20)]);
        assert_eq!(merged, vec![iv(0, 8), iv(10, 12), iv(20, 20)]);
        assert!(merge_intervals(Vec::new()).is_empty());
    }

    #[test]
    fn test_busy_intervals_from_db() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let busy = db.busy_intervals(0, None).unwrap();
        assert_eq!(busy.instructions, 3);
        assert_eq!(busy.intervals, vec![iv(0, 6), iv(10, 15)]);
        assert_eq!(busy.busy_cycles, 11);
        assert_eq!(busy.last_cycle, 15);

        let loads = db.busy_intervals(0, Some("MEM LD")).unwrap();
        assert_eq!(loads.intervals, vec![iv(0, 4), iv(10, 15)]);
        assert_eq!(loads.busy_cycles, 9);

        assert_eq!(db.busy_intervals(7, None).unwrap().instructions, 0);
    }
}
