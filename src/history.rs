//! Run-length segmentation of an instruction's stage history.
//!
//! An instruction's life is recorded as ordered `(cycle, stage)` observations.
//! [`Runs`] lazily merges consecutive observations with the same stage into a
//! single run whose duration reaches the start of the next distinct stage, or
//! the close cycle for the last run. [`StageBucket`] then folds runs into the
//! fetch/stall/issue/active timing buckets.

use crate::trace::{BucketDurations, StageEntry, StageRun};

/// Timing bucket of a stage label.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageBucket {
    Fetch,
    Stall,
    Issue,
    Active,
}

impl StageBucket {
    /// Classify a raw stage label.
    ///
    /// `f` is fetch, `i` is issue, the `s_*` and `su-*` families are stalls and
    /// everything else (including `end`) counts as active.
    pub fn of(stage: &str) -> Self {
        if stage == "f" {
            StageBucket::Fetch
        } else if stage == "i" {
            StageBucket::Issue
        } else if stage.starts_with("s_") || stage.starts_with("su-") {
            StageBucket::Stall
        } else {
            StageBucket::Active
        }
    }
}

/// Lazy iterator over the compressed runs of a stage history.
///
/// Runs are borrowed from the history; nothing is shared between records.
pub struct Runs<'a> {
    history: &'a [StageEntry],
    close_cycle: u64,
    pos: usize,
}

impl<'a> Runs<'a> {
    /// Segment `history` (which must not contain the terminal `end` entry),
    /// closing the final run at `close_cycle`.
    pub fn new(history: &'a [StageEntry], close_cycle: u64) -> Self {
        Self {
            history,
            close_cycle,
            pos: 0,
        }
    }
}

impl<'a> Iterator for Runs<'a> {
    type Item = (u64, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        let history = self.history;
        let first = history.get(self.pos)?;
        let next_distinct = history[self.pos..]
            .iter()
            .position(|entry| entry.stage != first.stage)
            .map(|offset| self.pos + offset);

        let run_end = match next_distinct {
            Some(index) => history[index].cycle,
            None => self.close_cycle,
        };
        self.pos = next_distinct.unwrap_or(history.len());

        Some((run_end.saturating_sub(first.cycle), first.stage.as_str()))
    }
}

/// Compress a history into owned runs and their bucket totals.
pub fn compress(history: &[StageEntry], close_cycle: u64) -> (Vec<StageRun>, BucketDurations) {
    let mut buckets = BucketDurations::default();
    let runs = Runs::new(history, close_cycle)
        .map(|(duration, stage)| {
            match StageBucket::of(stage) {
                StageBucket::Fetch => buckets.fetch += duration,
                StageBucket::Stall => buckets.stall += duration,
                StageBucket::Issue => buckets.issue += duration,
                StageBucket::Active => buckets.active += duration,
            }
            StageRun {
                duration,
                stage: stage.to_string(),
            }
        })
        .collect();
    (runs, buckets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(entries: &[(u64, &str)]) -> Vec<StageEntry> {
        entries
            .iter()
            .map(|(cycle, stage)| StageEntry {
                cycle: *cycle,
                stage: stage.to_string(),
            })
            .collect()
    }

    #[test]
    fn test_bucket_rules() {
        assert_eq!(StageBucket::of("f"), StageBucket::Fetch);
        assert_eq!(StageBucket::of("i"), StageBucket::Issue);
        assert_eq!(StageBucket::of("s_mem"), StageBucket::Stall);
        assert_eq!(StageBucket::of("su-r"), StageBucket::Stall);
        assert_eq!(StageBucket::of("su_r"), StageBucket::Active);
        assert_eq!(StageBucket::of("end"), StageBucket::Active);
        assert_eq!(StageBucket::of("e"), StageBucket::Active);
    }

    #[test]
    fn test_runs_merge_consecutive_stages() {
        let h = history(&[(10, "f"), (11, "f"), (12, "i"), (13, "i"), (15, "e"), (16, "f")]);
        let runs: Vec<_> = Runs::new(&h, 20).collect();
        assert_eq!(runs, vec![(2, "f"), (3, "i"), (1, "e"), (4, "f")]);
    }

    #[test]
    fn test_runs_empty_history() {
        assert_eq!(Runs::new(&[], 5).count(), 0);
    }

    #[test]
    fn test_compress_buckets_sum_to_length() {
        let h = history(&[(10, "f"), (11, "i"), (12, "su-r"), (15, "s_mem"), (17, "e")]);
        let (runs, buckets) = compress(&h, 25);
        assert_eq!(runs.len(), 5);
        assert_eq!(
            buckets,
            BucketDurations {
                fetch: 1,
                stall: 5,
                issue: 1,
                active: 8,
            }
        );
        assert_eq!(buckets.total(), 25 - 10);
    }

    #[test]
    fn test_runs_are_restartable() {
        let h = history(&[(0, "f"), (4, "i")]);
        let first: Vec<_> = Runs::new(&h, 6).collect();
        let second: Vec<_> = Runs::new(&h, 6).collect();
        assert_eq!(first, second);
    }
}
