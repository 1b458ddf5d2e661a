//! Stage occupancy totals of a compute unit.

use anyhow::{bail, Result};
use rusqlite::params;
use serde::Serialize;

use super::{quote_ident, AnalyzeDb};
use crate::trace::constants::{CYCLE_COLUMN, CYCLE_STAGE_TABLE};
use crate::trace::cycle_table_name;

/// Total occurrences of one stage on a compute unit.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct StageTotal {
    pub stage: String,
    pub total: u64,
    /// Cycles in which the stage was seen at least once.
    pub cycles: u64,
}

impl AnalyzeDb {
    /// Per-stage totals for `cu`, largest first.
    ///
    /// Reads the normalized table when it has rows for the unit and falls back
    /// to the unit's wide table otherwise.
    pub fn stage_totals(&self, cu: u32) -> Result<Vec<StageTotal>> {
        let normalized: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM cycle_stage WHERE cu = ?1",
            params![cu],
            |row| row.get(0),
        )?;
        if normalized > 0 {
            return self.stage_totals_normalized(cu);
        }

        let table = cycle_table_name(cu);
        if self.table_exists(&table)? {
            return self.stage_totals_wide(&table);
        }
        if self.table_exists(CYCLE_STAGE_TABLE)? {
            return Ok(Vec::new());
        }
        bail!("No cycle data for cu {cu}");
    }

    fn stage_totals_normalized(&self, cu: u32) -> Result<Vec<StageTotal>> {
        let mut stmt = self.connection().prepare(
            "SELECT stage, SUM(count), COUNT(DISTINCT cycle) FROM cycle_stage
             WHERE cu = ?1 GROUP BY stage ORDER BY SUM(count) DESC, stage",
        )?;
        let totals = stmt
            .query_map(params![cu], |row| {
                Ok(StageTotal {
                    stage: row.get(0)?,
                    total: row.get::<_, i64>(1)? as u64,
                    cycles: row.get::<_, i64>(2)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(totals)
    }

    fn stage_totals_wide(&self, table: &str) -> Result<Vec<StageTotal>> {
        let mut totals = Vec::new();
        for column in self.describe_table(table)? {
            if column.name == CYCLE_COLUMN {
                continue;
            }
            let quoted = quote_ident(&column.name);
            let (total, cycles): (i64, i64) = self.connection().query_row(
                &format!(
                    "SELECT COALESCE(SUM({quoted}), 0), COUNT({quoted}) FROM {}",
                    quote_ident(table)
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            totals.push(StageTotal {
                stage: column.name,
                total: total as u64,
                cycles: cycles as u64,
            });
        }
        totals.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.stage.cmp(&b.stage)));
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sample_db;
    use super::*;

    #[test]
    fn test_stage_totals() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let totals = db.stage_totals(0).unwrap();
        assert_eq!(
            totals,
            vec![
                StageTotal {
                    stage: "f".to_string(),
                    total: 3,
                    cycles: 2,
                },
                StageTotal {
                    stage: "i".to_string(),
                    total: 2,
                    cycles: 1,
                },
            ]
        );
        assert!(db.stage_totals(5).unwrap().is_empty());
    }
}
