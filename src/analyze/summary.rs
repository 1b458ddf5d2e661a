//! Whole-database summaries.

use anyhow::{bail, Result};
use rusqlite::params;
use serde::Serialize;

use super::{quote_ident, AnalyzeDb, TableInfo};
use crate::record::RunSummary;

/// Sum of one integer column.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ColumnSum {
    pub column: String,
    pub sum: i64,
}

/// Row count and column sums of one table.
#[derive(Debug, Serialize)]
pub struct TableSummary {
    pub table: String,
    pub row_count: u64,
    pub sums: Vec<ColumnSum>,
}

/// Totals of the instruction timing buckets.
#[derive(Debug, Default, PartialEq, Eq, Serialize)]
pub struct BucketTotals {
    pub instructions: u64,
    pub length: u64,
    pub fetch: u64,
    pub stall: u64,
    pub issue: u64,
    pub active: u64,
}

/// Overview of an ingested database.
#[derive(Debug, Serialize)]
pub struct TraceSummary {
    pub database_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunSummary>,
    pub tables: Vec<TableInfo>,
    pub buckets: BucketTotals,
}

impl AnalyzeDb {
    /// Sum every INTEGER column of `table`.
    pub fn table_summary(&self, table: &str) -> Result<TableSummary> {
        let columns: Vec<String> = self
            .describe_table(table)?
            .into_iter()
            .filter(|c| c.data_type.eq_ignore_ascii_case("INTEGER"))
            .map(|c| c.name)
            .collect();
        let row_count = self.table_row_count(table)?;
        if columns.is_empty() {
            return Ok(TableSummary {
                table: table.to_string(),
                row_count,
                sums: Vec::new(),
            });
        }

        let select: Vec<String> = columns
            .iter()
            .map(|c| format!("COALESCE(SUM({}), 0)", quote_ident(c)))
            .collect();
        let sql = format!("SELECT {} FROM {}", select.join(", "), quote_ident(table));
        let sums = self.connection().query_row(&sql, [], |row| {
            columns
                .iter()
                .enumerate()
                .map(|(i, column)| {
                    Ok(ColumnSum {
                        column: column.clone(),
                        sum: row.get(i)?,
                    })
                })
                .collect::<rusqlite::Result<Vec<_>>>()
        })?;

        Ok(TableSummary {
            table: table.to_string(),
            row_count,
            sums,
        })
    }

    /// Bucket totals over all instructions, or those of one compute unit.
    pub fn bucket_totals(&self, cu: Option<u32>) -> Result<BucketTotals> {
        if !self.table_exists("instruction")? {
            bail!("{} has no instruction table", self.path().display());
        }
        let totals = self.connection().query_row(
            "SELECT COUNT(*), COALESCE(SUM(length), 0), COALESCE(SUM(fetch), 0),
                    COALESCE(SUM(stall), 0), COALESCE(SUM(issue), 0), COALESCE(SUM(active), 0)
             FROM instruction WHERE ?1 IS NULL OR cu = ?1",
            params![cu],
            |row| {
                Ok(BucketTotals {
                    instructions: row.get::<_, i64>(0)? as u64,
                    length: row.get::<_, i64>(1)? as u64,
                    fetch: row.get::<_, i64>(2)? as u64,
                    stall: row.get::<_, i64>(3)? as u64,
                    issue: row.get::<_, i64>(4)? as u64,
                    active: row.get::<_, i64>(5)? as u64,
                })
            },
        )?;
        Ok(totals)
    }

    /// Run metadata, table sizes and bucket totals.
    pub fn trace_summary(&self) -> Result<TraceSummary> {
        Ok(TraceSummary {
            database_path: self.path().display().to_string(),
            run: self.run_summary()?,
            tables: self.list_tables()?,
            buckets: self.bucket_totals(None)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sample_db;
    use super::*;

    #[test]
    fn test_bucket_totals() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let all = db.bucket_totals(None).unwrap();
        assert_eq!(all.instructions, 4);
        assert_eq!(all.length, 14);
        assert_eq!(all.fetch + all.stall + all.issue + all.active, all.length);

        let cu1 = db.bucket_totals(Some(1)).unwrap();
        assert_eq!(cu1.instructions, 1);
        assert_eq!(cu1.length, 3);
    }

    #[test]
    fn test_table_summary() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let summary = db.table_summary("memory_access").unwrap();
        assert_eq!(summary.row_count, 3);
        let length = summary.sums.iter().find(|s| s.column == "length").unwrap();
        assert_eq!(length.sum, 20);
        assert!(summary.sums.iter().all(|s| s.column != "module"));
    }

    #[test]
    fn test_trace_summary() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let summary = db.trace_summary().unwrap();
        assert_eq!(summary.run.unwrap().trace, "sample");
        assert!(summary.tables.iter().any(|t| t.name == "incomplete_entity"));
        assert_eq!(summary.buckets.instructions, 4);
    }
}
