//! Analysis logic for querying ingested trace databases.
//!
//! This module provides the analysis functionality behind `simtrace-analyze`.
//! All methods are synchronous and work directly on a read-only SQLite
//! connection.

mod intervals;
mod memory;
mod query;
mod stages;
mod summary;

pub use intervals::{merge_intervals, BusyIntervals, Interval};
pub use memory::MemoryLatency;
pub use stages::StageTotal;
pub use summary::{BucketTotals, ColumnSum, TableSummary, TraceSummary};

use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::record::RunSummary;
use crate::sqlite::load_run_summary;
use query::{sqlite_value_to_json, sqlite_value_to_string};

/// Maximum number of rows returned by a query.
pub const MAX_QUERY_ROWS: usize = 10_000;

/// Result of a SQL query.
#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub row_count: usize,
    #[serde(skip_serializing_if = "is_false")]
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_row_count: Option<usize>,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// Table information.
#[derive(Debug, Serialize)]
pub struct TableInfo {
    pub name: String,
    pub row_count: u64,
}

/// Column information.
#[derive(Debug, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Wrapper around a SQLite connection for trace analysis.
pub struct AnalyzeDb {
    conn: Connection,
    path: PathBuf,
}

impl AnalyzeDb {
    /// Open a trace database read-only.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("Database not found: {}", path.display());
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Execute a SQL query and return typed results.
    pub fn query(&self, sql: &str) -> Result<QueryResult> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = column_names.len();
        let mut rows = stmt.query([])?;

        let mut rows_data: Vec<Vec<serde_json::Value>> = Vec::new();
        let mut total_count: usize = 0;
        let mut truncated = false;

        while let Some(row) = rows.next()? {
            total_count += 1;
            if rows_data.len() >= MAX_QUERY_ROWS {
                truncated = true;
                continue; // Keep counting for total
            }

            let mut row_values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                row_values.push(sqlite_value_to_json(row.get(i)?));
            }
            rows_data.push(row_values);
        }

        let row_count = rows_data.len();
        Ok(QueryResult {
            columns: column_names,
            rows: rows_data,
            row_count,
            truncated,
            total_row_count: if truncated { Some(total_count) } else { None },
        })
    }

    /// Execute a query and return rows as string vectors (for table/csv display).
    pub fn query_strings(&self, sql: &str) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let column_count = column_names.len();
        let mut rows = stmt.query([])?;

        let mut rows_data: Vec<Vec<String>> = Vec::new();
        while let Some(row) = rows.next()? {
            let mut row_values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                row_values.push(sqlite_value_to_string(row.get(i)?));
            }
            rows_data.push(row_values);
        }

        Ok((column_names, rows_data))
    }

    /// List all tables with row counts.
    pub fn list_tables(&self) -> Result<Vec<TableInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        names
            .into_iter()
            .map(|name| {
                let row_count = self.table_row_count(&name)?;
                Ok(TableInfo { name, row_count })
            })
            .collect()
    }

    /// Describe a table's schema.
    pub fn describe_table(&self, table_name: &str) -> Result<Vec<ColumnInfo>> {
        if !self.table_exists(table_name)? {
            bail!("Table not found: {table_name}");
        }

        let mut stmt = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(table_name)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    data_type: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(columns)
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn table_row_count(&self, table_name: &str) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table_name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// The recorded ingestion run, if the database has one.
    pub fn run_summary(&self) -> Result<Option<RunSummary>> {
        load_run_summary(&self.conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::record::{RecordCollector, RunStatus};
    use crate::sqlite::{CycleLayout, SqliteStore};
    use crate::trace::{
        CycleStageBatch, CycleStageRow, InstructionKey, InstructionMeta, InstructionRecord,
        MemoryAccessRecord,
    };
    use crate::trace::{BucketDurations, ScalarVector, UnitAction};

    pub fn instruction(cu: u32, id: u64, start: u64, length: u64, unit: UnitAction) -> InstructionRecord {
        InstructionRecord {
            key: InstructionKey::new(cu, id),
            meta: InstructionMeta::default(),
            inst_order: id,
            start,
            end: start + length,
            length,
            history: Vec::new(),
            runs: Vec::new(),
            buckets: BucketDurations {
                fetch: length.min(1),
                stall: 0,
                issue: 0,
                active: length.saturating_sub(1),
            },
            scalar_vector: ScalarVector::Vector,
            unit_action: unit,
        }
    }

    pub fn memory_access(id: &str, module: &str, access_type: &str, length: u64) -> MemoryAccessRecord {
        MemoryAccessRecord {
            id: id.to_string(),
            module: module.to_string(),
            access_type: access_type.to_string(),
            address: "0x0".to_string(),
            start: 0,
            end: length,
            length,
            history: Vec::new(),
            miss: 0,
        }
    }

    /// Write a small complete database and open it for analysis.
    pub fn sample_db(dir: &Path) -> AnalyzeDb {
        let path = dir.join("sample.db");
        let mut store = SqliteStore::create(&path, CycleLayout::Normalized, "sample").unwrap();
        store
            .add_instructions(vec![
                instruction(0, 1, 0, 4, UnitAction::MemLoad),
                instruction(0, 2, 4, 2, UnitAction::Other),
                instruction(0, 3, 10, 5, UnitAction::MemLoad),
                instruction(1, 1, 0, 3, UnitAction::Other),
            ])
            .unwrap();
        store
            .add_memory_accesses(vec![
                memory_access("A-1", "l1-cu0", "load", 7),
                memory_access("A-2", "l1-cu0", "load", 3),
                memory_access("A-3", "l2-0", "store", 10),
            ])
            .unwrap();
        store
            .add_cycle_stages(CycleStageBatch {
                cu: 0,
                stages: vec!["f".to_string(), "i".to_string()],
                rows: vec![
                    CycleStageRow {
                        cu: 0,
                        cycle: 0,
                        counts: [("f".to_string(), 2)].into_iter().collect(),
                    },
                    CycleStageRow {
                        cu: 0,
                        cycle: 1,
                        counts: [("f".to_string(), 1), ("i".to_string(), 2)]
                            .into_iter()
                            .collect(),
                    },
                ],
            })
            .unwrap();
        store
            .finish(&RunSummary {
                trace: "sample".to_string(),
                status: RunStatus::Complete,
                instructions: 4,
                memory_accesses: 3,
                cycle_rows: 2,
                ..Default::default()
            })
            .unwrap();
        drop(store);
        AnalyzeDb::open(&path).unwrap()
    }
}
