//! SQLite writer for ingested trace data
//!
//! This module implements `SqliteStore`, which appends finalized batches to the
//! tables defined in `schema.rs`. Each `append_batch` call runs in its own
//! transaction, so the database only ever contains whole batches. Wide
//! per-compute-unit cycle tables grow new stage columns through
//! `ensure_columns` as stages are discovered.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{debug, info};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

use crate::error::StoreError;
use crate::record::{RecordCollector, RunStatus, RunSummary};
use crate::trace::constants::{
    CYCLE_COLUMN, CYCLE_STAGE_TABLE, INCOMPLETE_ENTITY_TABLE, INSTRUCTION_TABLE,
    MEMORY_ACCESS_TABLE,
};
use crate::trace::{
    cycle_table_columns, cycle_table_name, ColumnDef, CycleStageBatch, IncompleteEntity,
    InstructionRecord, MemoryAccessRecord,
};

/// One row to append, keyed by column name. Absent columns are written as NULL.
pub type Row = BTreeMap<String, Value>;

/// How per-cycle stage counts are laid out on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CycleLayout {
    /// One `cycle_stage(cu, cycle, stage, count)` row per observed stage.
    #[default]
    Normalized,
    /// One `cycle_cu_<cu>` table per compute unit with a column per stage.
    Wide,
    Both,
}

impl CycleLayout {
    fn normalized(&self) -> bool {
        matches!(self, CycleLayout::Normalized | CycleLayout::Both)
    }

    fn wide(&self) -> bool {
        matches!(self, CycleLayout::Wide | CycleLayout::Both)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn int(v: u64) -> Value {
    Value::Integer(v as i64)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn row<const N: usize>(cells: [(&str, Value); N]) -> Row {
    cells
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// Build the `instruction` row of a closed instruction.
pub fn instruction_row(record: &InstructionRecord) -> serde_json::Result<Row> {
    let life_full: Vec<(u64, &str)> = record
        .history
        .iter()
        .map(|entry| (entry.cycle, entry.stage.as_str()))
        .collect();
    let life_lite: Vec<(u64, &str)> = record
        .runs
        .iter()
        .map(|run| (run.duration, run.stage.as_str()))
        .collect();

    Ok(row([
        ("cu", int(record.key.cu.into())),
        ("id", int(record.key.id)),
        ("inst_order", int(record.inst_order)),
        ("ib", int(record.meta.ib.into())),
        ("wg", int(record.meta.wg.into())),
        ("wf", int(record.meta.wf.into())),
        ("uop_id", int(record.meta.uop_id)),
        ("asm", text(&record.meta.asm)),
        ("scalar_vector", text(record.scalar_vector.as_str())),
        ("unit_action", text(record.unit_action.as_str())),
        ("color", text(record.unit_action.color())),
        ("start", int(record.start)),
        ("end", int(record.end)),
        ("length", int(record.length)),
        ("fetch", int(record.buckets.fetch)),
        ("stall", int(record.buckets.stall)),
        ("issue", int(record.buckets.issue)),
        ("active", int(record.buckets.active)),
        ("life_full", Value::Text(serde_json::to_string(&life_full)?)),
        ("life_lite", Value::Text(serde_json::to_string(&life_lite)?)),
    ]))
}

/// Build the `memory_access` row of a closed memory access.
pub fn memory_access_row(record: &MemoryAccessRecord) -> serde_json::Result<Row> {
    let history: Vec<(u64, &str, &str)> = record
        .history
        .iter()
        .map(|entry| (entry.cycle, entry.module.as_str(), entry.action.as_str()))
        .collect();

    Ok(row([
        ("id", text(&record.id)),
        ("module", text(&record.module)),
        ("access_type", text(&record.access_type)),
        ("address", text(&record.address)),
        ("start", int(record.start)),
        ("end", int(record.end)),
        ("length", int(record.length)),
        ("miss", int(record.miss)),
        ("history", Value::Text(serde_json::to_string(&history)?)),
    ]))
}

fn incomplete_row(entity: &IncompleteEntity) -> Row {
    row([
        ("kind", text(entity.kind.as_str())),
        ("key", text(&entity.key)),
        ("cu", entity.cu.map_or(Value::Null, |cu| int(cu.into()))),
        ("start", int(entity.start)),
        ("last_cycle", int(entity.last_cycle)),
        ("last_stage", text(&entity.last_stage)),
    ])
}

/// Append-only SQLite store with run-time schema evolution.
///
/// The store is the only owner of the on-disk schema and of commit
/// boundaries; a single writer is assumed.
pub struct SqliteStore {
    conn: Connection,
    layout: CycleLayout,
    /// Declared columns per table, name to declared type.
    columns: HashMap<String, BTreeMap<String, String>>,
}

impl SqliteStore {
    /// Create a fresh database at `path`, replacing any existing one.
    ///
    /// The run row is written immediately with status `running`, so a crash
    /// leaves a database that is recognisably incomplete.
    pub fn create(path: impl AsRef<Path>, layout: CycleLayout, trace: &str) -> Result<Self> {
        let path = path.as_ref();
        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            let file = Path::new(&file);
            if file.exists() {
                fs::remove_file(file)
                    .with_context(|| format!("Failed to remove {}", file.display()))?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        info!("Writing trace database to {}", path.display());
        Self::init(conn, layout, trace)
    }

    /// Create a store backed by an in-memory database.
    pub fn open_in_memory(layout: CycleLayout, trace: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn, layout, trace)
    }

    fn init(conn: Connection, layout: CycleLayout, trace: &str) -> Result<Self> {
        super::create_schema(&conn).context("Failed to create SQLite schema")?;
        conn.execute(
            "INSERT INTO ingest_run (id, trace, status, simtrace_version) VALUES (1, ?1, ?2, ?3)",
            params![trace, RunStatus::Running.as_str(), env!("CARGO_PKG_VERSION")],
        )
        .context("Failed to record ingest run")?;

        Ok(Self {
            conn,
            layout,
            columns: HashMap::new(),
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn layout(&self) -> CycleLayout {
        self.layout
    }

    /// Declared columns of `table`, loaded from `PRAGMA table_info` on first use.
    fn declared_columns<'a>(
        conn: &Connection,
        cache: &'a mut HashMap<String, BTreeMap<String, String>>,
        table: &str,
    ) -> Result<&'a mut BTreeMap<String, String>, StoreError> {
        if !cache.contains_key(table) {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
            let declared = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                })?
                .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
            cache.insert(table.to_string(), declared);
        }
        Ok(cache.entry(table.to_string()).or_default())
    }

    /// Make sure every column in `columns` exists on `table`.
    ///
    /// Missing columns are added with `ALTER TABLE`, leaving existing rows NULL
    /// for them; a table that does not exist yet is created. Calling this again
    /// with the same columns is a no-op. Returns the number of columns added.
    pub fn ensure_columns(&mut self, table: &str, columns: &[ColumnDef]) -> Result<usize, StoreError> {
        let declared = Self::declared_columns(&self.conn, &mut self.columns, table)?;

        let mut missing = Vec::new();
        for column in columns {
            // SQLite treats `F` and `f` as the same column
            let existing = declared
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
                .map(|(_, ty)| ty);
            match existing {
                Some(existing) if existing.eq_ignore_ascii_case(column.ty.as_sql()) => {}
                Some(existing) => {
                    return Err(StoreError::SchemaConflict {
                        table: table.to_string(),
                        column: column.name.clone(),
                        existing: existing.clone(),
                        requested: column.ty.as_sql().to_string(),
                    })
                }
                None => {
                    if !missing
                        .iter()
                        .any(|c: &&ColumnDef| c.name.eq_ignore_ascii_case(&column.name))
                    {
                        missing.push(column);
                    }
                }
            }
        }
        if missing.is_empty() {
            return Ok(0);
        }

        if declared.is_empty() {
            let defs: Vec<String> = missing
                .iter()
                .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.as_sql()))
                .collect();
            self.conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                quote_ident(table),
                defs.join(", ")
            ))?;
            debug!("created table {table} with {} columns", missing.len());
        } else {
            for column in &missing {
                self.conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table),
                    quote_ident(&column.name),
                    column.ty.as_sql()
                ))?;
                debug!("added column {}.{}", table, column.name);
            }
        }

        for column in &missing {
            declared.insert(column.name.clone(), column.ty.as_sql().to_string());
        }
        Ok(missing.len())
    }

    /// Append `rows` to `table` in a single transaction.
    ///
    /// Every column a row names must already be declared on the table. Rows may
    /// name different subsets; the rest is written as NULL.
    pub fn append_batch(&mut self, table: &str, rows: &[Row]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let declared = Self::declared_columns(&self.conn, &mut self.columns, table)?;
        let mut columns: Vec<&str> = Vec::new();
        for row in rows {
            for name in row.keys() {
                if !declared.keys().any(|d| d.eq_ignore_ascii_case(name)) {
                    return Err(StoreError::UndeclaredColumn {
                        table: table.to_string(),
                        column: name.clone(),
                    });
                }
                if !columns.contains(&name.as_str()) {
                    columns.push(name.as_str());
                }
            }
        }
        columns.sort_unstable();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Vec<_>>()
                .join(", "),
            (1..=columns.len())
                .map(|i| format!("?{i}"))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                stmt.execute(params_from_iter(
                    columns
                        .iter()
                        .map(|c| row.get(*c).cloned().unwrap_or(Value::Null)),
                ))?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn write_cycle_stages(&mut self, batch: &CycleStageBatch) -> Result<()> {
        if self.layout.normalized() {
            let rows: Vec<Row> = batch
                .rows
                .iter()
                .flat_map(|cycle| {
                    cycle.counts.iter().map(move |(stage, count)| {
                        row([
                            ("cu", int(cycle.cu.into())),
                            ("cycle", int(cycle.cycle)),
                            ("stage", text(stage)),
                            ("count", int(*count)),
                        ])
                    })
                })
                .collect();
            self.append_batch(CYCLE_STAGE_TABLE, &rows)
                .with_context(|| format!("Failed to write cycle stages of cu {}", batch.cu))?;
        }

        if self.layout.wide() {
            let table = cycle_table_name(batch.cu);
            self.ensure_columns(&table, &cycle_table_columns(&batch.stages))
                .with_context(|| format!("Failed to evolve {table}"))?;
            let rows: Vec<Row> = batch
                .rows
                .iter()
                .map(|cycle| {
                    let mut row: Row = cycle
                        .counts
                        .iter()
                        .map(|(stage, count)| (stage.clone(), int(*count)))
                        .collect();
                    row.insert(CYCLE_COLUMN.to_string(), int(cycle.cycle));
                    row
                })
                .collect();
            self.append_batch(&table, &rows)
                .with_context(|| format!("Failed to write {table}"))?;
        }
        Ok(())
    }
}

impl RecordCollector for SqliteStore {
    fn add_instructions(&mut self, records: Vec<InstructionRecord>) -> Result<()> {
        let rows = records
            .iter()
            .map(instruction_row)
            .collect::<serde_json::Result<Vec<_>>>()
            .context("Failed to encode instruction history")?;
        let written = self
            .append_batch(INSTRUCTION_TABLE, &rows)
            .context("Failed to write instructions")?;
        debug!("wrote {written} instructions");
        Ok(())
    }

    fn add_memory_accesses(&mut self, records: Vec<MemoryAccessRecord>) -> Result<()> {
        let rows = records
            .iter()
            .map(memory_access_row)
            .collect::<serde_json::Result<Vec<_>>>()
            .context("Failed to encode memory access history")?;
        let written = self
            .append_batch(MEMORY_ACCESS_TABLE, &rows)
            .context("Failed to write memory accesses")?;
        debug!("wrote {written} memory accesses");
        Ok(())
    }

    fn add_cycle_stages(&mut self, batch: CycleStageBatch) -> Result<()> {
        self.write_cycle_stages(&batch)
    }

    fn add_incomplete(&mut self, entities: Vec<IncompleteEntity>) -> Result<()> {
        let rows: Vec<Row> = entities.iter().map(incomplete_row).collect();
        self.append_batch(INCOMPLETE_ENTITY_TABLE, &rows)
            .context("Failed to write incomplete entities")?;
        Ok(())
    }

    fn finish(&mut self, summary: &RunSummary) -> Result<()> {
        self.conn
            .execute(
                "UPDATE ingest_run SET
                    status = ?1,
                    lines = ?2,
                    unmatched_lines = ?3,
                    skipped_errors = ?4,
                    instructions = ?5,
                    memory_accesses = ?6,
                    cycle_rows = ?7,
                    incomplete = ?8,
                    last_cycle = ?9,
                    error = ?10
                 WHERE id = 1",
                params![
                    summary.status.as_str(),
                    summary.lines as i64,
                    summary.unmatched_lines as i64,
                    summary.skipped_errors as i64,
                    summary.instructions as i64,
                    summary.memory_accesses as i64,
                    summary.cycle_rows as i64,
                    summary.incomplete as i64,
                    summary.last_cycle as i64,
                    summary.error,
                ],
            )
            .context("Failed to record run status")?;
        Ok(())
    }
}

/// Read the run row of an ingested database, if it has one.
pub fn load_run_summary(conn: &Connection) -> Result<Option<RunSummary>> {
    let has_table: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'ingest_run'",
            [],
            |row| row.get(0),
        )
        .context("Failed to inspect database")?;
    if !has_table {
        return Ok(None);
    }

    conn.query_row(
        "SELECT trace, status, lines, unmatched_lines, skipped_errors, instructions,
                memory_accesses, cycle_rows, incomplete, last_cycle, error
         FROM ingest_run WHERE id = 1",
        [],
        |row| {
            let status: String = row.get(1)?;
            Ok(RunSummary {
                trace: row.get(0)?,
                status: RunStatus::parse(&status).unwrap_or_default(),
                lines: row.get::<_, i64>(2)? as u64,
                unmatched_lines: row.get::<_, i64>(3)? as u64,
                skipped_errors: row.get::<_, i64>(4)? as u64,
                instructions: row.get::<_, i64>(5)? as u64,
                memory_accesses: row.get::<_, i64>(6)? as u64,
                cycle_rows: row.get::<_, i64>(7)? as u64,
                incomplete: row.get::<_, i64>(8)? as u64,
                last_cycle: row.get::<_, i64>(9)? as u64,
                error: row.get(10)?,
            })
        },
    )
    .optional()
    .context("Failed to read ingest run")
}

/// Status of the run recorded in the database at `path`.
///
/// Returns `None` when the file does not exist or was not written by simtrace.
pub fn run_status(path: impl AsRef<Path>) -> Result<Option<RunStatus>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(load_run_summary(&conn)?.map(|summary| summary.status))
}
