//! Trace database validation module.
//!
//! This module checks a database produced by `simtrace` for run completeness
//! and per-row consistency of the derived timing fields.
//!
//! # Example
//!
//! ```no_run
//! use simtrace::validate::validate_database;
//! use std::path::Path;
//!
//! let result = validate_database(Path::new("./trace.db"));
//! if result.has_errors() {
//!     for error in &result.errors {
//!         eprintln!("Error: {}", error);
//!     }
//! }
//! ```

use std::fmt;
use std::path::Path;

use rusqlite::{Connection, OpenFlags};

use crate::record::RunStatus;
use crate::sqlite::load_run_summary;
use crate::trace::constants::{
    CYCLE_STAGE_TABLE, INCOMPLETE_ENTITY_TABLE, INGEST_RUN_TABLE, INSTRUCTION_TABLE,
    MEMORY_ACCESS_TABLE,
};

/// Row-level errors reported per check before the rest are summarised.
const MAX_ROW_ERRORS: usize = 20;

/// Result of validating a trace database.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Errors that indicate invalid trace data.
    pub errors: Vec<ValidationError>,
    /// Warnings that indicate potential issues.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    /// Returns true if there are any validation errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns true if there are any validation warnings.
    #[must_use]
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Returns true if the database is valid (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }
}

/// Validation error types.
#[derive(Debug)]
pub enum ValidationError {
    /// The database has no ingestion run row.
    MissingRun,
    /// The ingestion run did not complete.
    RunIncomplete {
        status: RunStatus,
        error: Option<String>,
    },
    /// A required table does not exist.
    MissingTable { table: String },
    /// A row's derived fields disagree with each other.
    InconsistentRow {
        table: String,
        key: String,
        message: String,
    },
    /// More inconsistent rows than were reported individually.
    MoreInconsistentRows { table: String, count: usize },
    /// A run counter disagrees with the persisted rows.
    CountMismatch {
        table: String,
        recorded: u64,
        actual: u64,
    },
    /// Failed to read the database.
    ReadError { table: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingRun => write!(f, "{INGEST_RUN_TABLE}: no run recorded"),
            ValidationError::RunIncomplete { status, error } => {
                write!(f, "{INGEST_RUN_TABLE}: run is {}", status.as_str())?;
                if let Some(error) = error {
                    write!(f, " ({error})")?;
                }
                Ok(())
            }
            ValidationError::MissingTable { table } => write!(f, "{table}: table not found"),
            ValidationError::InconsistentRow {
                table,
                key,
                message,
            } => {
                write!(f, "{table}[{key}]: {message}")
            }
            ValidationError::MoreInconsistentRows { table, count } => {
                write!(f, "{table}: {count} more inconsistent rows")
            }
            ValidationError::CountMismatch {
                table,
                recorded,
                actual,
            } => {
                write!(f, "{table}: run recorded {recorded} rows, table has {actual}")
            }
            ValidationError::ReadError { table, message } => {
                write!(f, "{table}: read error: {message}")
            }
        }
    }
}

/// Validation warning types.
#[derive(Debug)]
pub enum ValidationWarning {
    /// A table has no rows.
    EmptyTable { table: String },
    /// Entities were still open when the trace ended.
    IncompleteEntities { count: u64 },
    /// Out-of-order events were skipped during ingestion.
    SkippedErrors { count: u64 },
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationWarning::EmptyTable { table } => write!(f, "{table}: table is empty"),
            ValidationWarning::IncompleteEntities { count } => {
                write!(f, "{INCOMPLETE_ENTITY_TABLE}: {count} entities never closed")
            }
            ValidationWarning::SkippedErrors { count } => {
                write!(f, "{INGEST_RUN_TABLE}: {count} out-of-order events were skipped")
            }
        }
    }
}

/// Validate a trace database.
///
/// Checks:
/// - The ingestion run exists and completed
/// - Instruction buckets sum to the instruction length
/// - `end - start == length` for instructions and memory accesses
/// - Miss counts never exceed the access history
/// - Run counters match the persisted rows
pub fn validate_database(path: &Path) -> ValidationResult {
    let mut result = ValidationResult::default();

    let conn = match Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY) {
        Ok(conn) => conn,
        Err(e) => {
            result.add_error(ValidationError::ReadError {
                table: path.display().to_string(),
                message: e.to_string(),
            });
            return result;
        }
    };
    validate_connection(&conn, &mut result);
    result
}

fn validate_connection(conn: &Connection, result: &mut ValidationResult) {
    for table in [
        INSTRUCTION_TABLE,
        MEMORY_ACCESS_TABLE,
        CYCLE_STAGE_TABLE,
        INCOMPLETE_ENTITY_TABLE,
    ] {
        match table_exists(conn, table) {
            Ok(true) => {}
            Ok(false) => {
                result.add_error(ValidationError::MissingTable {
                    table: table.to_string(),
                });
                return;
            }
            Err(e) => {
                result.add_error(ValidationError::ReadError {
                    table: table.to_string(),
                    message: e.to_string(),
                });
                return;
            }
        }
    }

    validate_run(conn, result);

    check_rows(
        conn,
        INSTRUCTION_TABLE,
        "SELECT cu || ':' || id, 'buckets sum to ' || (fetch + stall + issue + active) \
             || ', length is ' || length \
         FROM instruction WHERE fetch + stall + issue + active != length",
        result,
    );
    check_rows(
        conn,
        INSTRUCTION_TABLE,
        "SELECT cu || ':' || id, 'end - start is ' || (\"end\" - start) || ', length is ' || length \
         FROM instruction WHERE \"end\" - start != length",
        result,
    );
    check_rows(
        conn,
        MEMORY_ACCESS_TABLE,
        "SELECT id, 'end - start is ' || (\"end\" - start) || ', length is ' || length \
         FROM memory_access WHERE \"end\" - start != length",
        result,
    );
    check_rows(
        conn,
        MEMORY_ACCESS_TABLE,
        "SELECT id, 'miss count ' || miss || ' exceeds ' || json_array_length(history) \
             || ' history entries' \
         FROM memory_access WHERE miss > json_array_length(history)",
        result,
    );

    for table in [INSTRUCTION_TABLE, MEMORY_ACCESS_TABLE] {
        match row_count(conn, table) {
            Ok(0) => result.add_warning(ValidationWarning::EmptyTable {
                table: table.to_string(),
            }),
            Ok(_) => {}
            Err(e) => result.add_error(ValidationError::ReadError {
                table: table.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

fn validate_run(conn: &Connection, result: &mut ValidationResult) {
    let run = match load_run_summary(conn) {
        Ok(Some(run)) => run,
        Ok(None) => {
            result.add_error(ValidationError::MissingRun);
            return;
        }
        Err(e) => {
            result.add_error(ValidationError::ReadError {
                table: INGEST_RUN_TABLE.to_string(),
                message: format!("{e:#}"),
            });
            return;
        }
    };

    if run.status != RunStatus::Complete {
        result.add_error(ValidationError::RunIncomplete {
            status: run.status,
            error: run.error,
        });
        // Counters of an unfinished run are not meaningful
        return;
    }
    if run.incomplete > 0 {
        result.add_warning(ValidationWarning::IncompleteEntities {
            count: run.incomplete,
        });
    }
    if run.skipped_errors > 0 {
        result.add_warning(ValidationWarning::SkippedErrors {
            count: run.skipped_errors,
        });
    }

    for (table, recorded) in [
        (INSTRUCTION_TABLE, run.instructions),
        (MEMORY_ACCESS_TABLE, run.memory_accesses),
        (INCOMPLETE_ENTITY_TABLE, run.incomplete),
    ] {
        match row_count(conn, table) {
            Ok(actual) if actual != recorded => result.add_error(ValidationError::CountMismatch {
                table: table.to_string(),
                recorded,
                actual,
            }),
            Ok(_) => {}
            Err(e) => result.add_error(ValidationError::ReadError {
                table: table.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Report every `(key, message)` row returned by `sql` as inconsistent.
fn check_rows(conn: &Connection, table: &str, sql: &str, result: &mut ValidationResult) {
    let rows = conn.prepare(sql).and_then(|mut stmt| {
        stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()
    });
    let rows = match rows {
        Ok(rows) => rows,
        Err(e) => {
            result.add_error(ValidationError::ReadError {
                table: table.to_string(),
                message: e.to_string(),
            });
            return;
        }
    };

    let extra = rows.len().saturating_sub(MAX_ROW_ERRORS);
    for (key, message) in rows.into_iter().take(MAX_ROW_ERRORS) {
        result.add_error(ValidationError::InconsistentRow {
            table: table.to_string(),
            key,
            message,
        });
    }
    if extra > 0 {
        result.add_error(ValidationError::MoreInconsistentRows {
            table: table.to_string(),
            count: extra,
        });
    }
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )
}

fn row_count(conn: &Connection, table: &str) -> rusqlite::Result<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordCollector, RunSummary};
    use crate::sqlite::{CycleLayout, SqliteStore};
    use crate::trace::{
        BucketDurations, IncompleteEntity, InstructionKey, InstructionMeta, InstructionRecord,
        ScalarVector, UnitAction,
    };
    use crate::error::EntityKind;
    use tempfile::TempDir;

    fn instruction(id: u64, length: u64, buckets: BucketDurations) -> InstructionRecord {
        InstructionRecord {
            key: InstructionKey::new(0, id),
            meta: InstructionMeta::default(),
            inst_order: id,
            start: 10,
            end: 10 + length,
            length,
            history: Vec::new(),
            runs: Vec::new(),
            buckets,
            scalar_vector: ScalarVector::Scalar,
            unit_action: UnitAction::Other,
        }
    }

    fn complete(instructions: u64, incomplete: u64) -> RunSummary {
        RunSummary {
            status: RunStatus::Complete,
            instructions,
            incomplete,
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ok.db");
        let mut store = SqliteStore::create(&path, CycleLayout::Normalized, "t").unwrap();
        store
            .add_instructions(vec![instruction(
                1,
                4,
                BucketDurations {
                    fetch: 1,
                    issue: 3,
                    ..Default::default()
                },
            )])
            .unwrap();
        store
            .add_incomplete(vec![IncompleteEntity {
                kind: EntityKind::Instruction,
                key: "0:2".to_string(),
                cu: Some(0),
                start: 12,
                last_cycle: 13,
                last_stage: "i".to_string(),
            }])
            .unwrap();
        store.finish(&complete(1, 1)).unwrap();
        drop(store);

        let result = validate_database(&path);
        assert!(result.is_valid(), "unexpected errors: {:?}", result.errors);
        // memory_access is empty and one entity never closed
        assert_eq!(result.warnings.len(), 2);
    }

    #[test]
    fn test_bucket_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.db");
        let mut store = SqliteStore::create(&path, CycleLayout::Normalized, "t").unwrap();
        store
            .add_instructions(vec![instruction(
                7,
                4,
                BucketDurations {
                    fetch: 1,
                    ..Default::default()
                },
            )])
            .unwrap();
        store.finish(&complete(1, 0)).unwrap();
        drop(store);

        let result = validate_database(&path);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(
            result.errors[0].to_string(),
            "instruction[0:7]: buckets sum to 1, length is 4"
        );
    }

    #[test]
    fn test_unfinished_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("running.db");
        drop(SqliteStore::create(&path, CycleLayout::Normalized, "t").unwrap());

        let result = validate_database(&path);
        assert!(result
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::RunIncomplete { status: RunStatus::Running, .. })));
    }

    #[test]
    fn test_not_a_trace_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("other.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (x INTEGER)")
            .unwrap();

        let result = validate_database(&path);
        assert!(matches!(result.errors[0], ValidationError::MissingTable { .. }));
    }
}
