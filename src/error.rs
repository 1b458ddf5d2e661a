//! Typed errors for entity tracking and storage.
//!
//! Tracking errors describe log corruption (an entity referenced out of order).
//! Whether they abort the run or are skipped is decided by the orchestrator's
//! [`ErrorPolicy`](crate::ingest::ErrorPolicy). Storage errors are always fatal.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Kind of entity tracked by a lifecycle tracker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Instruction,
    MemoryAccess,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Instruction => "instruction",
            EntityKind::MemoryAccess => "memory_access",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while correlating events into entities.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackError {
    /// A transition or close referenced an entity that is not open.
    #[error("{kind} {key} is not open")]
    UnknownKey { kind: EntityKind, key: String },

    /// An open event arrived for an entity that is already open.
    #[error("{kind} {key} is already open")]
    DuplicateKey { kind: EntityKind, key: String },

    /// A clock tick moved the global clock backwards.
    #[error("clock moved backwards from cycle {from} to {to}")]
    ClockRegression { from: u64, to: u64 },
}

/// Errors raised by the persistent writer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A column already exists with a different declared type.
    #[error("{table}.{column}: existing type {existing} conflicts with requested {requested}")]
    SchemaConflict {
        table: String,
        column: String,
        existing: String,
        requested: String,
    },

    /// A row referenced a column the table does not declare.
    #[error("{table}.{column}: column is not declared")]
    UndeclaredColumn { table: String, column: String },

    /// The underlying database rejected a write.
    #[error("storage write failed: {0}")]
    Write(#[from] rusqlite::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_error_display() {
        let err = TrackError::UnknownKey {
            kind: EntityKind::Instruction,
            key: "0:99".to_string(),
        };
        assert_eq!(err.to_string(), "instruction 0:99 is not open");

        let err = TrackError::ClockRegression { from: 10, to: 4 };
        assert_eq!(err.to_string(), "clock moved backwards from cycle 10 to 4");
    }

    #[test]
    fn test_schema_conflict_display() {
        let err = StoreError::SchemaConflict {
            table: "cycle_cu_0".to_string(),
            column: "f".to_string(),
            existing: "TEXT".to_string(),
            requested: "INTEGER".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "cycle_cu_0.f: existing type TEXT conflicts with requested INTEGER"
        );
    }
}
