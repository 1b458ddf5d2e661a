//! Column definitions for the output tables.
//!
//! Stage labels come from the simulator and are open-ended, so they are turned
//! into column names here before they reach any table.

use super::constants::{CYCLE_COLUMN, CYCLE_CU_TABLE_PREFIX};

/// SQLite storage class of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

/// A named, typed column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
}

impl ColumnDef {
    pub fn integer(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Integer,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ColumnType::Text,
        }
    }
}

/// Normalise a stage label into a column name.
///
/// Every character outside `[A-Za-z0-9_]` becomes `_`, so `su-r` becomes
/// `su_r`. SQLite column names are case-insensitive, so letters are folded to
/// lowercase and `F` shares the `f` column. A label that would collide with
/// the `cycle` column is prefixed with `stage_`.
pub fn stage_column_name(stage: &str) -> String {
    let name: String = stage
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.is_empty() || name == CYCLE_COLUMN || name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("stage_{name}")
    } else {
        name
    }
}

/// Name of the wide cycle table of a compute unit.
pub fn cycle_table_name(cu: u32) -> String {
    format!("{CYCLE_CU_TABLE_PREFIX}{cu}")
}

/// Columns of a wide cycle table holding the given stage columns.
pub fn cycle_table_columns(stages: &[String]) -> Vec<ColumnDef> {
    std::iter::once(ColumnDef::integer(CYCLE_COLUMN))
        .chain(stages.iter().map(ColumnDef::integer))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_column_name() {
        assert_eq!(stage_column_name("su-r"), "su_r");
        assert_eq!(stage_column_name("f"), "f");
        assert_eq!(stage_column_name("s_mem"), "s_mem");
        assert_eq!(stage_column_name("cycle"), "stage_cycle");
        assert_eq!(stage_column_name("2x"), "stage_2x");
        assert_eq!(stage_column_name("a b.c"), "a_b_c");
        assert_eq!(stage_column_name("F"), "f");
        assert_eq!(stage_column_name("SU-R"), "su_r");
        assert_eq!(stage_column_name("Cycle"), "stage_cycle");
    }

    #[test]
    fn test_cycle_table_columns() {
        let columns = cycle_table_columns(&["f".to_string(), "su_r".to_string()]);
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["cycle", "f", "su_r"]);
        assert!(columns.iter().all(|c| c.ty == ColumnType::Integer));
        assert_eq!(cycle_table_name(3), "cycle_cu_3");
    }
}
