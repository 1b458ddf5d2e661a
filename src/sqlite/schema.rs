//! SQL schema for simtrace SQLite output
//!
//! One append-only table per entity kind. Life histories are stored as JSON
//! arrays so a single row carries a whole instruction. Per-cycle stage counts
//! live in the normalized `cycle_stage` table; the optional wide
//! `cycle_cu_<cu>` tables are created on demand by the writer.

use rusqlite::Connection;

pub const SCHEMA_VERSION: i32 = 1;

pub const SCHEMA_SQL: &str = r#"
-- ============================================================================
-- SQLite Configuration and Optimizations
-- ============================================================================

-- Write-ahead logging keeps readers usable while a batch commits
PRAGMA journal_mode = WAL;

-- Normal synchronous mode is safe with WAL and much faster
PRAGMA synchronous = NORMAL;

-- 64MB cache
PRAGMA cache_size = -64000;

PRAGMA temp_store = MEMORY;

-- ============================================================================
-- Schema Version Tracking
-- ============================================================================

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    description TEXT
);

INSERT INTO schema_version (version, description)
VALUES (1, 'Initial schema');

-- ============================================================================
-- Ingestion Run
-- ============================================================================

-- Single row describing the ingestion that produced this database
CREATE TABLE IF NOT EXISTS ingest_run (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    trace TEXT NOT NULL,
    status TEXT NOT NULL,  -- 'running', 'complete', 'aborted', 'cancelled'
    lines INTEGER NOT NULL DEFAULT 0,
    unmatched_lines INTEGER NOT NULL DEFAULT 0,
    skipped_errors INTEGER NOT NULL DEFAULT 0,
    instructions INTEGER NOT NULL DEFAULT 0,
    memory_accesses INTEGER NOT NULL DEFAULT 0,
    cycle_rows INTEGER NOT NULL DEFAULT 0,
    incomplete INTEGER NOT NULL DEFAULT 0,
    last_cycle INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    simtrace_version TEXT
);

-- ============================================================================
-- Instructions
-- ============================================================================

CREATE TABLE IF NOT EXISTS instruction (
    cu INTEGER NOT NULL,
    id INTEGER NOT NULL,
    inst_order INTEGER NOT NULL,
    ib INTEGER NOT NULL,
    wg INTEGER NOT NULL,
    wf INTEGER NOT NULL,
    uop_id INTEGER NOT NULL,
    asm TEXT NOT NULL,
    scalar_vector TEXT NOT NULL,  -- 'S' or 'V'
    unit_action TEXT NOT NULL,
    color TEXT NOT NULL,
    start INTEGER NOT NULL,
    "end" INTEGER NOT NULL,
    length INTEGER NOT NULL,
    fetch INTEGER NOT NULL,
    stall INTEGER NOT NULL,
    issue INTEGER NOT NULL,
    active INTEGER NOT NULL,
    life_full TEXT NOT NULL,  -- JSON [[cycle, "stage"], ...]
    life_lite TEXT NOT NULL   -- JSON [[duration, "stage"], ...]
);

CREATE INDEX idx_instruction_cu_start ON instruction(cu, start);

-- ============================================================================
-- Memory Accesses
-- ============================================================================

CREATE TABLE IF NOT EXISTS memory_access (
    id TEXT NOT NULL,
    module TEXT NOT NULL,
    access_type TEXT NOT NULL,
    address TEXT NOT NULL,
    start INTEGER NOT NULL,
    "end" INTEGER NOT NULL,
    length INTEGER NOT NULL,
    miss INTEGER NOT NULL,
    history TEXT NOT NULL  -- JSON [[cycle, "module", "action"], ...]
);

CREATE INDEX idx_memory_access_start ON memory_access(start);

-- ============================================================================
-- Per-cycle Stage Occupancy
-- ============================================================================

CREATE TABLE IF NOT EXISTS cycle_stage (
    cu INTEGER NOT NULL,
    cycle INTEGER NOT NULL,
    stage TEXT NOT NULL,
    count INTEGER NOT NULL
);

CREATE INDEX idx_cycle_stage_cu_cycle ON cycle_stage(cu, cycle);

-- ============================================================================
-- Diagnostics
-- ============================================================================

-- Entities still open when the trace ended
CREATE TABLE IF NOT EXISTS incomplete_entity (
    kind TEXT NOT NULL,  -- 'instruction' or 'memory_access'
    key TEXT NOT NULL,
    cu INTEGER,
    start INTEGER NOT NULL,
    last_cycle INTEGER NOT NULL,
    last_stage TEXT NOT NULL
);
"#;

/// Create the fixed tables on a fresh database.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)
}
