//! Common test utilities for simtrace integration tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::{Connection, OpenFlags};

/// Two instructions on cu 0, one memory access and a clock gap.
#[allow(dead_code)]
pub const SAMPLE_TRACE: &str = r#"c clk=10
si.new_inst id=5 cu=0 ib=0 wg=0 wf=0 uop_id=0 stg="f" asm="s_mov_b32 s0, 0"
mem.new_access name="A-1" type="load" state="l1-cu0:load" addr=0x40
c clk=11
si.inst id=5 cu=0 wf=0 uop_id=0 stg="i"
si.new_inst id=6 cu=0 ib=0 wg=0 wf=1 uop_id=1 stg="f" asm="buffer_load_dword v1, v0, s[4:7], 0"
mem.access name="A-1" state="l1-cu0:miss"
c clk=13
si.inst id=6 cu=0 wf=1 uop_id=1 stg="i"
mem.access name="A-1" state="l2-0:load"
c clk=14
si.end_inst id=5 cu=0
c clk=17
si.inst id=6 cu=0 wf=1 uop_id=1 stg="mem"
mem.end_access name="A-1"
c clk=20
si.end_inst id=6 cu=0
"#;

/// Write `content` to `dir/name` and return the path.
pub fn write_trace(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).expect("Failed to write trace");
    path
}

/// Write `content` gzip-compressed to `dir/name` and return the path.
#[allow(dead_code)]
pub fn write_gz_trace(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    let file = fs::File::create(&path).expect("Failed to create trace");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(content.as_bytes())
        .expect("Failed to compress trace");
    encoder.finish().expect("Failed to finish gzip stream");
    path
}

pub fn open_db(path: &Path) -> Connection {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .expect("Failed to open database")
}

/// Every row of `sql`, each column rendered as a string.
#[allow(dead_code)]
pub fn dump(conn: &Connection, sql: &str) -> Vec<Vec<String>> {
    let mut stmt = conn.prepare(sql).expect("Failed to prepare query");
    let column_count = stmt.column_count();
    stmt.query_map([], |row| {
        (0..column_count)
            .map(|i| {
                let value: rusqlite::types::Value = row.get(i)?;
                Ok(format!("{value:?}"))
            })
            .collect::<rusqlite::Result<Vec<_>>>()
    })
    .expect("Failed to run query")
    .collect::<rusqlite::Result<Vec<_>>>()
    .expect("Failed to read rows")
}

#[allow(dead_code)]
pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
    .expect("Failed to count rows")
}
