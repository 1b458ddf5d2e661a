//! Shared constants for trace processing.
//!
//! Line grammars are compiled once at first use.

use std::sync::LazyLock;

use regex::Regex;

/// Default number of closed records buffered before a forced batch write.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 8192;

/// Default number of batches the writer thread may have queued.
pub const DEFAULT_QUEUE_DEPTH: usize = 4;

/// Stage label appended to an instruction's history when it closes.
pub const END_STAGE: &str = "end";

/// Table names in the output database.
pub const INSTRUCTION_TABLE: &str = "instruction";
pub const MEMORY_ACCESS_TABLE: &str = "memory_access";
pub const CYCLE_STAGE_TABLE: &str = "cycle_stage";
pub const INCOMPLETE_ENTITY_TABLE: &str = "incomplete_entity";
pub const INGEST_RUN_TABLE: &str = "ingest_run";

/// Prefix of the per-compute-unit wide cycle tables (`cycle_cu_<cu>`).
pub const CYCLE_CU_TABLE_PREFIX: &str = "cycle_cu_";

/// Column holding the cycle number in wide cycle tables.
pub const CYCLE_COLUMN: &str = "cycle";

/// `c clk=1000`
pub static CLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"c clk=(\d+)").expect("Invalid clock regex pattern"));

/// `si.new_inst id=69 cu=0 ib=0 wg=0 wf=5 uop_id=8 stg="f" asm="s_load_dwordx4 ..."`
pub static INST_NEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"si\.new_inst id=(\d+) cu=(\d+) ib=(\d+) wg=(\d+) wf=(\d+) uop_id=(\d+) stg="([^"]+)" asm="(.*)""#,
    )
    .expect("Invalid new instruction regex pattern")
});

/// `si.inst id=60 cu=0 wf=4 uop_id=7 stg="su-r"`
pub static INST_EXEC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"si\.inst id=(\d+) cu=(\d+) wf=(\d+) uop_id=(\d+) stg="([^"]+)""#)
        .expect("Invalid instruction regex pattern")
});

/// `si.end_inst id=35 cu=3`
pub static INST_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"si\.end_inst id=(\d+) cu=(\d+)").expect("Invalid end instruction regex pattern")
});

/// `mem.new_access name="A-227" type="load" state="l1-cu02:load" addr=0xc610`
pub static MEM_NEW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"mem\.new_access name="([^"]+)" type="(\w+)" state="([^":]+):([^":]+)" addr=(\w+)"#)
        .expect("Invalid new access regex pattern")
});

/// `mem.access name="A-213" state="l1-cu0:find_and_lock"`
pub static MEM_ACCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"mem\.access name="([^"]+)" state="([^":]+):([^":]+)""#)
        .expect("Invalid access regex pattern")
});

/// `mem.end_access name="A-16512"`
pub static MEM_END_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"mem\.end_access name="([^"]+)""#).expect("Invalid end access regex pattern")
});
