//! Line classifier for simulator trace logs.
//!
//! Each raw line is matched against a fixed set of grammars and turned into a
//! [`TraceEvent`]. Lines that match none of them (banners, debug output) yield
//! `None` and are skipped by the orchestrator.

use regex::Captures;

use crate::trace::constants::{
    CLOCK_RE, INST_END_RE, INST_EXEC_RE, INST_NEW_RE, MEM_ACCESS_RE, MEM_END_RE, MEM_NEW_RE,
};
use crate::trace::{InstructionKey, InstructionMeta};

/// A typed event recognised in one trace line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    ClockTick {
        cycle: u64,
    },
    InstructionOpened {
        key: InstructionKey,
        stage: String,
        meta: InstructionMeta,
    },
    InstructionTransitioned {
        key: InstructionKey,
        stage: String,
    },
    InstructionClosed {
        key: InstructionKey,
    },
    MemoryOpened {
        id: String,
        module: String,
        access_type: String,
        address: String,
        action: String,
    },
    MemoryUpdated {
        id: String,
        module: String,
        action: String,
    },
    MemoryClosed {
        id: String,
    },
}

fn num<T: std::str::FromStr>(caps: &Captures<'_>, group: usize) -> Option<T> {
    caps.get(group)?.as_str().parse().ok()
}

/// A cycle or id, bounded by `i64::MAX` so it fits a SQLite INTEGER.
fn stored_num(caps: &Captures<'_>, group: usize) -> Option<u64> {
    let value: i64 = num(caps, group)?;
    u64::try_from(value).ok()
}

fn text(caps: &Captures<'_>, group: usize) -> Option<String> {
    caps.get(group).map(|m| m.as_str().to_string())
}

/// Classify one trace line.
///
/// Matching is purely syntactic. A numeric field that does not fit its type
/// makes the whole line unrecognised. Cycles and ids above `i64::MAX` count
/// as not fitting, since they could not be stored.
pub fn classify_line(line: &str) -> Option<TraceEvent> {
    if line.contains("si.") {
        return classify_instruction(line);
    }
    if line.contains("mem.") {
        return classify_memory(line);
    }
    let caps = CLOCK_RE.captures(line)?;
    Some(TraceEvent::ClockTick {
        cycle: stored_num(&caps, 1)?,
    })
}

fn classify_instruction(line: &str) -> Option<TraceEvent> {
    if let Some(caps) = INST_EXEC_RE.captures(line) {
        return Some(TraceEvent::InstructionTransitioned {
            key: InstructionKey::new(num(&caps, 2)?, stored_num(&caps, 1)?),
            stage: text(&caps, 5)?,
        });
    }
    if let Some(caps) = INST_NEW_RE.captures(line) {
        return Some(TraceEvent::InstructionOpened {
            key: InstructionKey::new(num(&caps, 2)?, stored_num(&caps, 1)?),
            stage: text(&caps, 7)?,
            meta: InstructionMeta {
                ib: num(&caps, 3)?,
                wg: num(&caps, 4)?,
                wf: num(&caps, 5)?,
                uop_id: stored_num(&caps, 6)?,
                asm: text(&caps, 8)?,
            },
        });
    }
    let caps = INST_END_RE.captures(line)?;
    Some(TraceEvent::InstructionClosed {
        key: InstructionKey::new(num(&caps, 2)?, stored_num(&caps, 1)?),
    })
}

fn classify_memory(line: &str) -> Option<TraceEvent> {
    if let Some(caps) = MEM_ACCESS_RE.captures(line) {
        return Some(TraceEvent::MemoryUpdated {
            id: text(&caps, 1)?,
            module: text(&caps, 2)?,
            action: text(&caps, 3)?,
        });
    }
    if let Some(caps) = MEM_NEW_RE.captures(line) {
        return Some(TraceEvent::MemoryOpened {
            id: text(&caps, 1)?,
            access_type: text(&caps, 2)?,
            module: text(&caps, 3)?,
            action: text(&caps, 4)?,
            address: text(&caps, 5)?,
        });
    }
    let caps = MEM_END_RE.captures(line)?;
    Some(TraceEvent::MemoryClosed {
        id: text(&caps, 1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_tick() {
        assert_eq!(
            classify_line("c clk=10"),
            Some(TraceEvent::ClockTick { cycle: 10 })
        );
        assert_eq!(classify_line("c clk=abc"), None);
    }

    #[test]
    fn test_instruction_opened() {
        let line = r#"si.new_inst id=5 cu=0 ib=1 wg=2 wf=3 uop_id=4 stg="f" asm="s_mov_b32 s0, 0x10""#;
        assert_eq!(
            classify_line(line),
            Some(TraceEvent::InstructionOpened {
                key: InstructionKey::new(0, 5),
                stage: "f".to_string(),
                meta: InstructionMeta {
                    ib: 1,
                    wg: 2,
                    wf: 3,
                    uop_id: 4,
                    asm: "s_mov_b32 s0, 0x10".to_string(),
                },
            })
        );
    }

    #[test]
    fn test_instruction_transitioned_and_closed() {
        assert_eq!(
            classify_line(r#"si.inst id=60 cu=2 wf=4 uop_id=7 stg="su-r""#),
            Some(TraceEvent::InstructionTransitioned {
                key: InstructionKey::new(2, 60),
                stage: "su-r".to_string(),
            })
        );
        assert_eq!(
            classify_line("si.end_inst id=35 cu=3"),
            Some(TraceEvent::InstructionClosed {
                key: InstructionKey::new(3, 35),
            })
        );
    }

    #[test]
    fn test_memory_events() {
        assert_eq!(
            classify_line(r#"mem.new_access name="A-1" type="load" state="l1-cu0:load" addr=0x40"#),
            Some(TraceEvent::MemoryOpened {
                id: "A-1".to_string(),
                module: "l1-cu0".to_string(),
                access_type: "load".to_string(),
                address: "0x40".to_string(),
                action: "load".to_string(),
            })
        );
        assert_eq!(
            classify_line(r#"mem.access name="A-1" state="l1-cu0:miss""#),
            Some(TraceEvent::MemoryUpdated {
                id: "A-1".to_string(),
                module: "l1-cu0".to_string(),
                action: "miss".to_string(),
            })
        );
        assert_eq!(
            classify_line(r#"mem.end_access name="A-1""#),
            Some(TraceEvent::MemoryClosed {
                id: "A-1".to_string()
            })
        );
    }

    #[test]
    fn test_out_of_range_numbers() {
        assert_eq!(
            classify_line("c clk=9223372036854775807"),
            Some(TraceEvent::ClockTick { cycle: i64::MAX as u64 })
        );
        assert_eq!(classify_line("c clk=9223372036854775808"), None);
        assert_eq!(
            classify_line(
                r#"si.new_inst id=18446744073709551615 cu=0 ib=0 wg=0 wf=0 uop_id=0 stg="f" asm="s_nop 0""#
            ),
            None
        );
        assert_eq!(classify_line("si.end_inst id=18446744073709551615 cu=0"), None);
    }

    #[test]
    fn test_unmatched_lines() {
        assert_eq!(classify_line(""), None);
        assert_eq!(classify_line("Multi2Sim 5.0 - A Simulation Framework"), None);
        assert_eq!(classify_line("si.unknown id=1"), None);
        assert_eq!(
            classify_line(r#"mem.new_access_block cache="l2-4" access="A-64385" set=37 way=14"#),
            None
        );
    }
}
