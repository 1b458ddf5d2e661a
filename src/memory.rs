//! Memory access lifecycle tracking.
//!
//! A memory access is opened by `mem.new_access`, visits modules through
//! `mem.access` and is closed by `mem.end_access`. Access ids are already
//! globally unique tokens (`A-227`), so they key the open map directly.

use std::collections::HashMap;

use log::trace;

use crate::error::{EntityKind, TrackError};
use crate::trace::constants::END_STAGE;
use crate::trace::{IncompleteEntity, MemoryAccessRecord, MemoryEntry};

/// Opening fields of a memory access.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemoryOpen {
    pub module: String,
    pub access_type: String,
    pub address: String,
    pub action: String,
}

#[derive(Debug)]
struct OpenAccess {
    module: String,
    access_type: String,
    address: String,
    start: u64,
    history: Vec<MemoryEntry>,
    miss: u64,
}

fn is_miss(action: &str) -> bool {
    action.contains("miss")
}

/// Tracks in-flight memory accesses and buffers closed ones.
#[derive(Debug)]
pub struct MemoryAccessTracker {
    open: HashMap<String, OpenAccess>,
    closed: Vec<MemoryAccessRecord>,
    flush_threshold: usize,
}

impl MemoryAccessTracker {
    pub fn new(flush_threshold: usize) -> Self {
        Self {
            open: HashMap::new(),
            closed: Vec::new(),
            flush_threshold: flush_threshold.max(1),
        }
    }

    pub fn open(&mut self, id: &str, cycle: u64, fields: MemoryOpen) -> Result<(), TrackError> {
        if self.open.contains_key(id) {
            return Err(TrackError::DuplicateKey {
                kind: EntityKind::MemoryAccess,
                key: id.to_string(),
            });
        }

        let miss = u64::from(is_miss(&fields.action));
        self.open.insert(
            id.to_string(),
            OpenAccess {
                history: vec![MemoryEntry {
                    cycle,
                    module: fields.module.clone(),
                    action: fields.action,
                }],
                module: fields.module,
                access_type: fields.access_type,
                address: fields.address,
                start: cycle,
                miss,
            },
        );
        Ok(())
    }

    pub fn update(
        &mut self,
        id: &str,
        cycle: u64,
        module: &str,
        action: &str,
    ) -> Result<(), TrackError> {
        let access = self.open.get_mut(id).ok_or_else(|| TrackError::UnknownKey {
            kind: EntityKind::MemoryAccess,
            key: id.to_string(),
        })?;
        if is_miss(action) {
            access.miss += 1;
        }
        access.history.push(MemoryEntry {
            cycle,
            module: module.to_string(),
            action: action.to_string(),
        });
        Ok(())
    }

    /// Close an access at `cycle`, moving it to the closed buffer.
    pub fn close(&mut self, id: &str, cycle: u64) -> Result<&MemoryAccessRecord, TrackError> {
        let (id, mut access) = self
            .open
            .remove_entry(id)
            .ok_or_else(|| TrackError::UnknownKey {
                kind: EntityKind::MemoryAccess,
                key: id.to_string(),
            })?;
        access.history.push(MemoryEntry {
            cycle,
            module: String::new(),
            action: END_STAGE.to_string(),
        });

        let record = MemoryAccessRecord {
            id,
            module: access.module,
            access_type: access.access_type,
            address: access.address,
            start: access.start,
            end: cycle,
            length: cycle.saturating_sub(access.start),
            history: access.history,
            miss: access.miss,
        };
        trace!(
            "memory access {} closed: length={} miss={}",
            record.id,
            record.length,
            record.miss
        );

        if self.closed.is_empty() {
            self.closed.reserve(self.flush_threshold);
        }
        self.closed.push(record);
        Ok(&self.closed[self.closed.len() - 1])
    }

    /// Take the closed buffer if it has reached the flush threshold.
    pub fn take_full_batch(&mut self) -> Option<Vec<MemoryAccessRecord>> {
        if self.closed.len() >= self.flush_threshold {
            Some(std::mem::take(&mut self.closed))
        } else {
            None
        }
    }

    pub fn take_closed(&mut self) -> Vec<MemoryAccessRecord> {
        std::mem::take(&mut self.closed)
    }

    /// Remove every still-open access, reporting each as incomplete.
    pub fn drain_open(&mut self) -> Vec<IncompleteEntity> {
        let mut open: Vec<_> = self.open.drain().collect();
        open.sort_by(|(a, _), (b, _)| a.cmp(b));
        open.into_iter()
            .map(|(id, access)| {
                let last = access.history.last();
                IncompleteEntity {
                    kind: EntityKind::MemoryAccess,
                    last_cycle: last.map_or(access.start, |entry| entry.cycle),
                    last_stage: last
                        .map(|entry| format!("{}:{}", entry.module, entry.action))
                        .unwrap_or_default(),
                    key: id,
                    cu: None,
                    start: access.start,
                }
            })
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(module: &str) -> MemoryOpen {
        MemoryOpen {
            module: module.to_string(),
            access_type: "load".to_string(),
            address: "0x40".to_string(),
            action: "load".to_string(),
        }
    }

    #[test]
    fn test_miss_count() {
        let mut tracker = MemoryAccessTracker::new(16);
        tracker.open("A-1", 2, load("l1-cu0")).unwrap();
        tracker.update("A-1", 3, "l1-cu0", "miss").unwrap();
        let record = tracker.close("A-1", 9).unwrap();

        assert_eq!(record.start, 2);
        assert_eq!(record.end, 9);
        assert_eq!(record.length, 7);
        assert_eq!(record.miss, 1);
        assert_eq!(
            record.history.last(),
            Some(&MemoryEntry {
                cycle: 9,
                module: String::new(),
                action: "end".to_string(),
            })
        );
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.module, "l1-cu0");
        assert_eq!(record.access_type, "load");
        assert_eq!(record.address, "0x40");
    }

    #[test]
    fn test_miss_counts_substrings() {
        let mut tracker = MemoryAccessTracker::new(16);
        tracker.open("A-2", 0, load("l1-cu0")).unwrap();
        tracker.update("A-2", 1, "l1-cu0", "read_miss").unwrap();
        tracker.update("A-2", 2, "l2-0", "hit").unwrap();
        tracker.update("A-2", 3, "l2-0", "miss_retry").unwrap();
        assert_eq!(tracker.close("A-2", 5).unwrap().miss, 2);
    }

    #[test]
    fn test_unknown_and_duplicate() {
        let mut tracker = MemoryAccessTracker::new(16);
        assert!(matches!(
            tracker.update("A-9", 1, "l1-cu0", "hit"),
            Err(TrackError::UnknownKey { .. })
        ));
        assert!(matches!(
            tracker.close("A-9", 1),
            Err(TrackError::UnknownKey { .. })
        ));

        tracker.open("A-9", 1, load("l1-cu0")).unwrap();
        assert_eq!(
            tracker.open("A-9", 2, load("l1-cu0")),
            Err(TrackError::DuplicateKey {
                kind: EntityKind::MemoryAccess,
                key: "A-9".to_string(),
            })
        );
    }

    #[test]
    fn test_flush_and_drain() {
        let mut tracker = MemoryAccessTracker::new(2);
        tracker.open("A-1", 0, load("l1-cu0")).unwrap();
        tracker.close("A-1", 1).unwrap();
        assert!(tracker.take_full_batch().is_none());
        tracker.open("A-2", 1, load("l1-cu0")).unwrap();
        tracker.close("A-2", 2).unwrap();
        assert_eq!(tracker.take_full_batch().map(|b| b.len()), Some(2));

        tracker.open("A-4", 3, load("l1-cu1")).unwrap();
        tracker.open("A-3", 3, load("l1-cu0")).unwrap();
        tracker.update("A-3", 4, "l2-1", "miss").unwrap();
        let incomplete = tracker.drain_open();
        assert_eq!(incomplete.len(), 2);
        assert_eq!(incomplete[0].key, "A-3");
        assert_eq!(incomplete[0].last_stage, "l2-1:miss");
        assert_eq!(incomplete[0].last_cycle, 4);
        assert_eq!(incomplete[1].cu, None);
    }
}
