//! Memory access latency statistics.

use anyhow::Result;
use serde::Serialize;

use super::AnalyzeDb;

/// Latency of the accesses issued by one module for one request type.
#[derive(Debug, PartialEq, Serialize)]
pub struct MemoryLatency {
    pub module: String,
    pub access_type: String,
    pub count: u64,
    pub mean: f64,
    pub max: u64,
    pub total: u64,
    pub misses: u64,
}

impl AnalyzeDb {
    /// Latency per (module, access type), ordered by total latency.
    pub fn memory_latency(&self) -> Result<Vec<MemoryLatency>> {
        let mut stmt = self.connection().prepare(
            "SELECT module, access_type, COUNT(*), AVG(length), MAX(length), SUM(length), SUM(miss)
             FROM memory_access
             GROUP BY module, access_type
             ORDER BY SUM(length) DESC, module, access_type",
        )?;
        let stats = stmt
            .query_map([], |row| {
                Ok(MemoryLatency {
                    module: row.get(0)?,
                    access_type: row.get(1)?,
                    count: row.get::<_, i64>(2)? as u64,
                    mean: row.get(3)?,
                    max: row.get::<_, i64>(4)? as u64,
                    total: row.get::<_, i64>(5)? as u64,
                    misses: row.get::<_, i64>(6)? as u64,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::sample_db;

    #[test]
    fn test_memory_latency() {
        let dir = tempfile::tempdir().unwrap();
        let db = sample_db(dir.path());

        let stats = db.memory_latency().unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].module, "l1-cu0");
        assert_eq!(stats[0].count, 2);
        assert_eq!(stats[0].mean, 5.0);
        assert_eq!(stats[0].max, 7);
        assert_eq!(stats[0].total, 10);
        assert_eq!(stats[1].access_type, "store");
    }
}
