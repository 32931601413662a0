//! Memory gauges. Nothing to difference; the current reading is the usage.

use serde::Serialize;

use super::UsageError;
use crate::storage::model::MemStat;

/// A `/proc/meminfo` reading plus the derived used amount, in kB.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemUsage {
    #[serde(flatten)]
    pub stat: MemStat,
    /// `total - free - buffers - cached - s_reclaimable`, floored at zero.
    pub mem_used: u64,
}

pub fn mem_usage(mem: Option<&MemStat>) -> Result<MemUsage, UsageError> {
    let mem = mem.ok_or_else(|| UsageError::MissingData("no memory reading".into()))?;
    let mem_used = mem
        .mem_total
        .saturating_sub(mem.mem_free)
        .saturating_sub(mem.buffers)
        .saturating_sub(mem.cached)
        .saturating_sub(mem.s_reclaimable);

    Ok(MemUsage {
        stat: mem.clone(),
        mem_used,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_excludes_reclaimable_memory() {
        let mem = MemStat {
            mem_total: 16_000_000,
            mem_free: 2_000_000,
            buffers: 500_000,
            cached: 6_000_000,
            s_reclaimable: 500_000,
            ..Default::default()
        };
        let usage = mem_usage(Some(&mem)).unwrap();
        assert_eq!(usage.mem_used, 7_000_000);

        let v = serde_json::to_value(&usage).unwrap();
        assert_eq!(v["mem_total"], 16_000_000);
        assert_eq!(v["s_reclaimable"], 500_000);
        assert_eq!(v["mem_used"], 7_000_000);
    }

    #[test]
    fn inconsistent_reading_saturates() {
        let mem = MemStat {
            mem_total: 100,
            mem_free: 80,
            cached: 50,
            ..Default::default()
        };
        assert_eq!(mem_usage(Some(&mem)).unwrap().mem_used, 0);
    }

    #[test]
    fn absent_reading_is_missing_data() {
        assert!(matches!(mem_usage(None), Err(UsageError::MissingData(_))));
    }
}
