//! The per-sample record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::system::{CpuStat, DiskStat, InterruptStat, MemStat, NetStat};

/// A point-in-time capture of every enabled metric family.
///
/// A family is `None` when it was disabled for the recording. Which families
/// are present is decided once per recording, so consumers pair snapshots
/// without checking presence on every field.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Snapshot {
    /// Wall-clock capture time, nanosecond precision.
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub time: DateTime<Utc>,

    /// CPU tick counters.
    /// Source: `/proc/stat`
    pub cpu: Option<CpuStat>,

    /// Per-IRQ, per-core interrupt counters.
    /// Source: `/proc/interrupts`
    pub interrupt: Option<InterruptStat>,

    /// Block device I/O counters.
    /// Source: `/proc/diskstats`
    pub disk: Option<DiskStat>,

    /// Network interface counters.
    /// Source: `/proc/net/dev`
    pub net: Option<NetStat>,

    /// Memory gauges.
    /// Source: `/proc/meminfo`
    pub mem: Option<MemStat>,
}

impl Snapshot {
    /// Creates an empty snapshot stamped with `time`.
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time,
            cpu: None,
            interrupt: None,
            disk: None,
            net: None,
            mem: None,
        }
    }

    /// Short description of the families present, for logging.
    pub fn describe(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if let Some(cpu) = &self.cpu {
            parts.push(format!("{} cores", cpu.num_core));
        }
        if let Some(intr) = &self.interrupt {
            parts.push(format!("{} irqs", intr.entries.len()));
        }
        if let Some(disk) = &self.disk {
            parts.push(format!("{} disks", disk.entries.len()));
        }
        if let Some(net) = &self.net {
            parts.push(format!("{} interfaces", net.entries.len()));
        }
        if self.mem.is_some() {
            parts.push("mem".to_string());
        }

        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::{DiskStatEntry, NetStatEntry};

    #[test]
    fn describe_lists_present_families() {
        let mut snapshot = Snapshot::new(Utc::now());
        snapshot.cpu = Some(CpuStat::new(8));
        snapshot.disk = Some(DiskStat {
            entries: vec![DiskStatEntry::default(), DiskStatEntry::default()],
        });
        snapshot.net = Some(NetStat {
            entries: vec![NetStatEntry::default()],
        });

        let desc = snapshot.describe();
        assert_eq!(desc, "8 cores, 2 disks, 1 interfaces");
    }

    #[test]
    fn describe_empty_snapshot() {
        assert!(Snapshot::new(Utc::now()).describe().is_empty());
    }
}
