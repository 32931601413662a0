//! System-wide counters collected from the /proc filesystem.
//!
//! Every family here is a raw kernel reading. CPU, interrupt, disk and
//! network values are monotonic counters and are only meaningful as a delta
//! between two snapshots; memory values are instantaneous gauges.

use serde::{Deserialize, Serialize};

/// Tick counters of a single CPU (or of the aggregate `cpu` line).
///
/// Source: `/proc/stat`
///
/// All values are cumulative jiffies (USER_HZ clock ticks).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct CpuCoreStat {
    /// Time spent in user mode, guest time included.
    /// Source: `/proc/stat` column 1
    pub user: u64,

    /// Time spent in user mode with low priority, guest_nice included.
    /// Source: `/proc/stat` column 2
    pub nice: u64,

    /// Time spent in kernel mode.
    /// Source: `/proc/stat` column 3
    pub sys: u64,

    /// Time spent idle.
    /// Source: `/proc/stat` column 4
    pub idle: u64,

    /// Time waiting for I/O to complete.
    /// Source: `/proc/stat` column 5
    pub iowait: u64,

    /// Time servicing hardware interrupts.
    /// Source: `/proc/stat` column 6
    pub hardirq: u64,

    /// Time servicing software interrupts.
    /// Source: `/proc/stat` column 7
    pub softirq: u64,

    /// Time stolen by the hypervisor.
    /// Source: `/proc/stat` column 8
    pub steal: u64,

    /// Time spent running a guest OS.
    /// Source: `/proc/stat` column 9
    pub guest: u64,

    /// Time spent running a niced guest OS.
    /// Source: `/proc/stat` column 10 (0 on kernels older than 2.6.33)
    pub guest_nice: u64,
}

impl CpuCoreStat {
    /// Sum of all categories except `guest` and `guest_nice`.
    ///
    /// The kernel already accounts guest time inside `user` and `nice`.
    pub fn uptime(&self) -> u64 {
        self.user
            + self.nice
            + self.sys
            + self.idle
            + self.iowait
            + self.hardirq
            + self.softirq
            + self.steal
    }
}

/// CPU counters: the aggregate line plus one entry per core.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct CpuStat {
    /// Aggregate counters (`cpu` line).
    pub all: CpuCoreStat,
    /// Number of cores, equal to `cores.len()`.
    pub num_core: usize,
    /// Per-core counters (`cpu0`, `cpu1`, ...), indexed by core id.
    pub cores: Vec<CpuCoreStat>,
}

impl CpuStat {
    /// Creates zeroed counters for `num_core` cores.
    pub fn new(num_core: usize) -> Self {
        Self {
            all: CpuCoreStat::default(),
            num_core,
            cores: vec![CpuCoreStat::default(); num_core],
        }
    }
}

/// Identity of an interrupt line.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
pub enum IrqKey {
    /// Device interrupt with a numeric IRQ (`24:`).
    Device(u32),
    /// System interrupt with a symbolic name (`LOC:`, `RES:`, `TLB:`, ...).
    System(String),
}

/// One row of `/proc/interrupts`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct InterruptStatEntry {
    pub irq: IrqKey,
    /// Trailing description (controller, trigger type, device names).
    pub descr: String,
    /// Cumulative count per core, indexed by core id.
    pub counts: Vec<u64>,
}

/// Interrupt counters from `/proc/interrupts`, in kernel row order.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct InterruptStat {
    /// Number of cores in the header row.
    pub num_core: usize,
    pub entries: Vec<InterruptStatEntry>,
}

/// Block device statistics from /proc/diskstats.
///
/// Source: `/proc/diskstats`
///
/// Sector counts are in 512-byte units, tick counts in milliseconds.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct DiskStatEntry {
    pub major: u32,
    pub minor: u32,
    /// Device name (sda, nvme0n1, sda1, ...).
    pub name: String,

    /// Reads completed.
    pub rd_ios: u64,
    /// Reads merged.
    pub rd_merges: u64,
    /// Sectors read.
    pub rd_sectors: u64,
    /// Milliseconds spent reading.
    pub rd_ticks: u64,

    /// Writes completed.
    pub wr_ios: u64,
    /// Writes merged.
    pub wr_merges: u64,
    /// Sectors written.
    pub wr_sectors: u64,
    /// Milliseconds spent writing.
    pub wr_ticks: u64,

    /// I/Os currently in progress (gauge).
    pub ios_pgr: u64,
    /// Milliseconds spent doing I/O.
    pub total_ticks: u64,
    /// Weighted milliseconds spent doing I/O (queue depth integral).
    pub req_ticks: u64,
}

/// Disk statistics for every recorded device.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct DiskStat {
    pub entries: Vec<DiskStatEntry>,
}

/// Network interface statistics from /proc/net/dev.
///
/// Source: `/proc/net/dev`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct NetStatEntry {
    /// Interface name (eth0, lo, enp0s3, ...).
    pub name: String,

    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub rx_errors: u64,
    pub rx_drops: u64,
    pub rx_fifo: u64,
    pub rx_frame: u64,
    pub rx_compressed: u64,
    pub rx_multicast: u64,

    pub tx_bytes: u64,
    pub tx_packets: u64,
    pub tx_errors: u64,
    pub tx_drops: u64,
    pub tx_fifo: u64,
    /// Collisions column on transmit side.
    pub tx_frame: u64,
    /// Carrier column on transmit side.
    pub tx_compressed: u64,
    pub tx_multicast: u64,
}

/// Network statistics for every interface.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct NetStat {
    pub entries: Vec<NetStatEntry>,
}

/// Memory statistics from /proc/meminfo.
///
/// Source: `/proc/meminfo`
///
/// All values are in kilobytes except the HugePages_* counts (pages).
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct MemStat {
    pub mem_total: u64,
    pub mem_free: u64,
    pub buffers: u64,
    pub cached: u64,
    pub swap_cached: u64,
    pub active: u64,
    pub inactive: u64,
    pub swap_total: u64,
    pub swap_free: u64,
    pub dirty: u64,
    pub writeback: u64,
    pub anon_pages: u64,
    pub mapped: u64,
    pub shmem: u64,
    pub slab: u64,
    pub s_reclaimable: u64,
    pub s_unreclaim: u64,
    pub kernel_stack: u64,
    pub page_tables: u64,
    pub nfs_unstable: u64,
    pub bounce: u64,
    pub commit_limit: u64,
    pub committed_as: u64,
    pub anon_huge_pages: u64,
    pub huge_pages_total: u64,
    pub huge_pages_free: u64,
    pub huge_pages_rsvd: u64,
    pub huge_pages_surp: u64,
    pub hugepagesize: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_excludes_guest_time() {
        let core = CpuCoreStat {
            user: 100,
            nice: 10,
            sys: 20,
            idle: 300,
            iowait: 5,
            hardirq: 1,
            softirq: 2,
            steal: 3,
            guest: 40,
            guest_nice: 4,
        };
        assert_eq!(core.uptime(), 441);
    }

    #[test]
    fn cpu_stat_new_allocates_cores() {
        let stat = CpuStat::new(4);
        assert_eq!(stat.num_core, 4);
        assert_eq!(stat.cores.len(), 4);
        assert_eq!(stat.all, CpuCoreStat::default());
    }
}
