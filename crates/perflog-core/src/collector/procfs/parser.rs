//! Parsers for `/proc` filesystem files.
//!
//! These are pure functions that parse the content of various `/proc` files
//! into structured data. They are designed to be easily testable with string inputs.

use crate::storage::model::{
    CpuCoreStat, CpuStat, DiskStatEntry, InterruptStat, InterruptStatEntry, IrqKey, MemStat,
    NetStat, NetStatEntry,
};

/// Error type for parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

// ============ CPU Stat Parser ============

fn parse_cpu_line(parts: &[&str]) -> Result<CpuCoreStat, ParseError> {
    // user nice system idle are present on every kernel
    if parts.len() < 5 {
        return Err(ParseError::new(format!(
            "not enough fields in '{}' line: {}",
            parts.first().unwrap_or(&""),
            parts.len()
        )));
    }

    let get_val = |idx: usize| -> Result<u64, ParseError> {
        match parts.get(idx) {
            Some(s) => s
                .parse()
                .map_err(|_| ParseError::new(format!("invalid cpu counter '{}'", s))),
            None => Ok(0),
        }
    };

    Ok(CpuCoreStat {
        user: get_val(1)?,
        nice: get_val(2)?,
        sys: get_val(3)?,
        idle: get_val(4)?,
        iowait: get_val(5)?,
        hardirq: get_val(6)?,
        softirq: get_val(7)?,
        steal: get_val(8)?,
        guest: get_val(9)?,
        // absent before Linux 2.6.33
        guest_nice: get_val(10)?,
    })
}

/// Largest core count the kernel can be configured for (`CONFIG_NR_CPUS`).
pub const MAX_CORES: usize = 8192;

/// Parses `/proc/stat` content.
///
/// The aggregate `cpu` line is required. Cores are placed by their `cpuN`
/// index; the core count is the highest index plus one, so an offline core
/// reads as zero.
pub fn parse_cpu_stat(content: &str) -> Result<CpuStat, ParseError> {
    let mut all = None;
    let mut cores: Vec<(usize, CpuCoreStat)> = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            continue;
        };

        if *first == "cpu" {
            all = Some(parse_cpu_line(&parts)?);
        } else if let Some(id) = first.strip_prefix("cpu") {
            let id: usize = id
                .parse()
                .map_err(|_| ParseError::new(format!("invalid cpu id in '{}'", first)))?;
            if id >= MAX_CORES {
                return Err(ParseError::new(format!("cpu id out of range in '{}'", first)));
            }
            cores.push((id, parse_cpu_line(&parts)?));
        }
    }

    let all = all.ok_or_else(|| ParseError::new("missing aggregate cpu line"))?;
    let num_core = cores.iter().map(|(id, _)| id + 1).max().unwrap_or(0);

    let mut stat = CpuStat::new(num_core);
    stat.all = all;
    for (id, core) in cores {
        stat.cores[id] = core;
    }
    Ok(stat)
}

// ============ Interrupts Parser ============

fn parse_interrupt_row(line: &str, num_core: usize) -> Option<InterruptStatEntry> {
    let mut tokens = line.split_whitespace().peekable();
    let label = tokens.next()?.trim_end_matches(':');
    let irq = match label.parse::<u32>() {
        Ok(n) => IrqKey::Device(n),
        Err(_) => IrqKey::System(label.to_string()),
    };

    // ERR and MIS carry a single count; pad the rest with zeros
    let mut counts = Vec::with_capacity(num_core);
    while counts.len() < num_core {
        match tokens.peek().and_then(|t| t.parse::<u64>().ok()) {
            Some(v) => {
                counts.push(v);
                tokens.next();
            }
            None => break,
        }
    }
    counts.resize(num_core, 0);

    let descr = tokens.collect::<Vec<_>>().join(" ");
    Some(InterruptStatEntry { irq, descr, counts })
}

/// Parses `/proc/interrupts` content.
///
/// Format:
/// ```text
///            CPU0       CPU1
///   0:         36          0   IO-APIC   2-edge      timer
/// LOC:   12345678   12000000   Local timer interrupts
/// ```
pub fn parse_interrupts(content: &str) -> Result<InterruptStat, ParseError> {
    let mut lines = content.lines();
    let header = lines
        .next()
        .ok_or_else(|| ParseError::new("interrupts file is empty"))?;
    let num_core = header.split_whitespace().count();
    if num_core == 0 {
        return Err(ParseError::new("interrupts header lists no cpus"));
    }

    let entries = lines
        .filter_map(|line| parse_interrupt_row(line, num_core))
        .collect();

    Ok(InterruptStat { num_core, entries })
}

// ============ Disk Stats Parser ============

/// Parses `/proc/diskstats` content.
///
/// Format: major minor name reads r_merged r_sectors r_time writes w_merged w_sectors w_time io_pending io_time w_io_time [discards ...]
///
/// Kernels before 2.6.25 print partitions with only four counters
/// (`reads r_sectors writes w_sectors`); those rows are accepted too.
pub fn parse_diskstats(content: &str) -> Result<Vec<DiskStatEntry>, ParseError> {
    let mut disks = Vec::new();

    for line in content.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() != 7 && parts.len() < 14 {
            continue; // Skip malformed lines
        }

        let major: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        let minor: u32 = parts.get(1).and_then(|s| s.parse().ok()).unwrap_or(0);

        let get_val =
            |idx: usize| -> u64 { parts.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        let entry = if parts.len() == 7 {
            DiskStatEntry {
                major,
                minor,
                name: parts[2].to_string(),
                rd_ios: get_val(3),
                rd_sectors: get_val(4),
                wr_ios: get_val(5),
                wr_sectors: get_val(6),
                ..Default::default()
            }
        } else {
            DiskStatEntry {
                major,
                minor,
                name: parts[2].to_string(),
                rd_ios: get_val(3),
                rd_merges: get_val(4),
                rd_sectors: get_val(5),
                rd_ticks: get_val(6),
                wr_ios: get_val(7),
                wr_merges: get_val(8),
                wr_sectors: get_val(9),
                wr_ticks: get_val(10),
                ios_pgr: get_val(11),
                total_ticks: get_val(12),
                req_ticks: get_val(13),
            }
        };
        disks.push(entry);
    }

    Ok(disks)
}

/// Device and partition names in `/proc/diskstats` order.
pub fn parse_diskstats_names(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let _major = parts.next()?.parse::<u32>().ok()?;
            let _minor = parts.next()?.parse::<u32>().ok()?;
            parts.next().map(str::to_string)
        })
        .collect()
}

// ============ Network Device Stats Parser ============

/// Parses `/proc/net/dev` content.
///
/// Format:
/// Inter-|   Receive                                                |  Transmit
///  face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
///    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
pub fn parse_net_dev(content: &str) -> Result<NetStat, ParseError> {
    let mut stat = NetStat::default();

    for line in content.lines() {
        // Skip header lines
        if line.contains('|') || line.trim().is_empty() {
            continue;
        }

        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        let values: Vec<&str> = rest.split_whitespace().collect();
        if values.len() < 16 {
            return Err(ParseError::new(format!(
                "interface {} has {} counters, expected 16",
                name.trim(),
                values.len()
            )));
        }

        let get_val =
            |idx: usize| -> u64 { values.get(idx).and_then(|s| s.parse().ok()).unwrap_or(0) };

        stat.entries.push(NetStatEntry {
            name: name.trim().to_string(),
            rx_bytes: get_val(0),
            rx_packets: get_val(1),
            rx_errors: get_val(2),
            rx_drops: get_val(3),
            rx_fifo: get_val(4),
            rx_frame: get_val(5),
            rx_compressed: get_val(6),
            rx_multicast: get_val(7),
            tx_bytes: get_val(8),
            tx_packets: get_val(9),
            tx_errors: get_val(10),
            tx_drops: get_val(11),
            tx_fifo: get_val(12),
            tx_frame: get_val(13),
            tx_compressed: get_val(14),
            tx_multicast: get_val(15),
        });
    }

    Ok(stat)
}

// ============ Meminfo Parser ============

/// Parses `/proc/meminfo` content.
///
/// Unknown keys are ignored; keys missing on older kernels read as zero.
pub fn parse_meminfo(content: &str) -> Result<MemStat, ParseError> {
    let mut info = MemStat::default();
    let mut seen = 0usize;

    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Ok(val) = val.parse::<u64>() else {
            continue;
        };

        let slot = match key.trim_end_matches(':') {
            "MemTotal" => &mut info.mem_total,
            "MemFree" => &mut info.mem_free,
            "Buffers" => &mut info.buffers,
            "Cached" => &mut info.cached,
            "SwapCached" => &mut info.swap_cached,
            "Active" => &mut info.active,
            "Inactive" => &mut info.inactive,
            "SwapTotal" => &mut info.swap_total,
            "SwapFree" => &mut info.swap_free,
            "Dirty" => &mut info.dirty,
            "Writeback" => &mut info.writeback,
            "AnonPages" => &mut info.anon_pages,
            "Mapped" => &mut info.mapped,
            "Shmem" => &mut info.shmem,
            "Slab" => &mut info.slab,
            "SReclaimable" => &mut info.s_reclaimable,
            "SUnreclaim" => &mut info.s_unreclaim,
            "KernelStack" => &mut info.kernel_stack,
            "PageTables" => &mut info.page_tables,
            "NFS_Unstable" => &mut info.nfs_unstable,
            "Bounce" => &mut info.bounce,
            "CommitLimit" => &mut info.commit_limit,
            "Committed_AS" => &mut info.committed_as,
            "AnonHugePages" => &mut info.anon_huge_pages,
            "HugePages_Total" => &mut info.huge_pages_total,
            "HugePages_Free" => &mut info.huge_pages_free,
            "HugePages_Rsvd" => &mut info.huge_pages_rsvd,
            "HugePages_Surp" => &mut info.huge_pages_surp,
            "Hugepagesize" => &mut info.hugepagesize,
            _ => continue,
        };
        *slot = val;
        seen += 1;
    }

    if seen == 0 {
        return Err(ParseError::new("no known keys in meminfo"));
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_stat() {
        let content = "\
cpu  10000 500 3000 80000 1000 200 100 10 40 4
cpu0 5000 250 1500 40000 500 100 50 5 20 2
cpu1 5000 250 1500 40000 500 100 50 5 20 2
intr 1000000 50 0 0
ctxt 500000
btime 1700000000
";
        let stat = parse_cpu_stat(content).unwrap();
        assert_eq!(stat.num_core, 2);
        assert_eq!(stat.all.user, 10000);
        assert_eq!(stat.all.guest_nice, 4);
        assert_eq!(stat.cores[1].idle, 40000);
        assert_eq!(stat.cores[1].steal, 5);
    }

    #[test]
    fn test_parse_cpu_stat_nine_columns() {
        let content = "cpu  1 2 3 4 5 6 7 8 9\ncpu0 1 2 3 4 5 6 7 8 9\n";
        let stat = parse_cpu_stat(content).unwrap();
        assert_eq!(stat.all.guest, 9);
        assert_eq!(stat.all.guest_nice, 0);
    }

    #[test]
    fn test_parse_cpu_stat_offline_core() {
        let content = "cpu  2 0 0 2\ncpu0 1 0 0 1\ncpu2 1 0 0 1\n";
        let stat = parse_cpu_stat(content).unwrap();
        assert_eq!(stat.num_core, 3);
        assert_eq!(stat.cores[1], CpuCoreStat::default());
    }

    #[test]
    fn test_parse_cpu_stat_errors() {
        assert!(parse_cpu_stat("cpu0 1 2 3 4\n").is_err());
        assert!(parse_cpu_stat("cpu  1 2 x 4\n").is_err());
        assert!(parse_cpu_stat("cpu  1 2\n").is_err());
    }

    #[test]
    fn test_parse_cpu_stat_rejects_absurd_core_id() {
        let err = parse_cpu_stat("cpu  2 0 0 2\ncpu99999999999 1 0 0 1\n").unwrap_err();
        assert!(err.message.contains("out of range"));
        let last = format!("cpu  2 0 0 2\ncpu{} 1 0 0 1\n", MAX_CORES - 1);
        assert_eq!(parse_cpu_stat(&last).unwrap().num_core, MAX_CORES);
    }

    #[test]
    fn test_parse_interrupts() {
        let content = "\
           CPU0       CPU1
  0:         36          0   IO-APIC   2-edge      timer
 24:       1000       2000   PCI-MSI 512000-edge      ahci[0000:00:1f.2]
NMI:          5          6   Non-maskable interrupts
LOC:   12345678   12000000   Local timer interrupts
ERR:          0
";
        let stat = parse_interrupts(content).unwrap();
        assert_eq!(stat.num_core, 2);
        assert_eq!(stat.entries.len(), 5);

        assert_eq!(stat.entries[0].irq, IrqKey::Device(0));
        assert_eq!(stat.entries[0].descr, "IO-APIC 2-edge timer");
        assert_eq!(stat.entries[1].counts, vec![1000, 2000]);
        assert_eq!(stat.entries[3].irq, IrqKey::System("LOC".to_string()));
        assert_eq!(stat.entries[3].descr, "Local timer interrupts");
        assert_eq!(stat.entries[4].counts, vec![0, 0]);
        assert!(stat.entries[4].descr.is_empty());
    }

    #[test]
    fn test_parse_interrupts_empty() {
        assert!(parse_interrupts("").is_err());
    }

    #[test]
    fn test_parse_diskstats() {
        let content = "\
   8       0 sda 12345 100 987654 5000 6789 50 456789 3000 2 4000 8000 0 0 0 0
   8       1 sda1 10000 80 800000 4000 5000 40 400000 2500 0 3500 6500
   8       2 sda2 400 8000 300 2400
garbage line
";
        let disks = parse_diskstats(content).unwrap();
        assert_eq!(disks.len(), 3);

        let sda = &disks[0];
        assert_eq!((sda.major, sda.minor), (8, 0));
        assert_eq!(sda.rd_ios, 12345);
        assert_eq!(sda.rd_ticks, 5000);
        assert_eq!(sda.wr_sectors, 456789);
        assert_eq!(sda.ios_pgr, 2);
        assert_eq!(sda.req_ticks, 8000);

        let legacy = &disks[2];
        assert_eq!(legacy.rd_ios, 400);
        assert_eq!(legacy.rd_sectors, 8000);
        assert_eq!(legacy.wr_ios, 300);
        assert_eq!(legacy.wr_sectors, 2400);
        assert_eq!(legacy.rd_ticks, 0);
    }

    #[test]
    fn test_parse_diskstats_names() {
        let content = "   8 0 sda 1 2 3 4 5 6 7 8 9 10 11\n   8 1 sda1 1 2 3 4\n\n";
        assert_eq!(parse_diskstats_names(content), vec!["sda", "sda1"]);
    }

    #[test]
    fn test_parse_net_dev() {
        let content = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: 1234567     1234    0    0    0     0          0         0  1234567     1234    0    0    0     0       0          0
  eth0:98765432    65432    1    2    3     4          5         6 12345678    23456    7    8    9    10      11         12
";
        let stat = parse_net_dev(content).unwrap();
        assert_eq!(stat.entries.len(), 2);

        let eth0 = &stat.entries[1];
        assert_eq!(eth0.name, "eth0");
        assert_eq!(eth0.rx_bytes, 98765432);
        assert_eq!(eth0.rx_multicast, 6);
        assert_eq!(eth0.tx_packets, 23456);
        assert_eq!(eth0.tx_frame, 10);
        assert_eq!(eth0.tx_compressed, 11);
        assert_eq!(eth0.tx_multicast, 12);
    }

    #[test]
    fn test_parse_net_dev_short_row() {
        let content = "  eth0: 1 2 3\n";
        assert!(parse_net_dev(content).is_err());
    }

    #[test]
    fn test_parse_meminfo() {
        let content = "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:         1000 kB
SReclaimable:     256000 kB
Committed_AS:    9000000 kB
HugePages_Total:       4
Hugepagesize:       2048 kB
";
        let mem = parse_meminfo(content).unwrap();
        assert_eq!(mem.mem_total, 16384000);
        assert_eq!(mem.cached, 2048000);
        assert_eq!(mem.swap_cached, 1000);
        assert_eq!(mem.s_reclaimable, 256000);
        assert_eq!(mem.committed_as, 9000000);
        assert_eq!(mem.huge_pages_total, 4);
        assert_eq!(mem.hugepagesize, 2048);
    }

    #[test]
    fn test_parse_meminfo_empty() {
        assert!(parse_meminfo("").is_err());
    }
}
