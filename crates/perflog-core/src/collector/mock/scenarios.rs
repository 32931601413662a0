//! Pre-built mock filesystem scenarios for testing.
//!
//! These scenarios provide realistic `/proc` and `/sys/block` states.
//! [`MockFs::typical_system_at`] advances every counter linearly with `step`,
//! so two steps form a pair with known rates.

use super::filesystem::MockFs;

/// Per-core tick deltas for one step: 200 ticks, 30% usr, 10% sys,
/// 50% idle, 5% iowait, 5% softirq.
const STEP_USER: u64 = 60;
const STEP_SYS: u64 = 20;
const STEP_IDLE: u64 = 100;
const STEP_IOWAIT: u64 = 10;
const STEP_SOFTIRQ: u64 = 10;

impl MockFs {
    /// Creates a typical 4-core system with two disks and two interfaces.
    pub fn typical_system() -> Self {
        Self::typical_system_at(0)
    }

    /// The typical system after `step` sampling steps.
    ///
    /// Per step: each core ticks as described on the step constants, `sda`
    /// completes 100 reads and 50 writes, `nvme0n1` 400 reads, `eth0`
    /// receives 100 KiB in 100 packets.
    pub fn typical_system_at(step: u64) -> Self {
        let mut fs = Self::new();
        let s = step;

        fs.add_file("/proc/sys/kernel/hostname", "db-01\n");

        let core = |id: &str| {
            format!(
                "{} {} 125 {} {} {} 50 {} 0 0 0\n",
                id,
                2500 + STEP_USER * s,
                750 + STEP_SYS * s,
                20000 + STEP_IDLE * s,
                250 + STEP_IOWAIT * s,
                25 + STEP_SOFTIRQ * s,
            )
        };
        let mut stat = format!(
            "cpu  {} 500 {} {} {} 200 {} 0 0 0\n",
            4 * (2500 + STEP_USER * s),
            4 * (750 + STEP_SYS * s),
            4 * (20000 + STEP_IDLE * s),
            4 * (250 + STEP_IOWAIT * s),
            4 * (25 + STEP_SOFTIRQ * s),
        );
        for id in ["cpu0", "cpu1", "cpu2", "cpu3"] {
            stat.push_str(&core(id));
        }
        stat.push_str(
            "\
intr 1000000 50 0 0 0 0 0 0 0 1 0 0 0 100 0 0 1000
ctxt 500000
btime 1700000000
processes 10000
procs_running 2
procs_blocked 0
",
        );
        fs.add_file("/proc/stat", stat);

        fs.add_file(
            "/proc/interrupts",
            format!(
                "\
            CPU0       CPU1       CPU2       CPU3
   0:         36          0          0          0   IO-APIC   2-edge      timer
  24:   {:>8}   {:>8}          0          0   PCI-MSI 512000-edge      ahci[0000:00:1f.2]
 NMI:          5          6          7          8   Non-maskable interrupts
 LOC:   {:>8}   {:>8}   {:>8}   {:>8}   Local timer interrupts
 ERR:          0
",
                1000 + 100 * s,
                2000 + 50 * s,
                100000 + 1000 * s,
                100000 + 1000 * s,
                100000 + 1000 * s,
                100000 + 1000 * s,
            ),
        );

        fs.add_file(
            "/proc/diskstats",
            format!(
                "\
   7       0 loop0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
   8       0 sda {} 100 {} {} {} 50 {} {} 0 {} {} 0 0 0 0
   8       1 sda1 {} 80 {} {} {} 40 {} {} 0 {} {} 0 0 0 0
   8       2 sda2 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0
 259       0 nvme0n1 {} 200 {} {} 30000 150 1500000 8000 5 {} {} 0 0 0 0
",
                12345 + 100 * s,
                987654 + 800 * s,
                5000 + 50 * s,
                6789 + 50 * s,
                456789 + 400 * s,
                3000 + 100 * s,
                4000 + 100 * s,
                8000 + 300 * s,
                10000 + 100 * s,
                800000 + 800 * s,
                4000 + 50 * s,
                5000 + 50 * s,
                400000 + 400 * s,
                2500 + 100 * s,
                3500 + 100 * s,
                6500 + 300 * s,
                50000 + 400 * s,
                2000000 + 3200 * s,
                10000 + 400 * s,
                15000 + 100 * s,
                18000 + 200 * s,
            ),
        );
        fs.add_block_device("loop0", &[]);
        fs.add_block_device("sda", &["sda1", "sda2"]);
        fs.add_block_device("nvme0n1", &[]);

        fs.add_file(
            "/proc/net/dev",
            format!(
                "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo: {}     1234    0    0    0     0          0         0  {}     1234    0    0    0     0       0          0
  eth0: {} {}    0    0    0     0          0         0 12345678    23456    0    0    0     0       0          0
",
                1234567 + 1024 * s,
                1234567 + 1024 * s,
                98765432 + 102400 * s,
                65432 + 100 * s,
            ),
        );

        fs.add_file(
            "/proc/meminfo",
            "\
MemTotal:       16384000 kB
MemFree:         8192000 kB
MemAvailable:   12000000 kB
Buffers:          512000 kB
Cached:          2048000 kB
SwapCached:            0 kB
Active:          4096000 kB
Inactive:        2048000 kB
SwapTotal:       4096000 kB
SwapFree:        4096000 kB
Dirty:              1024 kB
Writeback:             0 kB
AnonPages:       3000000 kB
Mapped:           400000 kB
Shmem:            100000 kB
Slab:             512000 kB
SReclaimable:     256000 kB
SUnreclaim:       256000 kB
KernelStack:       16000 kB
PageTables:        40000 kB
NFS_Unstable:          0 kB
Bounce:                0 kB
CommitLimit:    12288000 kB
Committed_AS:    6000000 kB
AnonHugePages:    200000 kB
HugePages_Total:       0
HugePages_Free:        0
HugePages_Rsvd:        0
HugePages_Surp:        0
Hugepagesize:       2048 kB
",
        );

        fs
    }

    /// A pre-2.6.33 kernel: 9-column cpu lines and a 7-column partition row.
    pub fn legacy_kernel() -> Self {
        let mut fs = Self::new();
        fs.add_file("/proc/sys/kernel/hostname", "old-box\n");
        fs.add_file(
            "/proc/stat",
            "\
cpu  200 0 100 1600 10 0 0 0 0
cpu0 100 0 50 800 5 0 0 0 0
cpu1 100 0 50 800 5 0 0 0 0
",
        );
        fs.add_file(
            "/proc/diskstats",
            "\
   3    0   hda 1000 10 8000 100 600 20 4800 200 0 300 300
   3    1   hda1 400 8000 300 2400
",
        );
        fs.add_block_device("hda", &["hda1"]);
        fs
    }
}
