//! Snapshot acquisition from `/proc` and `/sys/block`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;

use crate::collector::acquirer::{CollectError, DeviceFilter, MetricSet, SnapshotAcquirer};
use crate::collector::procfs::parser::{
    parse_cpu_stat, parse_diskstats, parse_diskstats_names, parse_interrupts, parse_meminfo,
    parse_net_dev,
};
use crate::collector::traits::FileSystem;
use crate::storage::model::{
    CpuStat, DiskStat, InterruptStat, LinuxDevice, LinuxHeader, MemStat, NetStat, PlatformHeader,
    Snapshot,
};

/// Reads every metric family from the Linux `/proc` filesystem.
pub struct ProcfsAcquirer<F: FileSystem> {
    fs: F,
    proc_path: PathBuf,
    sys_path: PathBuf,
    filter: DeviceFilter,
}

impl<F: FileSystem> ProcfsAcquirer<F> {
    /// Creates a new acquirer.
    ///
    /// # Arguments
    /// * `fs` - Filesystem implementation (real or mock)
    /// * `proc_path` - Base path to proc filesystem (usually "/proc")
    /// * `sys_path` - Base path to sysfs (usually "/sys")
    pub fn new(fs: F, proc_path: impl Into<PathBuf>, sys_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            sys_path: sys_path.into(),
            filter: DeviceFilter::All,
        }
    }

    /// Restricts disk capture to the devices `filter` admits.
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    fn read_proc(&self, name: &str) -> Result<String, CollectError> {
        Ok(self.fs.read_to_string(&self.proc_path.join(name))?)
    }

    fn block_dir(&self, name: &str) -> PathBuf {
        self.sys_path.join("block").join(name)
    }

    /// A whole device has its own directory under `/sys/block`.
    fn is_whole_device(&self, name: &str) -> bool {
        self.fs.is_dir(&self.block_dir(name))
    }

    /// Partitions are the children of `/sys/block/<dev>` that carry a `stat` file.
    fn partitions(&self, name: &str) -> Result<Vec<String>, CollectError> {
        let mut parts: Vec<String> = self
            .fs
            .read_dir(&self.block_dir(name))?
            .into_iter()
            .filter(|p| self.fs.exists(&p.join("stat")))
            .filter_map(|p| file_name(&p))
            .collect();
        parts.sort();
        Ok(parts)
    }

    /// Collects CPU counters from `/proc/stat`.
    pub fn collect_cpu(&self) -> Result<CpuStat, CollectError> {
        Ok(parse_cpu_stat(&self.read_proc("stat")?)?)
    }

    /// Collects interrupt counters from `/proc/interrupts`.
    pub fn collect_interrupts(&self) -> Result<InterruptStat, CollectError> {
        Ok(parse_interrupts(&self.read_proc("interrupts")?)?)
    }

    /// Collects disk counters from `/proc/diskstats`.
    ///
    /// Rows that never saw a read or a write are dropped, as are rows the
    /// device filter rejects.
    pub fn collect_disk(&self) -> Result<DiskStat, CollectError> {
        let entries = parse_diskstats(&self.read_proc("diskstats")?)?
            .into_iter()
            .filter(|e| e.rd_ios != 0 || e.wr_ios != 0)
            .filter(|e| match &self.filter {
                DeviceFilter::All => self.is_whole_device(&e.name),
                other => other.admits(&e.name),
            })
            .collect();
        Ok(DiskStat { entries })
    }

    /// Collects interface counters from `/proc/net/dev`.
    pub fn collect_net(&self) -> Result<NetStat, CollectError> {
        Ok(parse_net_dev(&self.read_proc("net/dev")?)?)
    }

    /// Collects memory gauges from `/proc/meminfo`.
    pub fn collect_mem(&self) -> Result<MemStat, CollectError> {
        Ok(parse_meminfo(&self.read_proc("meminfo")?)?)
    }
}

impl<F: FileSystem> SnapshotAcquirer for ProcfsAcquirer<F> {
    fn capture(&mut self, metrics: &MetricSet) -> Result<Snapshot, CollectError> {
        let mut snapshot = Snapshot::new(Utc::now());

        if metrics.cpu {
            snapshot.cpu = Some(self.collect_cpu()?);
        }
        if metrics.interrupt {
            snapshot.interrupt = Some(self.collect_interrupts()?);
        }
        if metrics.disk {
            snapshot.disk = Some(self.collect_disk()?);
        }
        if metrics.net {
            snapshot.net = Some(self.collect_net()?);
        }
        if metrics.mem {
            snapshot.mem = Some(self.collect_mem()?);
        }

        debug!(families = %snapshot.describe(), "captured snapshot");
        Ok(snapshot)
    }

    fn platform_header(&self) -> Result<PlatformHeader, CollectError> {
        let devs_parts = parse_diskstats_names(&self.read_proc("diskstats")?);

        let mut devices = BTreeMap::new();
        for name in &devs_parts {
            if self.is_whole_device(name) {
                devices.insert(
                    name.clone(),
                    LinuxDevice {
                        name: name.clone(),
                        parts: self.partitions(name)?,
                    },
                );
            }
        }

        Ok(PlatformHeader::Linux(LinuxHeader {
            devices,
            devs_parts,
        }))
    }

    fn hostname(&self) -> Result<String, CollectError> {
        let raw = self.read_proc("sys/kernel/hostname")?;
        let name = raw.trim();
        if name.is_empty() {
            return Err(CollectError::Parse("empty hostname".into()));
        }
        Ok(name.to_string())
    }
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::mock::MockFs;

    fn acquirer(fs: MockFs) -> ProcfsAcquirer<MockFs> {
        ProcfsAcquirer::new(fs, "/proc", "/sys")
    }

    #[test]
    fn captures_enabled_families_only() {
        let mut acq = acquirer(MockFs::typical_system());
        let mut metrics = MetricSet::all();
        metrics.net = false;
        metrics.interrupt = false;

        let snap = acq.capture(&metrics).unwrap();
        assert_eq!(snap.cpu.as_ref().unwrap().num_core, 4);
        assert!(snap.interrupt.is_none());
        assert!(snap.net.is_none());
        assert!(snap.disk.is_some());
        assert_eq!(snap.mem.as_ref().unwrap().mem_total, 16384000);
    }

    #[test]
    fn disk_keeps_whole_devices_with_io() {
        let acq = acquirer(MockFs::typical_system());
        let disk = acq.collect_disk().unwrap();
        let names: Vec<_> = disk.entries.iter().map(|e| e.name.as_str()).collect();
        // sda1 is a partition, loop0 never did any I/O
        assert_eq!(names, vec!["sda", "nvme0n1"]);
    }

    #[test]
    fn disk_allow_list_admits_partitions() {
        let acq = acquirer(MockFs::typical_system())
            .with_filter(DeviceFilter::allow(["sda1", "loop0"]));
        let disk = acq.collect_disk().unwrap();
        let names: Vec<_> = disk.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["sda1"]);
    }

    #[test]
    fn disk_pattern_filter() {
        let acq = acquirer(MockFs::typical_system())
            .with_filter(DeviceFilter::pattern("^sd").unwrap());
        let disk = acq.collect_disk().unwrap();
        assert_eq!(disk.entries.len(), 2);
    }

    #[test]
    fn platform_header_lists_devices_and_partitions() {
        let acq = acquirer(MockFs::typical_system());
        let PlatformHeader::Linux(header) = acq.platform_header().unwrap() else {
            panic!("expected linux header");
        };
        assert_eq!(
            header.devs_parts,
            vec!["loop0", "sda", "sda1", "sda2", "nvme0n1"]
        );
        assert_eq!(header.devices.len(), 3);
        assert_eq!(header.devices["sda"].parts, vec!["sda1", "sda2"]);
        assert!(header.devices["nvme0n1"].parts.is_empty());
    }

    #[test]
    fn hostname_is_trimmed() {
        let acq = acquirer(MockFs::typical_system());
        assert_eq!(acq.hostname().unwrap(), "db-01");
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut fs = MockFs::typical_system();
        fs.remove_file("/proc/interrupts");
        let mut acq = acquirer(fs);
        assert!(matches!(
            acq.capture(&MetricSet::all()),
            Err(CollectError::Io(_))
        ));

        let mut metrics = MetricSet::all();
        metrics.interrupt = false;
        assert!(acq.capture(&metrics).is_ok());
    }

    #[test]
    fn legacy_kernel_layout() {
        let acq = acquirer(MockFs::legacy_kernel());
        let cpu = acq.collect_cpu().unwrap();
        assert_eq!(cpu.num_core, 2);
        assert_eq!(cpu.all.guest_nice, 0);

        let acq = acq.with_filter(DeviceFilter::allow(["hda1"]));
        let disk = acq.collect_disk().unwrap();
        assert_eq!(disk.entries[0].wr_sectors, 2400);
    }

    #[test]
    fn custom_roots() {
        let mut fs = MockFs::new();
        fs.add_file("/host/proc/stat", "cpu  1 0 0 1\ncpu0 1 0 0 1\n");
        let acq = ProcfsAcquirer::new(fs, "/host/proc", "/host/sys");
        assert_eq!(acq.collect_cpu().unwrap().num_core, 1);
    }
}
