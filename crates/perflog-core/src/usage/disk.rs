//! Block device throughput, IOPS and latency from `/proc/diskstats` deltas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use super::{TOTAL_KEY, UsageError, du64, interval_secs, per_op, round_to};
use crate::storage::model::{DiskStat, DiskStatEntry};

/// Rates of one device (or of the synthesized total) over an interval.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskUsageEntry {
    /// Completed reads per second.
    pub rd_iops: f64,
    /// Completed writes per second.
    pub wr_iops: f64,
    /// Reads completed in the interval.
    pub rd_ios: u64,
    /// Writes completed in the interval.
    pub wr_ios: u64,
    /// Sectors read in the interval.
    pub rd_sectors: u64,
    /// Sectors written in the interval.
    pub wr_sectors: u64,
    /// Sectors read per second.
    pub rd_secps: f64,
    /// Sectors written per second.
    pub wr_secps: f64,
    /// Mean read latency, ms.
    pub rd_latency: f64,
    /// Mean write latency, ms.
    pub wr_latency: f64,
    /// Mean read size, sectors.
    pub avg_rd_size: f64,
    /// Mean write size, sectors.
    pub avg_wr_size: f64,
    /// Average request queue length.
    pub req_qlen: f64,
}

impl Serialize for DiskUsageEntry {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(9))?;
        map.serialize_entry("riops", &round_to(self.rd_iops, 2))?;
        map.serialize_entry("wiops", &round_to(self.wr_iops, 2))?;
        map.serialize_entry("rkbyteps", &round_to(self.rd_secps / 2.0, 2))?;
        map.serialize_entry("wkbyteps", &round_to(self.wr_secps / 2.0, 2))?;
        map.serialize_entry("rlatency", &round_to(self.rd_latency, 3))?;
        map.serialize_entry("wlatency", &round_to(self.wr_latency, 3))?;
        map.serialize_entry("rsize", &round_to(self.avg_rd_size, 2))?;
        map.serialize_entry("wsize", &round_to(self.avg_wr_size, 2))?;
        map.serialize_entry("qlen", &round_to(self.req_qlen, 2))?;
        map.end()
    }
}

/// Per-device usage plus the aggregate when two or more devices contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiskUsage {
    pub devices: BTreeMap<String, DiskUsageEntry>,
    pub total: Option<DiskUsageEntry>,
}

impl DiskUsage {
    /// Looks up a device, or the aggregate under [`TOTAL_KEY`].
    pub fn get(&self, name: &str) -> Option<&DiskUsageEntry> {
        if name == TOTAL_KEY {
            self.total.as_ref()
        } else {
            self.devices.get(name)
        }
    }
}

impl Serialize for DiskUsage {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(None)?;
        let names: Vec<&String> = self.devices.keys().collect();
        map.serialize_entry("devices", &names)?;
        for (name, entry) in &self.devices {
            map.serialize_entry(name, entry)?;
        }
        if let Some(total) = &self.total {
            map.serialize_entry(TOTAL_KEY, total)?;
        }
        map.end()
    }
}

/// Counter deltas of one device; `None` if any counter regressed.
fn device_delta(prev: &DiskStatEntry, cur: &DiskStatEntry) -> Option<DiskStatEntry> {
    Some(DiskStatEntry {
        major: cur.major,
        minor: cur.minor,
        name: cur.name.clone(),
        rd_ios: du64(cur.rd_ios, prev.rd_ios)?,
        rd_merges: du64(cur.rd_merges, prev.rd_merges)?,
        rd_sectors: du64(cur.rd_sectors, prev.rd_sectors)?,
        rd_ticks: du64(cur.rd_ticks, prev.rd_ticks)?,
        wr_ios: du64(cur.wr_ios, prev.wr_ios)?,
        wr_merges: du64(cur.wr_merges, prev.wr_merges)?,
        wr_sectors: du64(cur.wr_sectors, prev.wr_sectors)?,
        wr_ticks: du64(cur.wr_ticks, prev.wr_ticks)?,
        ios_pgr: cur.ios_pgr,
        total_ticks: du64(cur.total_ticks, prev.total_ticks)?,
        req_ticks: du64(cur.req_ticks, prev.req_ticks)?,
    })
}

fn entry_from_delta(d: &DiskStatEntry, itv: f64) -> DiskUsageEntry {
    DiskUsageEntry {
        rd_iops: d.rd_ios as f64 / itv,
        wr_iops: d.wr_ios as f64 / itv,
        rd_ios: d.rd_ios,
        wr_ios: d.wr_ios,
        rd_sectors: d.rd_sectors,
        wr_sectors: d.wr_sectors,
        rd_secps: d.rd_sectors as f64 / itv,
        wr_secps: d.wr_sectors as f64 / itv,
        rd_latency: per_op(d.rd_ticks, d.rd_ios),
        wr_latency: per_op(d.wr_ticks, d.wr_ios),
        avg_rd_size: per_op(d.rd_sectors, d.rd_ios),
        avg_wr_size: per_op(d.wr_sectors, d.wr_ios),
        req_qlen: d.req_ticks as f64 / itv / 1000.0,
    }
}

/// Disk usage between two readings taken at `t1` and `t2`.
///
/// Devices are matched by name. A device missing from `cur`, rejected by
/// `filter`, or with any counter gone backwards is left out. The total sums
/// rates and amounts, and weights latency and request size by each device's
/// I/O count.
pub fn disk_usage(
    t1: DateTime<Utc>,
    prev: &DiskStat,
    t2: DateTime<Utc>,
    cur: &DiskStat,
    filter: Option<&Regex>,
) -> Result<DiskUsage, UsageError> {
    let itv = interval_secs(t1, t2)?;

    let mut usage = DiskUsage::default();
    let mut total = DiskUsageEntry::default();

    for p in &prev.entries {
        if let Some(re) = filter {
            if !re.is_match(&p.name) {
                continue;
            }
        }
        let Some(c) = cur.entries.iter().find(|e| e.name == p.name) else {
            debug!(device = %p.name, "device disappeared between snapshots");
            continue;
        };
        let Some(delta) = device_delta(p, c) else {
            debug!(device = %p.name, "disk counters regressed, skipping device");
            continue;
        };

        let entry = entry_from_delta(&delta, itv);

        total.rd_iops += entry.rd_iops;
        total.wr_iops += entry.wr_iops;
        total.rd_ios += entry.rd_ios;
        total.wr_ios += entry.wr_ios;
        total.rd_sectors += entry.rd_sectors;
        total.wr_sectors += entry.wr_sectors;
        total.rd_secps += entry.rd_secps;
        total.wr_secps += entry.wr_secps;
        total.rd_latency += entry.rd_latency * entry.rd_ios as f64;
        total.wr_latency += entry.wr_latency * entry.wr_ios as f64;
        total.avg_rd_size += entry.avg_rd_size * entry.rd_ios as f64;
        total.avg_wr_size += entry.avg_wr_size * entry.wr_ios as f64;
        total.req_qlen += entry.req_qlen;

        usage.devices.insert(p.name.clone(), entry);
    }

    if total.rd_ios > 0 {
        total.rd_latency /= total.rd_ios as f64;
        total.avg_rd_size /= total.rd_ios as f64;
    }
    if total.wr_ios > 0 {
        total.wr_latency /= total.wr_ios as f64;
        total.avg_wr_size /= total.wr_ios as f64;
    }
    if usage.devices.len() > 1 {
        usage.total = Some(total);
    }

    Ok(usage)
}
