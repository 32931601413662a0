//! Rate computation over pairs of snapshots.
//!
//! Every function here is pure: it takes two raw counter snapshots (and their
//! timestamps) and returns rates, percentages or derived gauges. A pair that
//! cannot produce a meaningful sample fails with a [`UsageError`] and callers
//! skip it.

mod cpu;
mod disk;
mod interrupt;
mod memory;
mod net;

use std::fmt;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Serialize, Serializer};

pub use cpu::{CpuCoreUsage, CpuUsage, cpu_core_usage, cpu_usage};
pub use disk::{DiskUsage, DiskUsageEntry, disk_usage};
pub use interrupt::{InterruptUsage, interrupt_usage};
pub use memory::{MemUsage, mem_usage};
pub use net::{NetUsage, NetUsageEntry, net_usage};

use crate::storage::model::Snapshot;

/// Key of the synthesized aggregate entry in disk and network usage.
pub const TOTAL_KEY: &str = "total";

/// Why a pair of snapshots produced no usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// Elapsed time (or elapsed CPU ticks) is not positive.
    InvalidInterval(String),
    /// A monotonic counter went backwards.
    CounterRegression(String),
    /// The set or order of cores or IRQs changed between the snapshots.
    UnstableTopology(String),
    /// A required family is absent.
    MissingData(String),
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsageError::InvalidInterval(msg) => write!(f, "invalid interval: {}", msg),
            UsageError::CounterRegression(msg) => write!(f, "counter regression: {}", msg),
            UsageError::UnstableTopology(msg) => write!(f, "unstable topology: {}", msg),
            UsageError::MissingData(msg) => write!(f, "missing data: {}", msg),
        }
    }
}

impl std::error::Error for UsageError {}

/// Elapsed seconds between two capture times; fails unless strictly positive.
pub fn interval_secs(t1: DateTime<Utc>, t2: DateTime<Utc>) -> Result<f64, UsageError> {
    let nanos = (t2 - t1)
        .num_nanoseconds()
        .ok_or_else(|| UsageError::InvalidInterval("interval overflows".into()))?;
    if nanos <= 0 {
        return Err(UsageError::InvalidInterval(format!(
            "non-positive interval of {} ns",
            nanos
        )));
    }
    Ok(nanos as f64 / 1e9)
}

/// Counter delta, `None` on regression (wrap, reset or device swap).
pub(crate) fn du64(curr: u64, prev: u64) -> Option<u64> {
    curr.checked_sub(prev)
}

/// `part / whole`, or zero when nothing happened.
pub(crate) fn per_op(part: u64, ops: u64) -> f64 {
    if ops == 0 { 0.0 } else { part as f64 / ops as f64 }
}

/// Rounds for output, matching the precision consumers expect.
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

pub(crate) fn serialize_2dp<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_to(*value, 2))
}

pub(crate) fn serialize_3dp<S: Serializer>(value: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(round_to(*value, 3))
}

fn serialize_unix_secs<S: Serializer>(time: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    let secs = time.timestamp() as f64 + time.timestamp_subsec_nanos() as f64 / 1e9;
    s.serialize_f64(round_to(secs, 3))
}

/// Usage of every family present in a pair of snapshots.
///
/// Serializes to one player output line:
/// `{"time","elapsed_time","cpu"?,"intr"?,"disk"?,"net"?,"mem"?}`.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    /// Capture time of the later snapshot, as fractional unix seconds.
    #[serde(serialize_with = "serialize_unix_secs")]
    pub time: DateTime<Utc>,
    /// Seconds since the first snapshot of the log.
    #[serde(serialize_with = "serialize_3dp")]
    pub elapsed_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intr: Option<InterruptUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net: Option<NetUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem: Option<MemUsage>,
}

impl UsageReport {
    /// Computes usage between `prev` and `cur` for every family present in
    /// `cur`. Any failing family fails the whole pair.
    ///
    /// `first` is the first snapshot of the log, used for `elapsed_time`.
    pub fn between(
        first: &Snapshot,
        prev: &Snapshot,
        cur: &Snapshot,
        disk_filter: Option<&Regex>,
    ) -> Result<Self, UsageError> {
        let elapsed = (cur.time - first.time)
            .num_nanoseconds()
            .map(|n| n as f64 / 1e9)
            .unwrap_or(0.0);

        let cpu = match &cur.cpu {
            Some(c) => Some(cpu_usage(required(&prev.cpu, "cpu")?, c)?),
            None => None,
        };
        let intr = match &cur.interrupt {
            Some(i) => Some(interrupt_usage(
                prev.time,
                required(&prev.interrupt, "interrupt")?,
                cur.time,
                i,
            )?),
            None => None,
        };
        let disk = match &cur.disk {
            Some(d) => Some(disk_usage(
                prev.time,
                required(&prev.disk, "disk")?,
                cur.time,
                d,
                disk_filter,
            )?),
            None => None,
        };
        let net = match &cur.net {
            Some(n) => Some(net_usage(
                prev.time,
                required(&prev.net, "net")?,
                cur.time,
                n,
            )?),
            None => None,
        };
        let mem = match &cur.mem {
            Some(m) => Some(mem_usage(Some(m))?),
            None => None,
        };

        Ok(Self {
            time: cur.time,
            elapsed_time: elapsed,
            cpu,
            intr,
            disk,
            net,
            mem,
        })
    }
}

fn required<'a, T>(family: &'a Option<T>, name: &str) -> Result<&'a T, UsageError> {
    family
        .as_ref()
        .ok_or_else(|| UsageError::MissingData(format!("{} absent in previous snapshot", name)))
}
