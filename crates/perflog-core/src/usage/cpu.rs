//! CPU utilisation from `/proc/stat` tick counters.

use serde::Serialize;

use super::{UsageError, serialize_2dp};
use crate::storage::model::{CpuCoreStat, CpuStat};

/// Percentage of elapsed ticks spent in each category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CpuCoreUsage {
    #[serde(rename = "usr", serialize_with = "serialize_2dp")]
    pub user: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub nice: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub sys: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub idle: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub iowait: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub hardirq: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub softirq: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub steal: f64,
    #[serde(serialize_with = "serialize_2dp")]
    pub guest: f64,
    #[serde(rename = "guestnice", serialize_with = "serialize_2dp")]
    pub guest_nice: f64,
}

impl CpuCoreUsage {
    /// Sum of all categories; ~100 for a core, ~100 × cores for the aggregate.
    pub fn total(&self) -> f64 {
        self.user
            + self.nice
            + self.sys
            + self.idle
            + self.iowait
            + self.hardirq
            + self.softirq
            + self.steal
            + self.guest
            + self.guest_nice
    }

    /// Busy share, i.e. everything but idle and iowait.
    pub fn busy(&self) -> f64 {
        self.total() - self.idle - self.iowait
    }

    fn scale(&mut self, factor: f64) {
        self.user *= factor;
        self.nice *= factor;
        self.sys *= factor;
        self.idle *= factor;
        self.iowait *= factor;
        self.hardirq *= factor;
        self.softirq *= factor;
        self.steal *= factor;
        self.guest *= factor;
        self.guest_nice *= factor;
    }
}

/// Aggregate and per-core utilisation.
///
/// The aggregate is scaled by the core count, so one fully busy core adds
/// 100 points regardless of how many cores exist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuUsage {
    pub num_core: usize,
    pub all: CpuCoreUsage,
    pub cores: Vec<CpuCoreUsage>,
}

/// Percentage `Δ / itv`, clamped at zero against accounting skew.
fn pct(prev: f64, cur: f64, itv: f64) -> f64 {
    let v = (cur - prev) / itv * 100.0;
    if v < 0.0 { 0.0 } else { v }
}

/// Utilisation of one core between two readings.
///
/// A core whose counters did not move at all yields all-zero usage.
pub fn cpu_core_usage(prev: &CpuCoreStat, cur: &CpuCoreStat) -> Result<CpuCoreUsage, UsageError> {
    let (p, c) = (prev.uptime(), cur.uptime());
    if c < p {
        return Err(UsageError::CounterRegression(format!(
            "cpu uptime went from {} to {}",
            p, c
        )));
    }
    if c == p {
        return Ok(CpuCoreUsage::default());
    }
    Ok(core_usage(prev, cur, (c - p) as f64))
}

fn core_usage(prev: &CpuCoreStat, cur: &CpuCoreStat, itv: f64) -> CpuCoreUsage {
    let f = |v: u64| v as f64;
    CpuCoreUsage {
        user: pct(
            f(prev.user) - f(prev.guest),
            f(cur.user) - f(cur.guest),
            itv,
        ),
        nice: pct(
            f(prev.nice) - f(prev.guest_nice),
            f(cur.nice) - f(cur.guest_nice),
            itv,
        ),
        sys: pct(f(prev.sys), f(cur.sys), itv),
        idle: pct(f(prev.idle), f(cur.idle), itv),
        iowait: pct(f(prev.iowait), f(cur.iowait), itv),
        hardirq: pct(f(prev.hardirq), f(cur.hardirq), itv),
        softirq: pct(f(prev.softirq), f(cur.softirq), itv),
        steal: pct(f(prev.steal), f(cur.steal), itv),
        guest: pct(f(prev.guest), f(cur.guest), itv),
        guest_nice: pct(f(prev.guest_nice), f(cur.guest_nice), itv),
    }
}

/// Utilisation between two CPU readings.
///
/// Unlike a single core, the aggregate must have advanced: two readings with
/// identical aggregate uptime fail with [`UsageError::InvalidInterval`].
pub fn cpu_usage(prev: &CpuStat, cur: &CpuStat) -> Result<CpuUsage, UsageError> {
    if prev.num_core != cur.num_core
        || prev.cores.len() != prev.num_core
        || cur.cores.len() != cur.num_core
    {
        return Err(UsageError::UnstableTopology(format!(
            "core count changed from {} to {}",
            prev.num_core, cur.num_core
        )));
    }

    let cores = prev
        .cores
        .iter()
        .zip(&cur.cores)
        .map(|(p, c)| cpu_core_usage(p, c))
        .collect::<Result<Vec<_>, _>>()?;

    let (p, c) = (prev.all.uptime(), cur.all.uptime());
    if c < p {
        return Err(UsageError::CounterRegression(format!(
            "aggregate cpu uptime went from {} to {}",
            p, c
        )));
    }
    if c == p {
        return Err(UsageError::InvalidInterval(
            "no cpu ticks elapsed between snapshots".into(),
        ));
    }

    let mut all = core_usage(&prev.all, &cur.all, (c - p) as f64);
    all.scale(cur.num_core as f64);

    Ok(CpuUsage {
        num_core: cur.num_core,
        all,
        cores,
    })
}
