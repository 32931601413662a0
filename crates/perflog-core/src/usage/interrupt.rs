//! Per-core interrupt rates from `/proc/interrupts` deltas.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{UsageError, du64, interval_secs, round_to};
use crate::storage::model::{InterruptStat, IrqKey};

/// Interrupts per second on each core, split by origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InterruptUsage {
    /// Device (numbered) IRQs per second, indexed by core.
    #[serde(rename = "core_dev_intr", serialize_with = "serialize_rates")]
    pub core_dev: Vec<f64>,
    /// System (named) IRQs per second, indexed by core.
    #[serde(rename = "core_sys_intr", serialize_with = "serialize_rates")]
    pub core_sys: Vec<f64>,
}

fn serialize_rates<S: serde::Serializer>(v: &[f64], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(v.iter().map(|x| round_to(*x, 2)))
}

/// Interrupt rates between two readings.
///
/// Both tables must have the same shape: the same number of rows and cores,
/// and the same IRQ at every position. Anything else is
/// [`UsageError::UnstableTopology`].
pub fn interrupt_usage(
    t1: DateTime<Utc>,
    prev: &InterruptStat,
    t2: DateTime<Utc>,
    cur: &InterruptStat,
) -> Result<InterruptUsage, UsageError> {
    let itv = interval_secs(t1, t2)?;

    if prev.num_core != cur.num_core {
        return Err(UsageError::UnstableTopology(format!(
            "interrupt core count changed from {} to {}",
            prev.num_core, cur.num_core
        )));
    }
    if prev.entries.len() != cur.entries.len() {
        return Err(UsageError::UnstableTopology(format!(
            "interrupt table changed from {} to {} rows",
            prev.entries.len(),
            cur.entries.len()
        )));
    }

    let num_core = cur.num_core;
    let mut dev = vec![0u64; num_core];
    let mut sys = vec![0u64; num_core];

    for (idx, (p, c)) in prev.entries.iter().zip(&cur.entries).enumerate() {
        if p.irq != c.irq {
            return Err(UsageError::UnstableTopology(format!(
                "irq at row {} changed from {:?} to {:?}",
                idx, p.irq, c.irq
            )));
        }
        if p.counts.len() != num_core || c.counts.len() != num_core {
            return Err(UsageError::UnstableTopology(format!(
                "irq {:?} has {} counts, expected {}",
                c.irq,
                c.counts.len().min(p.counts.len()),
                num_core
            )));
        }

        let sums = match c.irq {
            IrqKey::Device(_) => &mut dev,
            IrqKey::System(_) => &mut sys,
        };
        for (core, (pv, cv)) in p.counts.iter().zip(&c.counts).enumerate() {
            let delta = du64(*cv, *pv).ok_or_else(|| {
                UsageError::CounterRegression(format!(
                    "irq {:?} on core {} went from {} to {}",
                    c.irq, core, pv, cv
                ))
            })?;
            sums[core] += delta;
        }
    }

    Ok(InterruptUsage {
        core_dev: dev.into_iter().map(|n| n as f64 / itv).collect(),
        core_sys: sys.into_iter().map(|n| n as f64 / itv).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::model::InterruptStatEntry;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn row(irq: IrqKey, counts: Vec<u64>) -> InterruptStatEntry {
        InterruptStatEntry {
            irq,
            descr: String::new(),
            counts,
        }
    }

    fn table(entries: Vec<InterruptStatEntry>) -> InterruptStat {
        InterruptStat {
            num_core: 2,
            entries,
        }
    }

    #[test]
    fn splits_device_and_system_per_core() {
        let prev = table(vec![
            row(IrqKey::Device(0), vec![10, 0]),
            row(IrqKey::Device(24), vec![100, 200]),
            row(IrqKey::System("LOC".into()), vec![1000, 1000]),
        ]);
        let cur = table(vec![
            row(IrqKey::Device(0), vec![14, 2]),
            row(IrqKey::Device(24), vec![110, 200]),
            row(IrqKey::System("LOC".into()), vec![1400, 1200]),
        ]);
        let usage = interrupt_usage(t(0), &prev, t(2), &cur).unwrap();
        assert_eq!(usage.core_dev, vec![7.0, 1.0]);
        assert_eq!(usage.core_sys, vec![200.0, 100.0]);

        let v = serde_json::to_value(&usage).unwrap();
        assert_eq!(v["core_dev_intr"], serde_json::json!([7.0, 1.0]));
        assert_eq!(v["core_sys_intr"][1], 100.0);
    }

    #[test]
    fn shape_change_is_unstable_topology() {
        let prev = table(vec![row(IrqKey::Device(24), vec![1, 1])]);

        let more_rows = table(vec![
            row(IrqKey::Device(24), vec![2, 2]),
            row(IrqKey::Device(25), vec![0, 0]),
        ]);
        assert!(matches!(
            interrupt_usage(t(0), &prev, t(1), &more_rows),
            Err(UsageError::UnstableTopology(_))
        ));

        let renamed = table(vec![row(IrqKey::Device(25), vec![2, 2])]);
        assert!(matches!(
            interrupt_usage(t(0), &prev, t(1), &renamed),
            Err(UsageError::UnstableTopology(_))
        ));

        let mut more_cores = table(vec![row(IrqKey::Device(24), vec![2, 2, 2])]);
        more_cores.num_core = 3;
        assert!(matches!(
            interrupt_usage(t(0), &prev, t(1), &more_cores),
            Err(UsageError::UnstableTopology(_))
        ));
    }

    #[test]
    fn regressed_count_is_reported() {
        let prev = table(vec![row(IrqKey::System("NMI".into()), vec![5, 5])]);
        let cur = table(vec![row(IrqKey::System("NMI".into()), vec![5, 4])]);
        assert!(matches!(
            interrupt_usage(t(0), &prev, t(1), &cur),
            Err(UsageError::CounterRegression(_))
        ));
    }
}
