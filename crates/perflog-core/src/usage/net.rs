//! Network interface rates from `/proc/net/dev` deltas.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use tracing::debug;

use super::{TOTAL_KEY, UsageError, du64, interval_secs, round_to};
use crate::storage::model::{NetStat, NetStatEntry};

/// Per-second rates of every `/proc/net/dev` counter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetUsageEntry {
    pub rx_bytes_per_sec: f64,
    pub rx_packets_per_sec: f64,
    pub rx_errors_per_sec: f64,
    pub rx_drops_per_sec: f64,
    pub rx_fifo_per_sec: f64,
    pub rx_frame_per_sec: f64,
    pub rx_compressed_per_sec: f64,
    pub rx_multicast_per_sec: f64,
    pub tx_bytes_per_sec: f64,
    pub tx_packets_per_sec: f64,
    pub tx_errors_per_sec: f64,
    pub tx_drops_per_sec: f64,
    pub tx_fifo_per_sec: f64,
    pub tx_frame_per_sec: f64,
    pub tx_compressed_per_sec: f64,
    pub tx_multicast_per_sec: f64,
}

impl NetUsageEntry {
    fn add(&mut self, o: &NetUsageEntry) {
        self.rx_bytes_per_sec += o.rx_bytes_per_sec;
        self.rx_packets_per_sec += o.rx_packets_per_sec;
        self.rx_errors_per_sec += o.rx_errors_per_sec;
        self.rx_drops_per_sec += o.rx_drops_per_sec;
        self.rx_fifo_per_sec += o.rx_fifo_per_sec;
        self.rx_frame_per_sec += o.rx_frame_per_sec;
        self.rx_compressed_per_sec += o.rx_compressed_per_sec;
        self.rx_multicast_per_sec += o.rx_multicast_per_sec;
        self.tx_bytes_per_sec += o.tx_bytes_per_sec;
        self.tx_packets_per_sec += o.tx_packets_per_sec;
        self.tx_errors_per_sec += o.tx_errors_per_sec;
        self.tx_drops_per_sec += o.tx_drops_per_sec;
        self.tx_fifo_per_sec += o.tx_fifo_per_sec;
        self.tx_frame_per_sec += o.tx_frame_per_sec;
        self.tx_compressed_per_sec += o.tx_compressed_per_sec;
        self.tx_multicast_per_sec += o.tx_multicast_per_sec;
    }
}

impl Serialize for NetUsageEntry {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(8))?;
        map.serialize_entry("rxkbyteps", &round_to(self.rx_bytes_per_sec / 1024.0, 2))?;
        map.serialize_entry("rxpktps", &round_to(self.rx_packets_per_sec, 2))?;
        map.serialize_entry("rxerrps", &round_to(self.rx_errors_per_sec, 2))?;
        map.serialize_entry("rxdropps", &round_to(self.rx_drops_per_sec, 2))?;
        map.serialize_entry("txkbyteps", &round_to(self.tx_bytes_per_sec / 1024.0, 2))?;
        map.serialize_entry("txpktps", &round_to(self.tx_packets_per_sec, 2))?;
        map.serialize_entry("txerrps", &round_to(self.tx_errors_per_sec, 2))?;
        map.serialize_entry("txdropps", &round_to(self.tx_drops_per_sec, 2))?;
        map.end()
    }
}

/// Per-interface usage plus the sum over all contributing interfaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetUsage {
    pub interfaces: BTreeMap<String, NetUsageEntry>,
    pub total: Option<NetUsageEntry>,
}

impl NetUsage {
    pub fn get(&self, name: &str) -> Option<&NetUsageEntry> {
        if name == TOTAL_KEY {
            self.total.as_ref()
        } else {
            self.interfaces.get(name)
        }
    }
}

impl Serialize for NetUsage {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(None)?;
        let names: Vec<&String> = self.interfaces.keys().collect();
        map.serialize_entry("devices", &names)?;
        for (name, entry) in &self.interfaces {
            map.serialize_entry(name, entry)?;
        }
        if let Some(total) = &self.total {
            map.serialize_entry(TOTAL_KEY, total)?;
        }
        map.end()
    }
}

fn interface_rates(p: &NetStatEntry, c: &NetStatEntry, itv: f64) -> Option<NetUsageEntry> {
    let rate = |cur: u64, prev: u64| du64(cur, prev).map(|d| d as f64 / itv);
    Some(NetUsageEntry {
        rx_bytes_per_sec: rate(c.rx_bytes, p.rx_bytes)?,
        rx_packets_per_sec: rate(c.rx_packets, p.rx_packets)?,
        rx_errors_per_sec: rate(c.rx_errors, p.rx_errors)?,
        rx_drops_per_sec: rate(c.rx_drops, p.rx_drops)?,
        rx_fifo_per_sec: rate(c.rx_fifo, p.rx_fifo)?,
        rx_frame_per_sec: rate(c.rx_frame, p.rx_frame)?,
        rx_compressed_per_sec: rate(c.rx_compressed, p.rx_compressed)?,
        rx_multicast_per_sec: rate(c.rx_multicast, p.rx_multicast)?,
        tx_bytes_per_sec: rate(c.tx_bytes, p.tx_bytes)?,
        tx_packets_per_sec: rate(c.tx_packets, p.tx_packets)?,
        tx_errors_per_sec: rate(c.tx_errors, p.tx_errors)?,
        tx_drops_per_sec: rate(c.tx_drops, p.tx_drops)?,
        tx_fifo_per_sec: rate(c.tx_fifo, p.tx_fifo)?,
        tx_frame_per_sec: rate(c.tx_frame, p.tx_frame)?,
        tx_compressed_per_sec: rate(c.tx_compressed, p.tx_compressed)?,
        tx_multicast_per_sec: rate(c.tx_multicast, p.tx_multicast)?,
    })
}

/// Network usage between two readings.
///
/// Interfaces missing from `cur` or with regressed counters are left out.
/// The total is present whenever at least one interface contributed.
pub fn net_usage(
    t1: DateTime<Utc>,
    prev: &NetStat,
    t2: DateTime<Utc>,
    cur: &NetStat,
) -> Result<NetUsage, UsageError> {
    let itv = interval_secs(t1, t2)?;

    let mut usage = NetUsage::default();
    let mut total = NetUsageEntry::default();

    for p in &prev.entries {
        let Some(c) = cur.entries.iter().find(|e| e.name == p.name) else {
            debug!(interface = %p.name, "interface disappeared between snapshots");
            continue;
        };
        let Some(entry) = interface_rates(p, c, itv) else {
            debug!(interface = %p.name, "net counters regressed, skipping interface");
            continue;
        };
        total.add(&entry);
        usage.interfaces.insert(p.name.clone(), entry);
    }

    if !usage.interfaces.is_empty() {
        usage.total = Some(total);
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn iface(name: &str, rx_bytes: u64, tx_packets: u64) -> NetStatEntry {
        NetStatEntry {
            name: name.to_string(),
            rx_bytes,
            tx_packets,
            ..Default::default()
        }
    }

    #[test]
    fn single_interface_has_total() {
        let prev = NetStat {
            entries: vec![iface("eth0", 0, 0)],
        };
        let cur = NetStat {
            entries: vec![iface("eth0", 4096, 20)],
        };
        let usage = net_usage(t(0), &prev, t(2), &cur).unwrap();

        assert_eq!(usage.interfaces["eth0"].rx_bytes_per_sec, 2048.0);
        assert_eq!(usage.interfaces["eth0"].tx_packets_per_sec, 10.0);
        assert_eq!(usage.total.as_ref(), usage.interfaces.get("eth0"));
    }

    #[test]
    fn total_sums_interfaces() {
        let prev = NetStat {
            entries: vec![iface("eth0", 0, 0), iface("lo", 0, 0)],
        };
        let cur = NetStat {
            entries: vec![iface("lo", 100, 1), iface("eth0", 300, 3)],
        };
        let usage = net_usage(t(0), &prev, t(1), &cur).unwrap();
        let total = usage.get(TOTAL_KEY).unwrap();
        assert_eq!(total.rx_bytes_per_sec, 400.0);
        assert_eq!(total.tx_packets_per_sec, 4.0);
    }

    #[test]
    fn removed_interface_is_excluded() {
        let prev = NetStat {
            entries: vec![iface("eth0", 0, 0), iface("veth1", 0, 0)],
        };
        let cur = NetStat {
            entries: vec![iface("eth0", 10, 0)],
        };
        let usage = net_usage(t(0), &prev, t(1), &cur).unwrap();
        assert_eq!(usage.interfaces.len(), 1);
        assert!(usage.get("veth1").is_none());
        assert_eq!(usage.total.as_ref().unwrap().rx_bytes_per_sec, 10.0);
    }

    #[test]
    fn no_comparable_interface_means_no_total() {
        let prev = NetStat {
            entries: vec![iface("eth0", 100, 0)],
        };
        let cur = NetStat {
            entries: vec![iface("eth0", 50, 0)],
        };
        let usage = net_usage(t(0), &prev, t(1), &cur).unwrap();
        assert!(usage.interfaces.is_empty());
        assert!(usage.total.is_none());
    }

    #[test]
    fn json_shape() {
        let prev = NetStat {
            entries: vec![iface("eth0", 0, 0)],
        };
        let cur = NetStat {
            entries: vec![iface("eth0", 2048, 5)],
        };
        let usage = net_usage(t(0), &prev, t(1), &cur).unwrap();
        let v = serde_json::to_value(&usage).unwrap();
        assert_eq!(v["devices"], serde_json::json!(["eth0"]));
        assert_eq!(v["eth0"]["rxkbyteps"], 2.0);
        assert_eq!(v["total"]["txpktps"], 5.0);
        assert!(v["eth0"].get("rxfifops").is_none());
    }
}
