//! The capture capability the recorder drives, and what it is asked for.

use std::collections::BTreeSet;
use std::fmt;

use regex::Regex;

use crate::collector::procfs::parser::ParseError;
use crate::storage::model::{PlatformHeader, Snapshot};

/// Error type for acquisition failures.
#[derive(Debug)]
pub enum CollectError {
    /// I/O error reading a `/proc` or `/sys` file.
    Io(std::io::Error),
    /// Parse error in a `/proc` file.
    Parse(String),
}

impl fmt::Display for CollectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectError::Io(e) => write!(f, "I/O error: {}", e),
            CollectError::Parse(msg) => write!(f, "parse error: {}", msg),
        }
    }
}

impl std::error::Error for CollectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectError::Io(e) => Some(e),
            CollectError::Parse(_) => None,
        }
    }
}

impl From<std::io::Error> for CollectError {
    fn from(e: std::io::Error) -> Self {
        CollectError::Io(e)
    }
}

impl From<ParseError> for CollectError {
    fn from(e: ParseError) -> Self {
        CollectError::Parse(e.message)
    }
}

/// Metric families to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricSet {
    pub cpu: bool,
    pub interrupt: bool,
    pub disk: bool,
    pub net: bool,
    pub mem: bool,
}

impl MetricSet {
    /// Every family enabled.
    pub const fn all() -> Self {
        Self {
            cpu: true,
            interrupt: true,
            disk: true,
            net: true,
            mem: true,
        }
    }

    /// Every family disabled.
    pub const fn none() -> Self {
        Self {
            cpu: false,
            interrupt: false,
            disk: false,
            net: false,
            mem: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.cpu || self.interrupt || self.disk || self.net || self.mem)
    }

    /// Names of the enabled families, for logging.
    pub fn names(&self) -> Vec<&'static str> {
        [
            (self.cpu, "cpu"),
            (self.interrupt, "intr"),
            (self.disk, "disk"),
            (self.net, "net"),
            (self.mem, "mem"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::all()
    }
}

/// Which block devices to record.
#[derive(Debug, Clone, Default)]
pub enum DeviceFilter {
    /// Whole devices only (those with a `/sys/block/<name>` directory).
    #[default]
    All,
    /// Exactly these devices or partitions.
    AllowList(BTreeSet<String>),
    /// Devices or partitions whose name matches.
    Pattern(Regex),
}

impl DeviceFilter {
    /// Builds an allow-list from names, ignoring empty entries.
    pub fn allow<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        DeviceFilter::AllowList(
            names
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn pattern(re: &str) -> Result<Self, regex::Error> {
        Ok(DeviceFilter::Pattern(Regex::new(re)?))
    }

    /// Whether `name` passes an explicit filter. [`DeviceFilter::All`]
    /// admits every name here; the whole-device check needs `/sys` and is
    /// done by the acquirer.
    pub fn admits(&self, name: &str) -> bool {
        match self {
            DeviceFilter::All => true,
            DeviceFilter::AllowList(names) => names.contains(name),
            DeviceFilter::Pattern(re) => re.is_match(name),
        }
    }
}

/// Source of snapshots and the static metadata written in the log header.
pub trait SnapshotAcquirer {
    /// Captures every family enabled in `metrics`, stamped with the current
    /// time. Disabled families are left `None`.
    fn capture(&mut self, metrics: &MetricSet) -> Result<Snapshot, CollectError>;

    /// Devices and partitions present now.
    fn platform_header(&self) -> Result<PlatformHeader, CollectError>;

    fn hostname(&self) -> Result<String, CollectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_set_names() {
        let mut m = MetricSet::all();
        m.interrupt = false;
        assert_eq!(m.names(), vec!["cpu", "disk", "net", "mem"]);
        assert!(!m.is_empty());
        assert!(MetricSet::none().is_empty());
    }

    #[test]
    fn allow_list_filter() {
        let f = DeviceFilter::allow("sda, nvme0n1,".split(','));
        assert!(f.admits("sda"));
        assert!(f.admits("nvme0n1"));
        assert!(!f.admits("sdb"));
        assert!(!f.admits(""));
    }

    #[test]
    fn pattern_filter() {
        let f = DeviceFilter::pattern("^nvme").unwrap();
        assert!(f.admits("nvme0n1p1"));
        assert!(!f.admits("sda"));
        assert!(DeviceFilter::pattern("(").is_err());
    }

    #[test]
    fn parse_error_converts() {
        let e: CollectError = ParseError::new("bad line").into();
        assert_eq!(e.to_string(), "parse error: bad line");
    }
}
