//! Log headers written once at the start of every recording.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Operating system that produced a recording.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
}

/// Platform-independent header: who recorded, where, and when.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct CommonHeader {
    pub platform: Platform,
    pub hostname: String,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub start_time: DateTime<Utc>,
}

/// A whole block device and its partitions.
///
/// Source: `/sys/block/<name>/` and `/sys/block/<name>/<part>/stat`
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct LinuxDevice {
    pub name: String,
    pub parts: Vec<String>,
}

/// Static Linux metadata captured once at recorder startup.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct LinuxHeader {
    /// Whole block devices keyed by name.
    pub devices: BTreeMap<String, LinuxDevice>,
    /// Every device and partition name in `/proc/diskstats` order.
    pub devs_parts: Vec<String>,
}

/// Static Darwin metadata.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq, Default)]
pub struct DarwinHeader {
    pub devs_parts: Vec<String>,
}

/// Platform-specific header following the [`CommonHeader`].
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum PlatformHeader {
    Linux(LinuxHeader),
    Darwin(DarwinHeader),
}

impl PlatformHeader {
    /// Device and partition names in kernel order.
    pub fn devs_parts(&self) -> &[String] {
        match self {
            PlatformHeader::Linux(h) => &h.devs_parts,
            PlatformHeader::Darwin(h) => &h.devs_parts,
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            PlatformHeader::Linux(_) => Platform::Linux,
            PlatformHeader::Darwin(_) => Platform::Darwin,
        }
    }
}
