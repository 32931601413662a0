//! Data models for the log.
//!
//! - [`header`]: headers written once per recording
//! - [`system`]: per-family counters read from `/proc`
//! - [`snapshot`]: the per-sample record
//!
//! # Layout
//!
//! ```text
//! log stream
//!   ├── CommonHeader       platform, hostname, start time
//!   ├── PlatformHeader     devices and partitions at startup
//!   └── Snapshot*          one per scheduler tick
//!         ├── cpu?         CpuStat
//!         ├── interrupt?   InterruptStat
//!         ├── disk?        DiskStat
//!         ├── net?         NetStat
//!         └── mem?         MemStat
//! ```

mod header;
mod snapshot;
mod system;

pub use header::{CommonHeader, DarwinHeader, LinuxDevice, LinuxHeader, Platform, PlatformHeader};
pub use snapshot::Snapshot;
pub use system::{
    CpuCoreStat, CpuStat, DiskStat, DiskStatEntry, InterruptStat, InterruptStatEntry, IrqKey,
    MemStat, NetStat, NetStatEntry,
};
