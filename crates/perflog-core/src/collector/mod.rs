//! Snapshot acquisition for Linux.
//!
//! This module reads the kernel counters that make up a [`Snapshot`] from
//! `/proc` (and block device layout from `/sys/block`), with a mock
//! filesystem so everything runs in tests on any host.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SnapshotAcquirer (trait)                    │
//! │  ┌───────────────────────────────────────────────────────┐  │
//! │  │                  ProcfsAcquirer                       │  │
//! │  │  - /proc/stat        - /proc/net/dev                  │  │
//! │  │  - /proc/interrupts  - /proc/meminfo                  │  │
//! │  │  - /proc/diskstats   - /sys/block/<dev>/<part>/stat   │  │
//! │  └──────────────────────────┬────────────────────────────┘  │
//! │                      ┌──────▼──────┐                        │
//! │                      │  FileSystem │ (trait)                │
//! │                      └──────┬──────┘                        │
//! └─────────────────────────────┼───────────────────────────────┘
//!                               │
//!              ┌────────────────┼────────────────┐
//!              │                │                │
//!       ┌──────▼──────┐  ┌──────▼──────┐  ┌──────▼──────┐
//!       │   RealFs    │  │   MockFs    │  │  Scenarios  │
//!       │  (Linux)    │  │  (Testing)  │  │ (Fixtures)  │
//!       └─────────────┘  └─────────────┘  └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use perflog_core::collector::{MetricSet, MockFs, ProcfsAcquirer, SnapshotAcquirer};
//!
//! let fs = MockFs::typical_system();
//! let mut acquirer = ProcfsAcquirer::new(fs, "/proc", "/sys");
//! let snapshot = acquirer.capture(&MetricSet::all()).unwrap();
//! assert_eq!(snapshot.cpu.unwrap().num_core, 4);
//! ```
//!
//! [`Snapshot`]: crate::storage::model::Snapshot

mod acquirer;
pub mod mock;
pub mod procfs;
pub mod traits;

pub use acquirer::{CollectError, DeviceFilter, MetricSet, SnapshotAcquirer};
pub use mock::MockFs;
pub use procfs::ProcfsAcquirer;
pub use traits::{FileSystem, RealFs};
