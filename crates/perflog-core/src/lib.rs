//! perflog-core: shared library for the perflog recorder and player.
//!
//! Provides:
//! - `collector`: snapshot acquisition from `/proc` and `/sys/block`
//! - `storage`: snapshot model and the append-only log codec
//! - `usage`: rates and percentages from pairs of snapshots
//! - `recorder`: the sampling loop, backoff and live fan-out
//! - `util`: helper utilities

pub mod collector;
pub mod recorder;
pub mod storage;
pub mod usage;
pub mod util;

/// Short git SHA of the build: `PERFLOG_GIT_SHA` when set, otherwise from
/// git, `unknown` outside a checkout.
pub const GIT_SHA: &str = env!("GIT_SHA");
