//! Mock `/proc` and `/sys` for tests.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
