//! Utility modules for perflog.

mod duration;

pub use duration::{DurationParseError, parse_duration};
