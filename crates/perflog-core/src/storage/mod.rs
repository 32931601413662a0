pub mod log;
pub mod model;

pub use log::{LogError, LogReader, LogWriter};
pub use model::Snapshot;
