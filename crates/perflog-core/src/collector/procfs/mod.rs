//! Acquisition from the Linux `/proc` filesystem.
//!
//! [`parser`] holds pure text parsers; [`system`] wires them to a
//! [`FileSystem`](crate::collector::traits::FileSystem).

pub mod parser;
pub mod system;

pub use parser::ParseError;
pub use system::ProcfsAcquirer;
