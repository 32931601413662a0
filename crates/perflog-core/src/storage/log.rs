//! Append-only snapshot log.
//!
//! A log is a sequence of CRC32-checked frames:
//!
//! ```text
//! ┌───────────┬───────────┬──────────────────────┐
//! │ len u32LE │ crc u32LE │ postcard(payload)    │  CommonHeader
//! ├───────────┼───────────┼──────────────────────┤
//! │ len u32LE │ crc u32LE │ postcard(payload)    │  PlatformHeader
//! ├───────────┼───────────┼──────────────────────┤
//! │ len u32LE │ crc u32LE │ postcard(payload)    │  Snapshot
//! │    ...    │    ...    │         ...          │  Snapshot
//! └───────────┴───────────┴──────────────────────┘
//! ```
//!
//! The whole stream may be gzip-wrapped; [`LogReader::open`] detects this from
//! the first two bytes and decompresses transparently.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::model::{CommonHeader, PlatformHeader, Snapshot};

/// Frame header: length (4 bytes) + CRC32 (4 bytes).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Frames above this size are treated as corruption.
pub const MAX_FRAME_SIZE: u32 = 256 * 1024 * 1024;

/// Gzip member magic.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors of the log protocol layer.
#[derive(Debug)]
pub enum LogError {
    /// The stream could not be identified as a log at all.
    Malformed(String),
    /// Frame-level violation: truncation, bad checksum, undecodable payload,
    /// or an out-of-order call.
    Protocol(String),
    /// No more records. A normal stop signal, not a failure.
    EndOfStream,
    /// Underlying I/O failure.
    Io(io::Error),
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::Malformed(msg) => write!(f, "malformed log: {}", msg),
            LogError::Protocol(msg) => write!(f, "log protocol error: {}", msg),
            LogError::EndOfStream => write!(f, "end of log stream"),
            LogError::Io(e) => write!(f, "log I/O error: {}", e),
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for LogError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput => LogError::Protocol(e.to_string()),
            _ => LogError::Io(e),
        }
    }
}

/// Serializes `value` into a complete frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, LogError> {
    let payload = postcard::to_allocvec(value)
        .map_err(|e| LogError::Protocol(format!("encode: {}", e)))?;
    if payload.len() > MAX_FRAME_SIZE as usize {
        return Err(LogError::Protocol(format!(
            "frame of {} bytes exceeds limit",
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    AwaitHeader,
    Records,
    Failed,
}

/// Writes headers and snapshots as frames, flushing after every frame.
///
/// Compression is the caller's concern: wrap the sink in a
/// `flate2::write::GzEncoder` and recover it with [`LogWriter::into_inner`]
/// to finish the gzip trailer.
pub struct LogWriter<W: Write> {
    inner: W,
    state: WriterState,
    records: u64,
}

impl<W: Write> LogWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            state: WriterState::AwaitHeader,
            records: 0,
        }
    }

    /// Writes both headers. Must be called exactly once, before any record.
    pub fn write_header(
        &mut self,
        common: &CommonHeader,
        platform: &PlatformHeader,
    ) -> Result<(), LogError> {
        match self.state {
            WriterState::AwaitHeader => {}
            WriterState::Records => {
                return Err(LogError::Protocol("header already written".into()));
            }
            WriterState::Failed => return Err(failed_writer()),
        }

        let mut buf = encode_frame(common)?;
        buf.extend_from_slice(&encode_frame(platform)?);
        self.write_flushed(&buf)?;
        self.state = WriterState::Records;
        Ok(())
    }

    /// Appends one snapshot.
    pub fn write_record(&mut self, snapshot: &Snapshot) -> Result<(), LogError> {
        match self.state {
            WriterState::Records => {}
            WriterState::AwaitHeader => {
                return Err(LogError::Protocol("record written before header".into()));
            }
            WriterState::Failed => return Err(failed_writer()),
        }

        let frame = encode_frame(snapshot)?;
        self.write_flushed(&frame)?;
        self.records += 1;
        Ok(())
    }

    /// Number of snapshots written so far.
    pub fn records_written(&self) -> u64 {
        self.records
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(mut self) -> Result<W, LogError> {
        self.inner.flush().map_err(LogError::Io)?;
        Ok(self.inner)
    }

    /// Returns the underlying sink as is. Used when the sink is already
    /// known to be gone and a flush could only fail.
    pub fn into_raw(self) -> W {
        self.inner
    }

    fn write_flushed(&mut self, buf: &[u8]) -> Result<(), LogError> {
        let result = self.inner.write_all(buf).and_then(|_| self.inner.flush());
        if let Err(e) = result {
            self.state = WriterState::Failed;
            return Err(LogError::Io(e));
        }
        Ok(())
    }
}

fn failed_writer() -> LogError {
    LogError::Protocol("writer is unusable after an earlier write failure".into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    AwaitHeader,
    Records,
    Finished,
    Poisoned,
}

/// Reads a log produced by [`LogWriter`], plain or gzip-wrapped.
pub struct LogReader {
    inner: Box<dyn Read>,
    compressed: bool,
    state: ReaderState,
    /// Set once the iterator has yielded an error.
    fused: bool,
}

impl LogReader {
    /// Reads the first two bytes and installs a gzip decoder when they carry
    /// the gzip magic. The bytes are put back in front of the stream either
    /// way.
    pub fn open<R: Read + 'static>(mut stream: R) -> Result<Self, LogError> {
        let mut prefix = [0u8; 2];
        let mut filled = 0;
        while filled < prefix.len() {
            match stream.read(&mut prefix[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(LogError::Malformed(format!("cannot read stream: {}", e))),
            }
        }
        if filled == 0 {
            return Err(LogError::Malformed("empty stream".into()));
        }

        let compressed = prefix[..filled] == GZIP_MAGIC;
        let buffered = BufReader::new(io::Cursor::new(prefix[..filled].to_vec()).chain(stream));
        let inner: Box<dyn Read> = if compressed {
            Box::new(MultiGzDecoder::new(buffered))
        } else {
            Box::new(buffered)
        };
        debug!(compressed, "opened log stream");

        Ok(Self {
            inner,
            compressed,
            state: ReaderState::AwaitHeader,
            fused: false,
        })
    }

    /// Opens a log file from disk.
    pub fn open_path(path: &Path) -> Result<Self, LogError> {
        let file = File::open(path).map_err(LogError::Io)?;
        Self::open(file)
    }

    /// Whether the stream was gzip-wrapped.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Reads the common and platform headers. Must be the first call.
    pub fn read_header(&mut self) -> Result<(CommonHeader, PlatformHeader), LogError> {
        match self.state {
            ReaderState::AwaitHeader => {}
            ReaderState::Poisoned => return Err(poisoned()),
            _ => return Err(LogError::Protocol("header already read".into())),
        }

        let result = self.read_headers_inner();
        self.track(result)
    }

    /// Reads the next snapshot.
    pub fn read_record(&mut self) -> Result<Snapshot, LogError> {
        match self.state {
            ReaderState::Records => {}
            ReaderState::Finished => return Err(LogError::EndOfStream),
            ReaderState::Poisoned => return Err(poisoned()),
            ReaderState::AwaitHeader => {
                return Err(LogError::Protocol("record read before header".into()));
            }
        }

        let result = match self.read_frame() {
            Ok(Some(payload)) => decode::<Snapshot>(&payload, "snapshot"),
            Ok(None) => Err(LogError::EndOfStream),
            Err(e) => Err(e),
        };
        self.track(result)
    }

    fn read_headers_inner(&mut self) -> Result<(CommonHeader, PlatformHeader), LogError> {
        let common = match self.read_frame()? {
            Some(payload) => decode::<CommonHeader>(&payload, "common header")?,
            None => return Err(LogError::EndOfStream),
        };
        let platform = match self.read_frame()? {
            Some(payload) => decode::<PlatformHeader>(&payload, "platform header")?,
            None => {
                return Err(LogError::Protocol(
                    "stream ends between common and platform header".into(),
                ));
            }
        };
        Ok((common, platform))
    }

    /// Updates the reader state from the outcome of a read.
    fn track<T>(&mut self, result: Result<T, LogError>) -> Result<T, LogError> {
        match &result {
            Ok(_) => {
                if self.state == ReaderState::AwaitHeader {
                    self.state = ReaderState::Records;
                }
            }
            Err(LogError::EndOfStream) => self.state = ReaderState::Finished,
            Err(_) => self.state = ReaderState::Poisoned,
        }
        result
    }

    /// Reads one frame. `Ok(None)` means the stream ended cleanly at a frame
    /// boundary.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, LogError> {
        let mut head = [0u8; FRAME_HEADER_SIZE];
        let mut filled = 0;
        while filled < head.len() {
            match self.inner.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // A gzip stream cut after a flushed frame is missing only its
                // trailer; every frame before it is intact.
                Err(e) if filled == 0 && e.kind() == io::ErrorKind::UnexpectedEof => {
                    debug!(error = %e, "compressed stream ends without trailer");
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < FRAME_HEADER_SIZE {
            return Err(LogError::Protocol(format!(
                "truncated frame header ({} of {} bytes)",
                filled, FRAME_HEADER_SIZE
            )));
        }

        let length = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
        let crc = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        if length > MAX_FRAME_SIZE {
            return Err(LogError::Protocol(format!(
                "frame length {} exceeds limit",
                length
            )));
        }

        let mut payload = vec![0u8; length as usize];
        self.inner.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                LogError::Protocol(format!("truncated frame payload ({} bytes expected)", length))
            } else {
                LogError::from(e)
            }
        })?;

        if crc32fast::hash(&payload) != crc {
            return Err(LogError::Protocol("frame checksum mismatch".into()));
        }
        Ok(Some(payload))
    }
}

impl Iterator for LogReader {
    type Item = Result<Snapshot, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused {
            return None;
        }
        match self.read_record() {
            Ok(snapshot) => Some(Ok(snapshot)),
            Err(LogError::EndOfStream) => None,
            Err(e) => {
                self.fused = true;
                Some(Err(e))
            }
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8], what: &str) -> Result<T, LogError> {
    postcard::from_bytes(payload).map_err(|e| LogError::Protocol(format!("decode {}: {}", what, e)))
}

fn poisoned() -> LogError {
    LogError::Protocol("reader is unusable after an earlier protocol error".into())
}
