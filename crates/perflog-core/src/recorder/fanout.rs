//! Tee of the encoded log into the primary output and a live downstream.

use std::io::{self, Write};

use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::warn;

type BoxedSink = Box<dyn Write + Send>;

enum Primary {
    Plain(BoxedSink),
    Gzip(GzEncoder<BoxedSink>),
}

impl Primary {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Primary::Plain(w) => w,
            Primary::Gzip(w) => w,
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Primary::Plain(mut w) => w.flush(),
            Primary::Gzip(enc) => enc.finish()?.flush(),
        }
    }
}

/// Writes every byte to the primary sink and, while it stays healthy, to the
/// downstream.
///
/// Primary write errors are returned to the caller. A downstream error
/// detaches the downstream with a warning; if nothing is left to write to,
/// further writes fail with [`io::ErrorKind::BrokenPipe`].
pub struct FanOut {
    primary: Option<Primary>,
    downstream: Option<BoxedSink>,
}

impl FanOut {
    pub fn new() -> Self {
        Self {
            primary: None,
            downstream: None,
        }
    }

    /// Sets the primary sink, gzip-compressed when `gzip` is set.
    pub fn with_primary(mut self, sink: BoxedSink, gzip: bool) -> Self {
        self.primary = Some(if gzip {
            Primary::Gzip(GzEncoder::new(sink, Compression::default()))
        } else {
            Primary::Plain(sink)
        });
        self
    }

    /// Sets the downstream sink. It always receives the uncompressed stream.
    pub fn with_downstream(mut self, sink: BoxedSink) -> Self {
        self.downstream = Some(sink);
        self
    }

    pub fn has_downstream(&self) -> bool {
        self.downstream.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.primary.is_none() && self.downstream.is_none()
    }

    /// Writes the gzip trailer and flushes, then closes the downstream so
    /// its reader sees end of stream.
    pub fn finish(mut self) -> io::Result<()> {
        if let Some(mut downstream) = self.downstream.take()
            && let Err(e) = downstream.flush()
        {
            warn!(error = %e, "downstream flush failed");
        }
        match self.primary.take() {
            Some(primary) => primary.finish(),
            None => Ok(()),
        }
    }

    fn with_downstream_result<F>(&mut self, op: F)
    where
        F: FnOnce(&mut BoxedSink) -> io::Result<()>,
    {
        if let Some(downstream) = self.downstream.as_mut()
            && let Err(e) = op(downstream)
        {
            warn!(error = %e, "live downstream failed, detaching it");
            self.downstream = None;
        }
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for FanOut {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf)?;
        Ok(buf.len())
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Some(primary) = self.primary.as_mut() {
            primary.writer().write_all(buf)?;
        }
        self.with_downstream_result(|d| d.write_all(buf));
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "no output left to write to",
            ));
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(primary) = self.primary.as_mut() {
            primary.writer().flush()?;
        }
        self.with_downstream_result(|d| d.flush());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::{Arc, Mutex};

    /// Cloneable in-memory sink.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn bytes(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Accepts `limit` bytes, then fails every call.
    pub(crate) struct ClosingPipe {
        pub(crate) limit: usize,
    }

    impl Write for ClosingPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if buf.len() > self.limit {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "reader gone"));
            }
            self.limit -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn tees_into_both_sinks() {
        let file = SharedBuf::default();
        let live = SharedBuf::default();
        let mut out = FanOut::new()
            .with_primary(Box::new(file.clone()), false)
            .with_downstream(Box::new(live.clone()));

        out.write_all(b"abc").unwrap();
        out.flush().unwrap();
        out.finish().unwrap();

        assert_eq!(file.bytes(), b"abc");
        assert_eq!(live.bytes(), b"abc");
    }

    #[test]
    fn gzip_applies_to_primary_only() {
        let file = SharedBuf::default();
        let live = SharedBuf::default();
        let mut out = FanOut::new()
            .with_primary(Box::new(file.clone()), true)
            .with_downstream(Box::new(live.clone()));

        out.write_all(b"hello").unwrap();
        out.finish().unwrap();

        let compressed = file.bytes();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);
        let mut plain = String::new();
        flate2::read::GzDecoder::new(&compressed[..])
            .read_to_string(&mut plain)
            .unwrap();
        assert_eq!(plain, "hello");
        assert_eq!(live.bytes(), b"hello");
    }

    #[test]
    fn failed_downstream_is_detached() {
        let file = SharedBuf::default();
        let mut out = FanOut::new()
            .with_primary(Box::new(file.clone()), false)
            .with_downstream(Box::new(ClosingPipe { limit: 4 }));

        out.write_all(b"1234").unwrap();
        assert!(out.has_downstream());
        out.write_all(b"5678").unwrap();
        assert!(!out.has_downstream());
        out.write_all(b"9").unwrap();

        assert_eq!(file.bytes(), b"123456789");
    }

    #[test]
    fn losing_the_only_sink_is_broken_pipe() {
        let mut out = FanOut::new().with_downstream(Box::new(ClosingPipe { limit: 0 }));
        let err = out.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert!(out.is_closed());
        assert!(out.finish().is_ok());
    }
}
