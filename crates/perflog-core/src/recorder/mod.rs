//! The sampling loop.
//!
//! A [`Recorder`] writes the log headers, waits out the start delay, then
//! captures one snapshot per tick until it is cancelled, the timeout
//! expires, or nothing is left to write to.
//!
//! ```text
//!            start delay         tick           tick               deadline
//!  header ──────────────▶ sample ────▶ sample ────▶ ... sample ──────▶ sample ─▶ drain
//!                           │                                   ▲
//!                           └── next = previous target + interval (backoff)
//! ```
//!
//! Stopping always takes one closing sample at the moment the stop is seen,
//! so the last interval of a recording is covered. The exception is a tick
//! that lands within [`TIMEOUT_GUARD`] of the deadline: that tick becomes
//! the closing sample instead of being followed by a near-duplicate.

mod backoff;
mod clock;
mod fanout;
mod live;

pub use backoff::{BACKOFF_RATIO, BACKOFF_THRESHOLD, Backoff, MAX_INTERVAL};
pub use clock::{RealClock, TickSource, VirtualClock, Wake};
pub use fanout::FanOut;
pub use live::LiveDownstream;

use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::collector::{DeviceFilter, MetricSet, SnapshotAcquirer};
use crate::storage::LogError;
use crate::storage::log::LogWriter;
use crate::storage::model::{CommonHeader, LinuxHeader, PlatformHeader};

/// A tick this close to the deadline is the last one.
pub const TIMEOUT_GUARD: Duration = Duration::from_millis(10);

/// Errors that end a recording.
#[derive(Debug)]
pub enum RecorderError {
    /// Writing the log failed.
    Log(LogError),
    /// Opening or finishing the output failed.
    Io(io::Error),
    /// The live downstream could not be started.
    Spawn { program: String, source: io::Error },
    /// The configuration cannot drive a schedule.
    Config(String),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecorderError::Log(e) => write!(f, "{}", e),
            RecorderError::Io(e) => write!(f, "output error: {}", e),
            RecorderError::Spawn { program, source } => {
                write!(f, "failed to start '{}': {}", program, source)
            }
            RecorderError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RecorderError::Log(e) => Some(e),
            RecorderError::Io(e) => Some(e),
            RecorderError::Spawn { source, .. } => Some(source),
            RecorderError::Config(_) => None,
        }
    }
}

impl From<LogError> for RecorderError {
    fn from(e: LogError) -> Self {
        RecorderError::Log(e)
    }
}

/// Where the primary copy of the log goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Stdout,
    File(PathBuf),
}

/// A consumer process fed the log on its stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Recorder settings.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Base sampling interval.
    pub interval: Duration,
    /// Double the interval every [`BACKOFF_THRESHOLD`] ticks.
    pub backoff: bool,
    /// Total recording time after the start delay. `None` records until
    /// cancelled.
    pub timeout: Option<Duration>,
    /// Pause between writing the headers and the first sample.
    pub start_delay: Duration,
    pub metrics: MetricSet,
    /// Disk selection. Applied by the acquirer; kept here so the whole
    /// recording setup is described in one place.
    pub device_filter: DeviceFilter,
    pub live_command: Option<LiveCommand>,
    pub output: Output,
    /// Gzip the primary output. The live downstream always gets plain frames.
    pub gzip: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            backoff: true,
            timeout: None,
            start_delay: Duration::ZERO,
            metrics: MetricSet::all(),
            device_filter: DeviceFilter::All,
            live_command: None,
            output: Output::Stdout,
            gzip: false,
        }
    }
}

/// Why a recording ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    Cancelled,
    Timeout,
    /// Every sink failed.
    OutputClosed,
}

/// Outcome of a finished recording.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Snapshots written.
    pub samples: u64,
    /// Ticks whose capture failed and were skipped.
    pub capture_failures: u64,
    pub stop: StopReason,
}

/// Drives an acquirer on a schedule and writes what it captures.
pub struct Recorder<A, C> {
    config: RecorderConfig,
    acquirer: A,
    clock: C,
}

impl<A: SnapshotAcquirer, C: TickSource> Recorder<A, C> {
    pub fn new(config: RecorderConfig, acquirer: A, clock: C) -> Self {
        Self {
            config,
            acquirer,
            clock,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Records into the configured output, then drains the live downstream
    /// if there is one.
    pub fn record(&mut self) -> Result<RunStats, RecorderError> {
        let (out, live) = self.open_output()?;

        let outcome = self.run(out).and_then(|(stats, out)| match out.finish() {
            Ok(()) => Ok(stats),
            Err(e) if stats.stop == StopReason::OutputClosed => {
                debug!(error = %e, "final flush to a closed output failed");
                Ok(stats)
            }
            Err(e) => Err(RecorderError::Io(e)),
        });

        // The fan-out is gone by now, so the child has seen end of input.
        if let Some(live) = live
            && let Err(e) = live.wait()
        {
            warn!(error = %e, "failed to reap live downstream");
        }
        outcome
    }

    /// Opens the file first so a bad path never leaves a child behind.
    fn open_output(&self) -> Result<(FanOut, Option<LiveDownstream>), RecorderError> {
        let mut out = FanOut::new();

        if let Output::File(path) = &self.config.output {
            let file = File::create(path).map_err(RecorderError::Io)?;
            out = out.with_primary(Box::new(BufWriter::new(file)), self.config.gzip);
            info!(path = %path.display(), gzip = self.config.gzip, "writing log file");
        }

        let mut live = None;
        if let Some(cmd) = &self.config.live_command {
            let (child, stdin) = LiveDownstream::spawn(&cmd.program, &cmd.args)?;
            out = out.with_downstream(Box::new(stdin));
            live = Some(child);
            info!(program = %cmd.program, "live downstream attached");
        }

        // With a live downstream, our stdout carries its output instead.
        if self.config.output == Output::Stdout && live.is_none() {
            out = out.with_primary(Box::new(io::stdout()), self.config.gzip);
        }

        Ok((out, live))
    }

    /// Runs the loop against `out` and hands it back flushed.
    pub fn run<W: Write>(&mut self, out: W) -> Result<(RunStats, W), RecorderError> {
        if self.config.interval.is_zero() {
            return Err(RecorderError::Config("sampling interval must be positive".into()));
        }
        let mut writer = LogWriter::new(out);

        let platform = self.acquirer.platform_header().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read device list, header will be empty");
            PlatformHeader::Linux(LinuxHeader::default())
        });
        let hostname = self.acquirer.hostname().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read hostname");
            "unknown".to_string()
        });
        let common = CommonHeader {
            platform: platform.platform(),
            hostname,
            start_time: Utc::now(),
        };
        writer.write_header(&common, &platform)?;

        info!(
            interval = ?self.config.interval,
            backoff = self.config.backoff,
            timeout = ?self.config.timeout,
            metrics = %self.config.metrics.names().join(","),
            "recording started"
        );

        let mut stats = RunStats::default();

        if !self.config.start_delay.is_zero() {
            let until = self.clock.now() + self.config.start_delay;
            if self.clock.wait_until(until) == Wake::Cancelled {
                info!("cancelled during start delay");
                stats.stop = StopReason::Cancelled;
                return Ok((stats, writer.into_inner()?));
            }
        }

        let start = self.clock.now();
        let deadline = self.config.timeout.map(|t| start + t);
        let mut next_target = start;
        let mut backoff = Backoff::new(self.config.interval, self.config.backoff);
        let mut stopping: Option<StopReason> = None;

        loop {
            if !self.sample(&mut writer, &mut stats)? {
                stats.stop = StopReason::OutputClosed;
                break;
            }
            if let Some(reason) = stopping {
                stats.stop = reason;
                break;
            }

            let previous = backoff.interval();
            let interval = backoff.tick();
            if interval != previous {
                info!(interval = ?interval, "sampling interval backed off");
            }
            next_target += interval;

            // Missed ticks are dropped rather than fired back to back.
            let now = self.clock.now();
            if next_target < now {
                debug!(behind = ?(now - next_target), "sampling fell behind schedule");
                next_target = now;
            }

            let wake_at = deadline.map_or(next_target, |d| d.min(next_target));
            match self.clock.wait_until(wake_at) {
                Wake::Cancelled => {
                    info!("stop requested");
                    stopping = Some(StopReason::Cancelled);
                }
                Wake::Elapsed
                    if deadline.is_some_and(|d| wake_at >= d || self.clock.now() >= d) =>
                {
                    stopping = Some(StopReason::Timeout);
                }
                Wake::Elapsed => {}
            }

            if stopping.is_none()
                && let Some(d) = deadline
                && d.saturating_duration_since(next_target) < TIMEOUT_GUARD
            {
                stopping = Some(StopReason::Timeout);
            }
        }

        info!(
            samples = stats.samples,
            capture_failures = stats.capture_failures,
            stop = ?stats.stop,
            "recording finished"
        );

        let out = if stats.stop == StopReason::OutputClosed {
            writer.into_raw()
        } else {
            writer.into_inner()?
        };
        Ok((stats, out))
    }

    /// Captures and writes one snapshot. Returns `false` once the output is
    /// gone.
    fn sample<W: Write>(
        &mut self,
        writer: &mut LogWriter<W>,
        stats: &mut RunStats,
    ) -> Result<bool, RecorderError> {
        let snapshot = match self.acquirer.capture(&self.config.metrics) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                stats.capture_failures += 1;
                warn!(error = %e, "capture failed, skipping tick");
                return Ok(true);
            }
        };

        match writer.write_record(&snapshot) {
            Ok(()) => {
                stats.samples += 1;
                debug!(
                    sample = stats.samples,
                    families = %snapshot.describe(),
                    "snapshot written"
                );
                Ok(true)
            }
            Err(LogError::Io(e)) if e.kind() == io::ErrorKind::BrokenPipe => {
                info!("output closed, stopping");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectError, MockFs, ProcfsAcquirer};
    use crate::recorder::fanout::tests::SharedBuf;
    use crate::storage::LogReader;
    use crate::storage::model::Snapshot;

    /// Returns empty snapshots; every `fail_every`-th capture fails.
    #[derive(Default)]
    struct CountingAcquirer {
        captures: u64,
        fail_every: Option<u64>,
    }

    impl SnapshotAcquirer for CountingAcquirer {
        fn capture(&mut self, _metrics: &MetricSet) -> Result<Snapshot, CollectError> {
            self.captures += 1;
            if let Some(n) = self.fail_every
                && self.captures % n == 0
            {
                return Err(CollectError::Parse("flaky source".into()));
            }
            Ok(Snapshot::new(Utc::now()))
        }

        fn platform_header(&self) -> Result<PlatformHeader, CollectError> {
            Ok(PlatformHeader::Linux(LinuxHeader::default()))
        }

        fn hostname(&self) -> Result<String, CollectError> {
            Ok("test-host".into())
        }
    }

    /// Accepts `accept` write calls, then reports a closed pipe.
    struct CountingPipe {
        accept: usize,
    }

    impl Write for CountingPipe {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accept == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "viewer quit"));
            }
            self.accept -= 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config(interval_ms: u64, timeout_ms: Option<u64>) -> RecorderConfig {
        RecorderConfig {
            interval: Duration::from_millis(interval_ms),
            timeout: timeout_ms.map(Duration::from_millis),
            ..RecorderConfig::default()
        }
    }

    /// Virtual clock where every wake costs `cost` of capture and write time.
    struct SlowClock {
        inner: VirtualClock,
        cost: Duration,
    }

    impl TickSource for SlowClock {
        fn now(&self) -> std::time::Instant {
            self.inner.now()
        }

        fn wait_until(&mut self, target: std::time::Instant) -> Wake {
            let wake = self.inner.wait_until(target);
            self.inner.advance(self.cost);
            wake
        }
    }

    fn run_counting(cfg: RecorderConfig, clock: VirtualClock) -> (RunStats, Vec<u8>, Duration) {
        let mut recorder = Recorder::new(cfg, CountingAcquirer::default(), clock);
        let (stats, out) = recorder.run(Vec::new()).unwrap();
        (stats, out, recorder.clock().elapsed())
    }

    #[test]
    fn timeout_takes_closing_sample_at_deadline() {
        let (stats, _, elapsed) = run_counting(config(1000, Some(3500)), VirtualClock::new());
        // 0, 1, 2, 3 and the deadline at 3.5
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.stop, StopReason::Timeout);
        assert_eq!(elapsed, Duration::from_millis(3500));
    }

    #[test]
    fn tick_near_deadline_is_the_last_sample() {
        let (exact, _, _) = run_counting(config(1000, Some(3000)), VirtualClock::new());
        assert_eq!(exact.samples, 4);

        let (near, _, elapsed) = run_counting(config(1000, Some(3005)), VirtualClock::new());
        // without the guard the deadline 5 ms after the tick would add a fifth
        assert_eq!(near.samples, 4);
        assert_eq!(elapsed, Duration::from_secs(3));

        let (far, _, _) = run_counting(config(1000, Some(3020)), VirtualClock::new());
        assert_eq!(far.samples, 5);
    }

    #[test]
    fn slow_ticks_still_stop_at_deadline() {
        let clock = SlowClock {
            inner: VirtualClock::new(),
            cost: Duration::from_millis(5),
        };
        let mut recorder = Recorder::new(config(1, Some(100)), CountingAcquirer::default(), clock);
        let (stats, _) = recorder.run(Vec::new()).unwrap();
        let elapsed = recorder.clock().inner.elapsed();
        assert_eq!(stats.stop, StopReason::Timeout);
        assert!(elapsed <= Duration::from_millis(105), "ran {:?}", elapsed);
        // one sample per 5 ms of work, plus the first
        assert!(stats.samples <= 22, "took {} samples", stats.samples);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let mut recorder =
            Recorder::new(config(0, Some(100)), CountingAcquirer::default(), VirtualClock::new());
        assert!(matches!(recorder.run(Vec::new()), Err(RecorderError::Config(_))));
    }

    #[test]
    fn cancel_takes_closing_sample() {
        let clock = VirtualClock::new().cancel_after(Duration::from_millis(2500));
        let (stats, _, elapsed) = run_counting(config(1000, None), clock);
        assert_eq!(stats.samples, 4);
        assert_eq!(stats.stop, StopReason::Cancelled);
        assert_eq!(elapsed, Duration::from_millis(2500));
    }

    #[test]
    fn cancel_during_start_delay_writes_header_only() {
        let mut cfg = config(1000, Some(10_000));
        cfg.start_delay = Duration::from_secs(5);
        let clock = VirtualClock::new().cancel_after(Duration::from_secs(1));
        let (stats, out, _) = run_counting(cfg, clock);
        assert_eq!(stats.samples, 0);
        assert_eq!(stats.stop, StopReason::Cancelled);

        let mut reader = LogReader::open(io::Cursor::new(out)).unwrap();
        let (common, _) = reader.read_header().unwrap();
        assert_eq!(common.hostname, "test-host");
        assert!(matches!(reader.read_record(), Err(LogError::EndOfStream)));
    }

    #[test]
    fn deadline_counts_from_after_start_delay() {
        let mut cfg = config(1000, Some(1000));
        cfg.start_delay = Duration::from_secs(2);
        let (stats, _, elapsed) = run_counting(cfg, VirtualClock::new());
        assert_eq!(stats.samples, 2);
        assert_eq!(elapsed, Duration::from_secs(3));
    }

    #[test]
    fn backoff_stretches_schedule() {
        // 1000 ticks at 1 s, then 2 s: the tick at 1001 s meets the deadline
        let (with, _, _) = run_counting(config(1000, Some(1_001_000)), VirtualClock::new());
        assert_eq!(with.samples, 1001);

        let mut cfg = config(1000, Some(1_001_000));
        cfg.backoff = false;
        let (without, _, _) = run_counting(cfg, VirtualClock::new());
        assert_eq!(without.samples, 1002);
    }

    #[test]
    fn failed_captures_are_skipped() {
        let acquirer = CountingAcquirer {
            captures: 0,
            fail_every: Some(2),
        };
        let mut recorder = Recorder::new(config(1000, Some(3000)), acquirer, VirtualClock::new());
        let (stats, out) = recorder.run(Vec::new()).unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.capture_failures, 2);

        let mut reader = LogReader::open(io::Cursor::new(out)).unwrap();
        reader.read_header().unwrap();
        assert_eq!(reader.count(), 2);
    }

    #[test]
    fn closed_downstream_stops_recording() {
        // header, then two records
        let out = FanOut::new().with_downstream(Box::new(CountingPipe { accept: 3 }));
        let mut recorder =
            Recorder::new(config(1000, None), CountingAcquirer::default(), VirtualClock::new());
        let (stats, out) = recorder.run(out).unwrap();
        assert_eq!(stats.samples, 2);
        assert_eq!(stats.stop, StopReason::OutputClosed);
        assert!(out.is_closed());
    }

    #[test]
    fn closed_downstream_keeps_file_going() {
        let file = SharedBuf::default();
        let out = FanOut::new()
            .with_primary(Box::new(file.clone()), false)
            .with_downstream(Box::new(CountingPipe { accept: 2 }));
        let mut recorder = Recorder::new(
            config(1000, Some(4000)),
            CountingAcquirer::default(),
            VirtualClock::new(),
        );
        let (stats, out) = recorder.run(out).unwrap();
        out.finish().unwrap();
        assert_eq!(stats.samples, 5);
        assert_eq!(stats.stop, StopReason::Timeout);

        let mut reader = LogReader::open(io::Cursor::new(file.bytes())).unwrap();
        reader.read_header().unwrap();
        assert_eq!(reader.count(), 5);
    }

    #[test]
    fn records_procfs_snapshots_to_gzip_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perf.log.gz");
        let cfg = RecorderConfig {
            output: Output::File(path.clone()),
            gzip: true,
            ..config(1000, Some(2000))
        };
        let acquirer = ProcfsAcquirer::new(MockFs::typical_system(), "/proc", "/sys");
        let mut recorder = Recorder::new(cfg, acquirer, VirtualClock::new());
        let stats = recorder.record().unwrap();
        assert_eq!(stats.samples, 3);

        let mut reader = LogReader::open_path(&path).unwrap();
        assert!(reader.is_compressed());
        let (common, platform) = reader.read_header().unwrap();
        assert_eq!(common.hostname, "db-01");
        assert_eq!(platform.devs_parts().len(), 5);

        let records: Vec<_> = reader.collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].cpu.as_ref().unwrap().num_core, 4);
        assert!(records[2].mem.is_some());
    }

    #[test]
    fn unwritable_output_path_is_io_error() {
        let cfg = RecorderConfig {
            output: Output::File(PathBuf::from("/nonexistent-dir/perf.log")),
            ..RecorderConfig::default()
        };
        let mut recorder = Recorder::new(cfg, CountingAcquirer::default(), VirtualClock::new());
        assert!(matches!(recorder.record(), Err(RecorderError::Io(_))));
    }
}
