//! perflog - replay and summarize perflogd recordings.
//!
//! `play` turns every consecutive pair of snapshots into one JSON usage line;
//! `summary` reports average CPU and disk usage over a whole recording;
//! `stat` records while a command runs and then prints its summary.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode, ExitStatus};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use clap::{Parser, Subcommand};
use regex::Regex;
use serde::Serialize;
use tracing::{Level, debug, error, warn};
use tracing_subscriber::EnvFilter;

use perflog_core::collector::{ProcfsAcquirer, RealFs, SnapshotAcquirer};
use perflog_core::recorder::{Output, RealClock, Recorder, RecorderConfig, RecorderError};
use perflog_core::storage::model::Snapshot;
use perflog_core::storage::{LogError, LogReader};
use perflog_core::usage::{CpuUsage, DiskUsage, TOTAL_KEY, UsageReport, cpu_usage, disk_usage};
use perflog_core::util::parse_duration;

#[derive(Parser)]
#[command(name = "perflog", about = "Replay and summarize perflog recordings", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Print one JSON usage line per pair of consecutive snapshots.
    Play {
        /// Log file (plain or gzip). Reads stdin when absent.
        log: Option<PathBuf>,

        /// Indent JSON output.
        #[arg(long)]
        pretty: bool,

        /// Only report disks matching this regex.
        #[arg(long, value_name = "REGEX")]
        disk_regex: Option<String>,
    },
    /// Average CPU and disk usage between the first and last snapshot.
    Summary {
        /// Log file (plain or gzip).
        log: PathBuf,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Title shown in the text header.
        #[arg(long)]
        title: Option<String>,
    },
    /// Record while a command runs, then print the summary.
    Stat {
        /// Where the recording is kept.
        #[arg(short, long, default_value = "perflog.log")]
        logfile: PathBuf,

        /// Sampling interval (e.g. "1s", "100ms").
        #[arg(short, long, default_value = "1s", value_parser = parse_duration)]
        interval: Duration,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,

        /// Command to run, with its arguments.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Debug)]
enum CliError {
    Log(LogError),
    Io(io::Error),
    Regex(regex::Error),
    Json(serde_json::Error),
    Recorder(RecorderError),
    /// The recording thread died without reporting.
    RecorderLost,
    Command { program: String, source: io::Error },
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Log(e) => write!(f, "{}", e),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Regex(e) => write!(f, "invalid regex: {}", e),
            CliError::Json(e) => write!(f, "JSON error: {}", e),
            CliError::Recorder(e) => write!(f, "recording failed: {}", e),
            CliError::RecorderLost => write!(f, "recording thread panicked"),
            CliError::Command { program, source } => {
                write!(f, "failed to run '{}': {}", program, source)
            }
        }
    }
}

impl std::error::Error for CliError {}

impl From<LogError> for CliError {
    fn from(e: LogError) -> Self {
        CliError::Log(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}

impl From<regex::Error> for CliError {
    fn from(e: regex::Error) -> Self {
        CliError::Regex(e)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::Json(e)
    }
}

impl From<RecorderError> for CliError {
    fn from(e: RecorderError) -> Self {
        CliError::Recorder(e)
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["perflog", "perflog_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Reads the headers and the first record. `None` for a log without records.
fn open_records(reader: &mut LogReader) -> Result<Option<Snapshot>, CliError> {
    match reader.read_header() {
        Ok((common, platform)) => debug!(
            host = %common.hostname,
            started = %common.start_time,
            devices = platform.devs_parts().len(),
            "log opened"
        ),
        Err(LogError::EndOfStream) => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    match reader.read_record() {
        Ok(first) => Ok(Some(first)),
        Err(LogError::EndOfStream) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes one usage line per pair. A closed `out` ends playback quietly.
fn play<W: Write>(
    mut reader: LogReader,
    out: &mut W,
    pretty: bool,
    disk_filter: Option<&Regex>,
) -> Result<u64, CliError> {
    let Some(first) = open_records(&mut reader)? else {
        return Ok(0);
    };

    let mut lines = 0;
    let mut prev = first.clone();
    for record in reader {
        let cur = record?;
        match UsageReport::between(&first, &prev, &cur, disk_filter) {
            Ok(report) => {
                let line = if pretty {
                    serde_json::to_string_pretty(&report)?
                } else {
                    serde_json::to_string(&report)?
                };
                let written = writeln!(out, "{}", line).and_then(|_| out.flush());
                match written {
                    Ok(()) => lines += 1,
                    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                        debug!("output closed, stopping playback");
                        return Ok(lines);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => warn!(error = %e, time = %cur.time, "skipping snapshot pair"),
        }
        prev = cur;
    }
    Ok(lines)
}

/// Usage over a whole recording.
#[derive(Debug, Serialize)]
struct Summary {
    /// Seconds between the first and last snapshot.
    exectime: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<CpuUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk: Option<DiskUsage>,
}

fn summarize(mut reader: LogReader) -> Result<Option<Summary>, CliError> {
    let Some(first) = open_records(&mut reader)? else {
        return Ok(None);
    };

    let mut last = None;
    for record in reader {
        last = Some(record?);
    }
    let last = last.unwrap_or_else(|| first.clone());

    let cpu = match (&first.cpu, &last.cpu) {
        (Some(a), Some(b)) => cpu_usage(a, b)
            .inspect_err(|e| warn!(error = %e, "no CPU summary"))
            .ok(),
        _ => None,
    };
    let disk = match (&first.disk, &last.disk) {
        (Some(a), Some(b)) => disk_usage(first.time, a, last.time, b, None)
            .inspect_err(|e| warn!(error = %e, "no disk summary"))
            .ok(),
        _ => None,
    };
    let exectime = (last.time - first.time)
        .num_milliseconds()
        .max(0) as f64
        / 1000.0;

    Ok(Some(Summary {
        exectime,
        cpu,
        disk,
    }))
}

const MIB: f64 = 1024.0 * 1024.0;
const SECTOR: f64 = 512.0;

fn write_summary<W: Write>(out: &mut W, summary: &Summary, title: Option<&str>) -> io::Result<()> {
    match title {
        Some(t) => writeln!(out, "== performance summary of '{}' ==", t)?,
        None => writeln!(out, "== performance summary ==")?,
    }
    writeln!(out)?;

    if let Some(cpu) = &summary.cpu {
        let all = &cpu.all;
        let max = 100.0 * cpu.num_core as f64;
        writeln!(out, "* Average CPU usage (MAX: {} %)", 100 * cpu.num_core)?;
        writeln!(
            out,
            "  * Non idle portion: {:.2}",
            max - all.idle - all.iowait
        )?;
        writeln!(out, "       %usr: {:.2}", all.user + all.nice)?;
        writeln!(out, "       %sys: {:.2}", all.sys)?;
        writeln!(out, "       %irq: {:.2}", all.hardirq)?;
        writeln!(out, "      %soft: {:.2}", all.softirq)?;
        writeln!(out, "     %other: {:.2}", all.steal)?;
        writeln!(out, "  * Idle portion: {:.2}", all.idle + all.iowait)?;
        writeln!(out, "    %iowait: {:.2}", all.iowait)?;
        writeln!(out, "      %idle: {:.2}", all.idle)?;
    }

    if let Some(disk) = &summary.disk {
        let names = disk
            .devices
            .keys()
            .map(String::as_str)
            .chain(disk.total.as_ref().map(|_| TOTAL_KEY));
        for name in names {
            let Some(e) = disk.get(name) else {
                continue;
            };
            writeln!(out, "* Average DEVICE usage: {}", name)?;
            writeln!(out, "        read IOPS: {:.2}", e.rd_iops)?;
            writeln!(out, "       write IOPS: {:.2}", e.wr_iops)?;
            writeln!(
                out,
                "  read throughput: {:.2} MB/s",
                e.rd_secps * SECTOR / MIB
            )?;
            writeln!(
                out,
                " write throughput: {:.2} MB/s",
                e.wr_secps * SECTOR / MIB
            )?;
            writeln!(out, "     read latency: {:.1} usec", e.rd_latency * 1000.0)?;
            writeln!(out, "    write latency: {:.1} usec", e.wr_latency * 1000.0)?;
            writeln!(
                out,
                "      read amount: {:.2} MB",
                e.rd_sectors as f64 * SECTOR / MIB
            )?;
            writeln!(
                out,
                "     write amount: {:.2} MB",
                e.wr_sectors as f64 * SECTOR / MIB
            )?;
        }
    }
    Ok(())
}

/// Prints a summary to stdout. A closed stdout is not an error.
fn print_summary(summary: &Summary, json: bool, title: Option<&str>) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    let written = if json {
        serde_json::to_writer(&mut out, summary)?;
        writeln!(out)
    } else {
        write_summary(&mut out, summary, title)
    };
    match written.and_then(|_| out.flush()) {
        Err(e) if e.kind() != io::ErrorKind::BrokenPipe => Err(e.into()),
        _ => Ok(()),
    }
}

/// Records on a background thread while `argv` runs. The recording stops
/// when the command exits or when `stop_rx` receives.
fn stat<A>(
    acquirer: A,
    config: RecorderConfig,
    argv: &[String],
    stop_tx: Sender<()>,
    stop_rx: Receiver<()>,
) -> Result<ExitStatus, CliError>
where
    A: SnapshotAcquirer + Send + 'static,
{
    let Some((program, args)) = argv.split_first() else {
        return Err(CliError::Command {
            program: String::new(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "no command given"),
        });
    };

    let mut recorder = Recorder::new(config, acquirer, RealClock::new(stop_rx));
    let recording = thread::Builder::new()
        .name("perflog-stat".into())
        .spawn(move || recorder.record())?;

    let status = process::Command::new(program).args(args).status();
    if stop_tx.send(()).is_err() {
        debug!("recorder already stopped");
    }

    let stats = recording.join().map_err(|_| CliError::RecorderLost)??;
    debug!(samples = stats.samples, "recording finished");

    status.map_err(|source| CliError::Command {
        program: program.clone(),
        source,
    })
}

fn summarize_path(path: &Path) -> Result<Option<Summary>, CliError> {
    summarize(LogReader::open_path(path)?)
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Play {
            log,
            pretty,
            disk_regex,
        } => {
            let filter = disk_regex.as_deref().map(Regex::new).transpose()?;
            let reader = match &log {
                Some(path) => LogReader::open_path(path)?,
                None => LogReader::open(io::stdin())?,
            };
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let lines = play(reader, &mut out, pretty, filter.as_ref())?;
            debug!(lines, "playback finished");
        }
        Command::Summary { log, json, title } => {
            let Some(summary) = summarize_path(&log)? else {
                warn!("log has no records");
                return Ok(());
            };
            print_summary(&summary, json, title.as_deref())?;
        }
        Command::Stat {
            logfile,
            interval,
            json,
            command,
        } => {
            // Ctrl-C reaches the command too; we only stop recording and
            // stay around to print the summary.
            let (stop_tx, stop_rx) = mpsc::channel();
            let interrupt = stop_tx.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                let _ = interrupt.send(());
            }) {
                warn!("Failed to set Ctrl-C handler: {}", e);
            }

            let config = RecorderConfig {
                interval,
                output: Output::File(logfile.clone()),
                ..RecorderConfig::default()
            };
            let acquirer = ProcfsAcquirer::new(RealFs::new(), "/proc", "/sys");
            let status = stat(acquirer, config, &command, stop_tx, stop_rx)?;
            if !status.success() {
                warn!(%status, "command did not succeed");
            }

            let Some(summary) = summarize_path(&logfile)? else {
                warn!("log has no records");
                return Ok(());
            };
            print_summary(&summary, json, Some(&command.join(" ")))?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
