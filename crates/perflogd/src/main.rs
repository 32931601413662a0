//! perflogd - Linux performance counter recorder.
//!
//! Samples CPU, interrupt, disk, network and memory counters from /proc at a
//! fixed interval and appends them to a log file or stdout. Optionally feeds
//! the same stream to a live viewer process.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use perflog_core::collector::{DeviceFilter, MetricSet, ProcfsAcquirer, RealFs, SnapshotAcquirer};
use perflog_core::recorder::{
    LiveCommand, Output, RealClock, Recorder, RecorderConfig, StopReason,
};
use perflog_core::util::parse_duration;

/// Linux performance counter recorder.
#[derive(Parser, Debug)]
#[command(name = "perflogd", about = "Linux performance counter recorder", version)]
struct Args {
    /// Sampling interval (e.g. "1s", "500ms", "2m").
    #[arg(short, long, default_value = "1s", value_parser = parse_interval)]
    interval: Duration,

    /// Keep the interval fixed instead of doubling it every 1000 samples.
    #[arg(long)]
    no_interval_backoff: bool,

    /// Stop after this long. Zero or absent records until interrupted.
    #[arg(short, long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Wait this long before the first sample.
    #[arg(long, default_value = "0", value_parser = parse_duration)]
    start_delay: Duration,

    /// Output file, "-" for stdout.
    #[arg(short, long, default_value = "-")]
    output: String,

    /// Gzip the output.
    #[arg(short = 'z', long)]
    gzip: bool,

    /// Do not record CPU usage.
    #[arg(long)]
    no_cpu: bool,

    /// Do not record interrupts.
    #[arg(long)]
    no_intr: bool,

    /// Do not record disk I/O.
    #[arg(long)]
    no_disk: bool,

    /// Do not record network traffic.
    #[arg(long)]
    no_net: bool,

    /// Do not record memory usage.
    #[arg(long)]
    no_mem: bool,

    /// Record only these devices or partitions (comma separated).
    #[arg(long, value_delimiter = ',', conflicts_with = "disk_regex")]
    disks: Vec<String>,

    /// Record only devices or partitions matching this regex.
    #[arg(long, value_name = "REGEX")]
    disk_regex: Option<String>,

    /// Viewer to spawn; it receives the log on stdin and its output is shown
    /// on our stdout.
    #[arg(long, value_name = "PROG")]
    live_cmd: Option<String>,

    /// Argument for the viewer (repeatable).
    #[arg(long = "live-arg", requires = "live_cmd", allow_hyphen_values = true)]
    live_args: Vec<String>,

    /// Print block devices and partitions to stderr and exit.
    #[arg(long)]
    list_devices: bool,

    /// Path to /proc filesystem (for testing/mocking).
    #[arg(long, default_value = "/proc")]
    proc_path: PathBuf,

    /// Path to /sys filesystem.
    #[arg(long, default_value = "/sys")]
    sys_path: PathBuf,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

fn parse_interval(s: &str) -> Result<Duration, String> {
    let interval = parse_duration(s).map_err(|e| e.to_string())?;
    if interval.is_zero() {
        return Err("interval must be positive".into());
    }
    Ok(interval)
}

/// Initializes the tracing subscriber on stderr; stdout carries the log.
fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["perflogd", "perflog_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn metric_set(args: &Args) -> MetricSet {
    MetricSet {
        cpu: !args.no_cpu,
        interrupt: !args.no_intr,
        disk: !args.no_disk,
        net: !args.no_net,
        mem: !args.no_mem,
    }
}

fn device_filter(args: &Args) -> Result<DeviceFilter, regex::Error> {
    if let Some(re) = &args.disk_regex {
        DeviceFilter::pattern(re)
    } else if !args.disks.is_empty() {
        Ok(DeviceFilter::allow(&args.disks))
    } else {
        Ok(DeviceFilter::All)
    }
}

fn build_config(args: &Args) -> Result<RecorderConfig, regex::Error> {
    let output = if args.output == "-" {
        Output::Stdout
    } else {
        Output::File(PathBuf::from(&args.output))
    };

    Ok(RecorderConfig {
        interval: args.interval,
        backoff: !args.no_interval_backoff,
        timeout: args.timeout.filter(|t| !t.is_zero()),
        start_delay: args.start_delay,
        metrics: metric_set(args),
        device_filter: device_filter(args)?,
        live_command: args.live_cmd.as_ref().map(|program| LiveCommand {
            program: program.clone(),
            args: args.live_args.clone(),
        }),
        output,
        gzip: args.gzip,
    })
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid --disk-regex: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let acquirer = ProcfsAcquirer::new(RealFs::new(), &args.proc_path, &args.sys_path)
        .with_filter(config.device_filter.clone());

    if args.list_devices {
        return match acquirer.platform_header() {
            Ok(header) => {
                for name in header.devs_parts() {
                    eprintln!("{}", name);
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to list devices: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    if config.metrics.is_empty() {
        warn!("All metric families disabled, only timestamps will be recorded");
    }

    info!(
        "perflogd {} ({}) starting",
        env!("CARGO_PKG_VERSION"),
        perflog_core::GIT_SHA
    );
    info!(
        "Config: interval={:?}, proc={}, sys={}",
        config.interval,
        args.proc_path.display(),
        args.sys_path.display()
    );

    // Setup graceful shutdown
    let (stop_tx, stop_rx) = mpsc::channel();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        let _ = stop_tx.send(());
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let mut recorder = Recorder::new(config, acquirer, RealClock::new(stop_rx));
    match recorder.record() {
        Ok(stats) => {
            if stats.stop == StopReason::OutputClosed {
                info!("Output closed after {} samples", stats.samples);
            }
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Recording failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
