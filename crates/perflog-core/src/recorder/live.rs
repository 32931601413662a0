//! Live downstream process: our log goes to its stdin, its stdout is relayed
//! to ours.

use std::io::{self, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use super::RecorderError;

/// A spawned consumer and the thread relaying its output.
pub struct LiveDownstream {
    program: String,
    child: Child,
    relay: Option<JoinHandle<io::Result<u64>>>,
}

impl LiveDownstream {
    /// Spawns `program` and relays its stdout to this process's stdout.
    pub fn spawn(program: &str, args: &[String]) -> Result<(Self, ChildStdin), RecorderError> {
        Self::spawn_with_output(program, args, io::stdout())
    }

    /// Like [`LiveDownstream::spawn`] but relays into `output`.
    pub fn spawn_with_output<O>(
        program: &str,
        args: &[String],
        mut output: O,
    ) -> Result<(Self, ChildStdin), RecorderError>
    where
        O: Write + Send + 'static,
    {
        let spawn_err = |e: io::Error| RecorderError::Spawn {
            program: program.to_string(),
            source: e,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;

        let missing = |what: &str| {
            spawn_err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("child {} not captured", what),
            ))
        };
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let mut stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        let relay = thread::Builder::new()
            .name("perflog-relay".into())
            .spawn(move || -> io::Result<u64> {
                let copied = io::copy(&mut stdout, &mut output)?;
                output.flush()?;
                Ok(copied)
            })
            .map_err(spawn_err)?;

        debug!(program, pid = child.id(), "live downstream started");
        Ok((
            Self {
                program: program.to_string(),
                child,
                relay: Some(relay),
            },
            stdin,
        ))
    }

    /// Drains the relay and reaps the child. The child's stdin must already
    /// be closed, otherwise this blocks until the child exits on its own.
    pub fn wait(mut self) -> Result<ExitStatus, RecorderError> {
        if let Some(relay) = self.relay.take() {
            match relay.join() {
                Ok(Ok(bytes)) => debug!(bytes, "relay drained"),
                Ok(Err(e)) => warn!(error = %e, "relay stopped early"),
                Err(_) => warn!("relay thread panicked"),
            }
        }
        let status = self.child.wait().map_err(RecorderError::Io)?;
        if !status.success() {
            warn!(program = %self.program, %status, "live downstream exited with failure");
        }
        Ok(status)
    }
}
