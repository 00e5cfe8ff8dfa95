//! One process invocation per script.
//!
//! The script is written to a temporary `.sql` file handed to the engine with
//! `-init`; stdin is closed so the engine exits once the script finishes.
//! stdout/stderr go to anonymous temp files rather than pipes so a chatty
//! engine can never block on a full pipe while we poll for exit.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use super::{check_binary, read_all, spawn_error, wait_with_deadline, ProcessOutput, ScriptRunner};
use crate::error::Result;

/// Exit polling interval; bounds timing resolution.
pub const DEFAULT_POLL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct BatchTransport {
    binary: PathBuf,
    poll: Duration,
}

impl BatchTransport {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll.max(Duration::from_micros(100));
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

impl ScriptRunner for BatchTransport {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<ProcessOutput> {
        check_binary(&self.binary)?;

        // Removed on drop, including every early return below.
        let mut script_file = tempfile::Builder::new()
            .prefix("hop-bench-")
            .suffix(".sql")
            .tempfile()?;
        script_file.write_all(script.as_bytes())?;
        script_file.flush()?;

        let mut stdout = tempfile::tempfile()?;
        let mut stderr = tempfile::tempfile()?;

        debug!(
            binary = %self.binary.display(),
            script = %script_file.path().display(),
            bytes = script.len(),
            "spawning batch run"
        );

        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .arg("-init")
            .arg(script_file.path())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout.try_clone()?))
            .stderr(Stdio::from(stderr.try_clone()?))
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))?;

        let status = wait_with_deadline(&mut child, timeout, self.poll)?;
        let elapsed = start.elapsed();

        let output = ProcessOutput {
            stdout: read_all(&mut stdout)?,
            stderr: read_all(&mut stderr)?,
            code: status.code(),
            elapsed,
        };
        debug!(
            code = ?output.code,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "batch run finished"
        );
        Ok(output)
    }
}
