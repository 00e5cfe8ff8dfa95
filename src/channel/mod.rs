//! Transports used to talk to the engine process.
//!
//! The engine has no structured request/response framing over its pipes, so
//! there are two ways to observe a result:
//!
//! - [`batch`]: one process per script; wait for exit and read everything it
//!   printed.
//! - [`streaming`]: one long-lived process fed through stdin; each command
//!   writes a result file, which is read after a settle interval.

pub mod batch;
pub mod streaming;

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::{BenchError, Result};
use crate::protocol::NODE_ID_COLUMN;

pub use batch::BatchTransport;
pub use streaming::StreamingTransport;

/// Everything a finished process run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last `max` bytes of stderr (or stdout when stderr is empty), for error text.
    pub fn error_tail(&self, max: usize) -> String {
        let text = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail(text.trim(), max).to_string()
    }
}

/// Runs one complete script in a fresh engine process.
///
/// Implementations return `Ok` for any exit status; interpreting the status
/// is the caller's job. `Err` means the run could not complete: the binary is
/// missing, the spawn failed, or the timeout fired (after the process was
/// killed and reaped).
pub trait ScriptRunner {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<ProcessOutput>;
}

impl<R: ScriptRunner + ?Sized> ScriptRunner for &mut R {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<ProcessOutput> {
        (**self).run(script, timeout)
    }
}

impl<R: ScriptRunner + ?Sized> ScriptRunner for Box<R> {
    fn run(&mut self, script: &str, timeout: Duration) -> Result<ProcessOutput> {
        (**self).run(script, timeout)
    }
}

/// Poll `child` until it exits or `timeout` elapses. On timeout the process is
/// killed and reaped before `Timeout` is returned.
pub(crate) fn wait_with_deadline(
    child: &mut Child,
    timeout: Duration,
    poll: Duration,
) -> Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        if Instant::now() >= deadline {
            kill_and_reap(child);
            return Err(BenchError::Timeout(timeout));
        }
        thread::sleep(poll);
    }
}

pub(crate) fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        // Already exited between the last poll and the kill.
        if e.kind() != io::ErrorKind::InvalidInput {
            warn!(pid = child.id(), error = %e, "failed to kill engine process");
        }
    }
    let _ = child.wait();
}

/// Map a spawn failure onto the error taxonomy.
pub(crate) fn spawn_error(binary: &Path, err: io::Error) -> BenchError {
    if err.kind() == io::ErrorKind::NotFound {
        BenchError::BinaryMissing(binary.to_path_buf())
    } else {
        BenchError::Startup(format!("failed to spawn {}: {}", binary.display(), err))
    }
}

/// A binary given as a path (not a bare command name) must exist.
pub(crate) fn check_binary(binary: &Path) -> Result<()> {
    let is_path = binary.components().count() > 1 || binary.is_absolute();
    if is_path && !binary.exists() {
        return Err(BenchError::BinaryMissing(binary.to_path_buf()));
    }
    Ok(())
}

pub(crate) fn read_all(file: &mut std::fs::File) -> io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

pub(crate) fn tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Node ids read back from one exported result artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdArtifact {
    pub path: PathBuf,
    pub ids: Vec<u64>,
    /// The file never appeared.
    pub missing: bool,
    /// The file appeared but could not be parsed; `ids` is empty.
    pub unparsable: Option<String>,
    /// Fallback markers seen in engine output while this command ran.
    pub fallbacks: usize,
    /// From command submission to the artifact being read.
    pub elapsed: Duration,
}

impl IdArtifact {
    /// True when the artifact was absent or unreadable and was treated as "no rows".
    pub fn degraded(&self) -> bool {
        self.missing || self.unparsable.is_some()
    }
}

/// Parse a single-column CSV of node ids with a header row.
///
/// All-or-nothing: any bad line rejects the whole artifact.
pub fn parse_id_csv(text: &str) -> std::result::Result<Vec<u64>, String> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or_else(|| "empty artifact (no header)".to_string())?;
    let column = header
        .split(',')
        .position(|c| c.trim().trim_matches('"').eq_ignore_ascii_case(NODE_ID_COLUMN))
        .ok_or_else(|| format!("header '{}' has no {} column", header.trim(), NODE_ID_COLUMN))?;

    lines
        .map(|line| {
            let field = line
                .split(',')
                .nth(column)
                .ok_or_else(|| format!("short line '{}'", line.trim()))?;
            let field = field.trim().trim_matches('"');
            field
                .parse::<u64>()
                .map_err(|e| format!("bad node id '{}': {}", field, e))
        })
        .collect()
}
