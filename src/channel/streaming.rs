//! One long-lived engine process fed command-by-command through stdin.
//!
//! Commands are written and flushed in submission order; the engine executes
//! them sequentially. There is no acknowledgement on the pipe, so results are
//! observed through files the commands write: wait a settle interval, then
//! check whether the file exists and has stopped growing.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::{check_binary, kill_and_reap, spawn_error, tail};
use crate::error::{BenchError, Result};
use crate::protocol;

/// How to wait for a result artifact.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactWait {
    /// Fixed delay before the first existence check.
    pub settle: Duration,
    /// Budget for the file to appear (when required) and stop growing.
    pub timeout: Duration,
    pub poll: Duration,
    /// Keep polling for an absent file until `timeout` instead of treating
    /// absence as "no rows".
    pub require: bool,
}

pub struct StreamingTransport {
    binary: PathBuf,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    _stdout_log: NamedTempFile,
    stderr_log: NamedTempFile,
    stdout_reader: File,
    stderr_reader: File,
    /// Kept alive until the process is gone; the engine may read it lazily.
    _init_script: NamedTempFile,
}

impl StreamingTransport {
    /// Spawn the engine with `init` as its `-init` script and an open stdin.
    pub fn spawn(binary: &Path, init: &str) -> Result<Self> {
        check_binary(binary)?;

        let mut init_script = tempfile::Builder::new()
            .prefix("hop-session-")
            .suffix(".sql")
            .tempfile()?;
        init_script.write_all(init.as_bytes())?;
        init_script.flush()?;

        let stdout_log = NamedTempFile::new()?;
        let stderr_log = NamedTempFile::new()?;
        // Separate open file descriptions so our reads never move the child's
        // write offset.
        let stdout_reader = stdout_log.reopen()?;
        let stderr_reader = stderr_log.reopen()?;

        let mut child = Command::new(binary)
            .arg("-init")
            .arg(init_script.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_log.reopen()?))
            .stderr(Stdio::from(stderr_log.reopen()?))
            .spawn()
            .map_err(|e| spawn_error(binary, e))?;
        let stdin = child.stdin.take();

        info!(binary = %binary.display(), pid = child.id(), "engine session started");

        Ok(Self {
            binary: binary.to_path_buf(),
            child: Some(child),
            stdin,
            _stdout_log: stdout_log,
            stderr_log,
            stdout_reader,
            stderr_reader,
            _init_script: init_script,
        })
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn is_open(&self) -> bool {
        self.child.is_some()
    }

    /// Write one command line and flush it.
    pub fn send(&mut self, command: &str) -> Result<()> {
        self.ensure_running()?;
        let stdin = self.stdin.as_mut().ok_or(BenchError::Closed)?;
        let written = stdin
            .write_all(command.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Err(self.exited_error()),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail with `Execution` if the process has already exited.
    pub fn ensure_running(&mut self) -> Result<()> {
        let child = self.child.as_mut().ok_or(BenchError::Closed)?;
        match child.try_wait()? {
            None => Ok(()),
            Some(status) => {
                let stderr = self.stderr_tail();
                Err(BenchError::Execution {
                    code: status.code(),
                    stderr,
                })
            }
        }
    }

    /// The pipe broke; give the process a moment to become reapable so the
    /// error carries its exit status and stderr.
    fn exited_error(&mut self) -> BenchError {
        let deadline = Instant::now() + Duration::from_millis(500);
        loop {
            if let Err(e) = self.ensure_running() {
                return e;
            }
            if Instant::now() >= deadline {
                return BenchError::Execution {
                    code: None,
                    stderr: "engine closed its input".to_string(),
                };
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Output the engine printed since the previous call (stdout then stderr).
    pub fn drain_output(&mut self) -> Result<String> {
        let mut out = read_new(&mut self.stdout_reader)?;
        out.push_str(&read_new(&mut self.stderr_reader)?);
        Ok(out)
    }

    fn stderr_tail(&self) -> String {
        fs::read(self.stderr_log.path())
            .map(|b| tail(String::from_utf8_lossy(&b).trim(), 2048).to_string())
            .unwrap_or_default()
    }

    /// Wait for a result artifact and return its contents.
    ///
    /// `Ok(None)` means the file was not there after the settle interval (or,
    /// with `require`, not within `timeout`). The file is deleted after it is
    /// read so a later command can never observe stale contents.
    pub fn await_artifact(&mut self, path: &Path, wait: ArtifactWait) -> Result<Option<String>> {
        thread::sleep(wait.settle);
        let deadline = Instant::now() + wait.timeout;
        let mut last_len: Option<u64> = None;

        loop {
            self.ensure_running()?;

            match fs::metadata(path) {
                Ok(meta) => {
                    let len = meta.len();
                    if last_len == Some(len) && len > 0 {
                        let contents = fs::read_to_string(path)?;
                        remove_artifact(path);
                        return Ok(Some(contents));
                    }
                    last_len = Some(len);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if !wait.require {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e.into()),
            }

            if Instant::now() >= deadline {
                if last_len.is_none() && wait.require {
                    return Ok(None);
                }
                return Err(BenchError::Timeout(wait.timeout));
            }
            thread::sleep(wait.poll);
        }
    }

    /// Ask the engine to quit; kill it if it is still running after `grace`.
    /// Safe to call more than once.
    pub fn close(&mut self, grace: Duration) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin
                .write_all(protocol::quit().as_bytes())
                .and_then(|_| stdin.write_all(b"\n"))
                .and_then(|_| stdin.flush());
            // Dropping stdin closes the pipe, which also ends the engine's read loop.
        }

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(pid = child.id(), code = ?status.code(), "engine session exited");
                    return;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "failed to poll engine process");
                    break;
                }
            }
        }

        warn!(
            pid = child.id(),
            grace_ms = grace.as_millis() as u64,
            "engine did not quit in time, killing"
        );
        kill_and_reap(&mut child);
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        self.close(Duration::from_secs(1));
    }
}

/// Read from the current offset to EOF; the offset then stays at EOF.
fn read_new(file: &mut File) -> io::Result<String> {
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Delete a consumed or stale artifact; absence is fine.
pub fn remove_artifact(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove result artifact");
        }
    }
}
