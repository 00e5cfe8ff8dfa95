//! Session handles: one engine instance with tables loaded and (for the
//! accelerated engine) its buffer allocated.
//!
//! [`ScriptSession`] drives the engine one script per call. Every submission
//! replays the accumulated script (init, retained warm-up commands, then the
//! new command) in a fresh process, so each call re-pays the load cost. The
//! benchmark controller measures that cost separately through `open`.
//!
//! [`PipedSession`] keeps a single process alive and feeds it commands through
//! stdin; results come back as files. The BFS engine uses it because it issues
//! many small commands against the same loaded tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::channel::streaming::{remove_artifact, ArtifactWait};
use crate::channel::{parse_id_csv, IdArtifact, ProcessOutput, ScriptRunner, StreamingTransport};
use crate::error::{BenchError, Result};
use crate::fallback::FallbackMatcher;
use crate::protocol::{self, InitScript};
use crate::transcript::{self, Section};

// ---------------------------------------------------------------------------
// Script-per-call session
// ---------------------------------------------------------------------------

/// One command, optionally labelled so its output can be found in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub label: Option<String>,
    pub command: String,
}

impl Step {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            label: None,
            command: command.into(),
        }
    }

    pub fn labelled(label: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            command: command.into(),
        }
    }
}

/// Result of one script submission.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub output: ProcessOutput,
    /// Fallback markers found across stdout and stderr.
    pub fallbacks: usize,
    pub sections: Vec<Section>,
}

impl Exchange {
    pub fn elapsed(&self) -> Duration {
        self.output.elapsed
    }

    pub fn section(&self, label: &str) -> Option<&Section> {
        transcript::section(&self.sections, label)
    }

    /// Markers charged to the step labelled `label`: those inside its own
    /// section plus those no section can claim (stderr, output before the
    /// first label). Markers in other sections, the replayed warm-up
    /// included, belong to those steps.
    pub fn fallbacks_for(&self, label: Option<&str>) -> usize {
        let attributed: usize = self.sections.iter().map(|s| s.fallbacks).sum();
        let own = label
            .and_then(|l| self.section(l))
            .map(|s| s.fallbacks)
            .unwrap_or(0);
        own + self.fallbacks.saturating_sub(attributed)
    }
}

pub struct ScriptSession<R: ScriptRunner> {
    runner: R,
    matcher: Arc<dyn FallbackMatcher>,
    prefix: Vec<Step>,
    startup: Duration,
    closed: bool,
}

impl<R: ScriptRunner> ScriptSession<R> {
    /// Run the init script once to prove the engine starts and to measure
    /// load+init time.
    ///
    /// Fails with `BinaryMissing` if the binary is absent and with `Startup`
    /// if the init run exits non-zero or exceeds `timeout`.
    pub fn open(
        mut runner: R,
        init: &InitScript,
        engine_timer: bool,
        matcher: Arc<dyn FallbackMatcher>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut prefix: Vec<Step> = init.lines().iter().map(|l| Step::new(l.as_str())).collect();
        for line in protocol::csv_output_mode() {
            prefix.push(Step::new(line));
        }
        if engine_timer {
            prefix.push(Step::new(protocol::timer_on()));
        }

        let script = render(&prefix, None);
        let output = match runner.run(&script, timeout) {
            Ok(o) => o,
            Err(BenchError::Timeout(t)) => {
                return Err(BenchError::Startup(format!(
                    "init did not finish within {:.3}s",
                    t.as_secs_f64()
                )))
            }
            Err(BenchError::Execution { code, stderr }) => {
                return Err(BenchError::Startup(format!("init exited with {:?}: {}", code, stderr)))
            }
            Err(e) => return Err(e),
        };
        if !output.success() {
            return Err(BenchError::Startup(format!(
                "init exited with {:?}: {}",
                output.code,
                output.error_tail(512)
            )));
        }
        debug!(
            startup_ms = output.elapsed.as_secs_f64() * 1000.0,
            "script session opened"
        );

        Ok(Self {
            runner,
            matcher,
            prefix,
            startup: output.elapsed,
            closed: false,
        })
    }

    /// Wall time of the init-only run (table load + buffer init + process start).
    pub fn startup_time(&self) -> Duration {
        self.startup
    }

    /// Run prefix + `step` in a fresh process.
    pub fn submit(&mut self, step: &Step, timeout: Duration) -> Result<Exchange> {
        self.submit_block(std::slice::from_ref(step), timeout)
    }

    /// Run prefix + `step`, then keep `step` in the prefix for later calls.
    /// Used for warm-up commands.
    pub fn submit_retained(&mut self, step: &Step, timeout: Duration) -> Result<Exchange> {
        let exchange = self.submit(step, timeout)?;
        self.prefix.push(step.clone());
        Ok(exchange)
    }

    /// Run prefix + all `steps` back-to-back in one process.
    pub fn submit_block(&mut self, steps: &[Step], timeout: Duration) -> Result<Exchange> {
        if self.closed {
            return Err(BenchError::Closed);
        }
        let script = render(&self.prefix, Some(steps));
        let output = self.runner.run(&script, timeout)?;
        if !output.success() {
            return Err(BenchError::Execution {
                code: output.code,
                stderr: output.error_tail(512),
            });
        }
        let fallbacks = self.matcher.count(&output.stdout) + self.matcher.count(&output.stderr);
        let sections = transcript::parse_sections(&output.stdout, self.matcher.as_ref());
        Ok(Exchange {
            output,
            fallbacks,
            sections,
        })
    }

    /// Nothing stays running between calls, so closing only refuses further
    /// submissions. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_runner(self) -> R {
        self.runner
    }
}

fn render(prefix: &[Step], steps: Option<&[Step]>) -> String {
    let mut out = String::new();
    for step in prefix.iter().chain(steps.unwrap_or_default()) {
        if let Some(label) = &step.label {
            out.push_str(&protocol::print_label(label));
            out.push('\n');
        }
        out.push_str(&step.command);
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Long-lived piped session
// ---------------------------------------------------------------------------

/// Timing knobs for a piped session.
#[derive(Debug, Clone, Copy)]
pub struct PipedOptions {
    pub startup_timeout: Duration,
    pub settle: Duration,
    pub poll: Duration,
    pub close_grace: Duration,
}

impl Default for PipedOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(300),
            settle: Duration::from_millis(500),
            poll: Duration::from_millis(50),
            close_grace: Duration::from_secs(5),
        }
    }
}

pub struct PipedSession {
    transport: StreamingTransport,
    workdir: TempDir,
    matcher: Arc<dyn FallbackMatcher>,
    options: PipedOptions,
    startup: Duration,
}

impl PipedSession {
    /// Start the engine and block until it has executed the init script.
    ///
    /// Readiness is observed by exporting a one-row marker file after the init
    /// commands: since the engine executes input in order, the marker file
    /// appearing means loading has finished.
    pub fn open(
        binary: &Path,
        init: &InitScript,
        matcher: Arc<dyn FallbackMatcher>,
        options: PipedOptions,
    ) -> Result<Self> {
        let started = Instant::now();
        let workdir = tempfile::Builder::new().prefix("hop-bfs-").tempdir()?;
        let mut transport = StreamingTransport::spawn(binary, &init.render())?;

        let marker = workdir.path().join("ready.csv");
        let marker_cmd = protocol::export(
            &format!("SELECT 1 AS {}", protocol::NODE_ID_COLUMN),
            &marker,
        );
        let wait = ArtifactWait {
            settle: Duration::ZERO,
            timeout: options.startup_timeout,
            poll: options.poll,
            require: true,
        };

        let ready = transport
            .send(&marker_cmd)
            .and_then(|_| transport.await_artifact(&marker, wait));
        match ready {
            Ok(Some(_)) => {}
            Ok(None) => {
                transport.close(options.close_grace);
                return Err(BenchError::Startup(format!(
                    "no output within {:.3}s",
                    options.startup_timeout.as_secs_f64()
                )));
            }
            Err(BenchError::Execution { code, stderr }) => {
                transport.close(options.close_grace);
                return Err(BenchError::Startup(format!(
                    "engine exited during init ({:?}): {}",
                    code, stderr
                )));
            }
            Err(e) => {
                transport.close(options.close_grace);
                return Err(BenchError::Startup(e.to_string()));
            }
        }

        let startup = started.elapsed();
        info!(
            startup_secs = startup.as_secs_f64(),
            workdir = %workdir.path().display(),
            "piped session ready"
        );
        let mut session = Self {
            transport,
            workdir,
            matcher,
            options,
            startup,
        };
        // Init chatter may contain anything; start fallback counting clean.
        let _ = session.transport.drain_output();
        Ok(session)
    }

    pub fn startup_time(&self) -> Duration {
        self.startup
    }

    pub fn options(&self) -> &PipedOptions {
        &self.options
    }

    /// Where result artifacts for this session are written.
    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.workdir.path().join(format!("{}.csv", name))
    }

    /// Send a command without waiting for anything.
    pub fn submit(&mut self, command: &str) -> Result<()> {
        self.transport.send(command)
    }

    /// Export `query` to the artifact `name` and read back its node ids.
    ///
    /// A missing or unparsable artifact is not an error: it comes back with
    /// no ids and `degraded()` set. Errors are reserved for a dead engine
    /// and for artifacts that keep growing past `timeout`.
    pub fn export_ids(&mut self, query: &str, name: &str, timeout: Duration) -> Result<IdArtifact> {
        let path = self.artifact_path(name);
        remove_artifact(&path);

        let started = Instant::now();
        self.transport.send(&protocol::export(query, &path))?;
        let wait = ArtifactWait {
            settle: self.options.settle,
            timeout,
            poll: self.options.poll,
            require: false,
        };
        let contents = self.transport.await_artifact(&path, wait)?;
        let elapsed = started.elapsed();

        let output = self.transport.drain_output()?;
        let fallbacks = self.matcher.count(&output);

        let mut artifact = IdArtifact {
            path: path.clone(),
            fallbacks,
            elapsed,
            ..IdArtifact::default()
        };
        match contents {
            None => {
                warn!(path = %path.display(), "result artifact missing, treating as no rows");
                artifact.missing = true;
            }
            Some(text) => match parse_id_csv(&text) {
                Ok(ids) => artifact.ids = ids,
                Err(reason) => {
                    warn!(path = %path.display(), %reason, "result artifact unparsable, treating as no rows");
                    artifact.unparsable = Some(reason);
                }
            },
        }
        Ok(artifact)
    }

    /// Quit gracefully, killing the engine after the grace period. Idempotent.
    pub fn close(&mut self) {
        self.transport.close(self.options.close_grace);
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }
}

impl Drop for PipedSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::SubstringMatcher;
    use std::collections::VecDeque;

    /// Hands out canned outputs and remembers every script it was given.
    struct Canned {
        outputs: VecDeque<Result<ProcessOutput>>,
        scripts: Vec<String>,
    }

    impl Canned {
        fn new(outputs: Vec<Result<ProcessOutput>>) -> Self {
            Self {
                outputs: outputs.into(),
                scripts: Vec::new(),
            }
        }
    }

    impl ScriptRunner for Canned {
        fn run(&mut self, script: &str, _timeout: Duration) -> Result<ProcessOutput> {
            self.scripts.push(script.to_string());
            self.outputs.pop_front().unwrap_or_else(|| Ok(ok_output("", 1)))
        }
    }

    fn ok_output(stdout: &str, ms: u64) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            code: Some(0),
            elapsed: Duration::from_millis(ms),
        }
    }

    fn matcher() -> Arc<dyn FallbackMatcher> {
        Arc::new(SubstringMatcher::new(["Error in GPUExecuteQuery"]))
    }

    fn init() -> InitScript {
        InitScript::from_lines(vec!["CREATE TABLE t AS SELECT 1;".to_string()])
    }

    #[test]
    fn open_measures_startup() {
        let runner = Canned::new(vec![Ok(ok_output("", 120))]);
        let s = ScriptSession::open(runner, &init(), false, matcher(), Duration::from_secs(1)).unwrap();
        assert_eq!(s.startup_time(), Duration::from_millis(120));
    }

    #[test]
    fn open_maps_failures_to_startup() {
        let mut bad = ok_output("", 1);
        bad.code = Some(1);
        let r = ScriptSession::open(Canned::new(vec![Ok(bad)]), &init(), false, matcher(), Duration::from_secs(1));
        assert!(matches!(r, Err(BenchError::Startup(_))));

        let r = ScriptSession::open(
            Canned::new(vec![Err(BenchError::Timeout(Duration::from_secs(1)))]),
            &init(),
            false,
            matcher(),
            Duration::from_secs(1),
        );
        assert!(matches!(r, Err(BenchError::Startup(_))));

        let r = ScriptSession::open(
            Canned::new(vec![Err(BenchError::BinaryMissing(PathBuf::from("/x")))]),
            &init(),
            false,
            matcher(),
            Duration::from_secs(1),
        );
        assert!(matches!(r, Err(BenchError::BinaryMissing(_))));
    }

    #[test]
    fn retained_steps_replay_in_order() {
        let runner = Canned::new(vec![]);
        let mut s = ScriptSession::open(runner, &init(), true, matcher(), Duration::from_secs(1)).unwrap();
        s.submit_retained(&Step::labelled("WARMUP", "SELECT 1;"), Duration::from_secs(1)).unwrap();
        s.submit(&Step::labelled("QUERY 1", "SELECT 2;"), Duration::from_secs(1)).unwrap();
        let runner = s.into_runner();
        let last = runner.scripts.last().unwrap();
        assert_eq!(
            last,
            "CREATE TABLE t AS SELECT 1;\n.mode csv\n.headers off\n.timer on\n\
             .print '=== WARMUP ==='\nSELECT 1;\n.print '=== QUERY 1 ==='\nSELECT 2;\n"
        );
    }

    #[test]
    fn submit_counts_fallbacks_and_sections() {
        let stdout = "=== QUERY 1 ===\nError in GPUExecuteQuery: x\n1\n2\n";
        let runner = Canned::new(vec![Ok(ok_output("", 1)), Ok(ok_output(stdout, 5))]);
        let mut s = ScriptSession::open(runner, &init(), false, matcher(), Duration::from_secs(1)).unwrap();
        let ex = s.submit(&Step::labelled("QUERY 1", "q;"), Duration::from_secs(1)).unwrap();
        assert_eq!(ex.fallbacks, 1);
        assert_eq!(ex.section("QUERY 1").unwrap().rows, 2);
        assert_eq!(ex.elapsed(), Duration::from_millis(5));
    }

    #[test]
    fn nonzero_exit_is_execution_error() {
        let mut bad = ok_output("", 1);
        bad.code = Some(2);
        bad.stderr = "Binder Error".into();
        let runner = Canned::new(vec![Ok(ok_output("", 1)), Ok(bad)]);
        let mut s = ScriptSession::open(runner, &init(), false, matcher(), Duration::from_secs(1)).unwrap();
        match s.submit(&Step::new("q;"), Duration::from_secs(1)) {
            Err(BenchError::Execution { code, stderr }) => {
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "Binder Error");
            }
            other => panic!("expected execution error, got {:?}", other.map(|e| e.output)),
        }
    }

    #[test]
    fn close_is_idempotent_and_blocks_submit() {
        let mut s = ScriptSession::open(Canned::new(vec![]), &init(), false, matcher(), Duration::from_secs(1)).unwrap();
        s.close();
        s.close();
        assert!(s.is_closed());
        assert!(matches!(s.submit(&Step::new("q;"), Duration::from_secs(1)), Err(BenchError::Closed)));
    }
}
