//! Benchmark controller: runs one plan (engine × size × query × mode) and
//! turns every trial into a [`TrialRecord`].
//!
//! Timing under the batch transport, where each submission is a fresh process
//! replaying the session script:
//!
//! - fresh: per trial, `open` measures load+init `L`, the query run takes `T`.
//!   `load_init = min(L, T)`, `query = T - load_init`, total `T`.
//! - warm: one `open`, a retained warm-up gives the baseline `W`; each trial
//!   reports `T - min(W, T)`.
//! - persistent: one `open`, warm-up baseline `W`, then one block of N queries
//!   taking `B`. `block = B - min(W, B)` and the per-query figure is
//!   `block / N`. That figure is amortized: the engine gives no per-command
//!   timestamps inside a block.
//!
//! Per-trial errors become records; only a missing binary stops a plan.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::channel::ScriptRunner;
use crate::error::{BenchError, Result};
use crate::fallback::FallbackMatcher;
use crate::gpu::{self, GpuStats};
use crate::protocol::{self, InitScript};
use crate::query::QueryDef;
use crate::schema::{EngineKind, PlanSummary, Stats, TimingMode, TrialRecord, TrialStatus};
use crate::session::{Exchange, ScriptSession, Step};

const WARMUP_LABEL: &str = "WARMUP";

/// One unit of benchmark work.
#[derive(Debug, Clone)]
pub struct Plan {
    pub engine: EngineKind,
    pub dataset_size: String,
    pub query: QueryDef,
    pub mode: TimingMode,
    pub trials: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub startup_timeout: Duration,
    pub trial_timeout: Duration,
    pub engine_timer: bool,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(300),
            trial_timeout: Duration::from_secs(300),
            engine_timer: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlanResult {
    pub records: Vec<TrialRecord>,
    pub summary: PlanSummary,
}

/// Runs plans through runners produced by `make_runner`, one runner per session.
pub struct BenchmarkController<F> {
    make_runner: F,
    matcher: Arc<dyn FallbackMatcher>,
    options: ControllerOptions,
}

impl<F, R> BenchmarkController<F>
where
    F: FnMut(EngineKind) -> R,
    R: ScriptRunner,
{
    pub fn new(make_runner: F, matcher: Arc<dyn FallbackMatcher>, options: ControllerOptions) -> Self {
        Self {
            make_runner,
            matcher,
            options,
        }
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Run every trial of `plan`. Fails only with a fatal error (missing binary).
    pub fn run_plan(&mut self, plan: &Plan, init: &InitScript) -> Result<PlanResult> {
        let trials = plan.trials.max(1);
        info!(
            engine = %plan.engine,
            size = %plan.dataset_size,
            query = %plan.query.name,
            mode = %plan.mode,
            trials,
            "running plan"
        );
        let mut acc = Accumulator::new(plan, trials);
        let accelerated = plan.engine.accelerated();
        if accelerated {
            acc.gpu_before = gpu::sample();
        }
        match plan.mode {
            TimingMode::FreshPerTrial => self.run_fresh(plan, init, &mut acc)?,
            TimingMode::WarmSingleSession => self.run_warm(plan, init, &mut acc)?,
            TimingMode::PersistentSession => self.run_persistent(plan, init, &mut acc)?,
        }
        if accelerated {
            acc.gpu_after = gpu::sample();
        }
        Ok(acc.finish())
    }

    fn open(&mut self, engine: EngineKind, init: &InitScript) -> Result<ScriptSession<R>> {
        let runner = (self.make_runner)(engine);
        ScriptSession::open(
            runner,
            init,
            self.options.engine_timer,
            Arc::clone(&self.matcher),
            self.options.startup_timeout,
        )
    }

    fn run_fresh(&mut self, plan: &Plan, init: &InitScript, acc: &mut Accumulator) -> Result<()> {
        for trial in 1..=acc.trials {
            let mut session = match self.open(plan.engine, init) {
                Ok(s) => s,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    acc.failed(trial, 1, &e);
                    continue;
                }
            };
            let load_init = session.startup_time();

            let step = query_step(plan, trial);
            match session.submit(&step, self.options.trial_timeout) {
                Ok(ex) => {
                    let total = ex.elapsed();
                    let load_init = load_init.min(total);
                    let query = total - load_init;
                    let mut record = acc.record(trial, 1, total);
                    record.load_init_secs = Some(load_init.as_secs_f64());
                    record.query_secs = Some(query.as_secs_f64());
                    attach_section(&mut record, &ex, &step);
                    acc.load_inits.push(load_init);
                    acc.push(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => acc.failed(trial, 1, &e),
            }
            session.close();
        }
        Ok(())
    }

    fn run_warm(&mut self, plan: &Plan, init: &InitScript, acc: &mut Accumulator) -> Result<()> {
        let Some((mut session, baseline)) = self.open_warmed(plan, init, acc)? else {
            return Ok(());
        };
        let load_init = session.startup_time();

        for trial in 1..=acc.trials {
            let step = query_step(plan, trial);
            match session.submit(&step, self.options.trial_timeout) {
                Ok(ex) => {
                    let elapsed = ex.elapsed();
                    let query = elapsed - baseline.min(elapsed);
                    let mut record = acc.record(trial, 1, elapsed);
                    record.load_init_secs = Some(load_init.as_secs_f64());
                    record.query_secs = Some(query.as_secs_f64());
                    attach_section(&mut record, &ex, &step);
                    acc.push(record);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => acc.failed(trial, 1, &e),
            }
        }
        session.close();
        Ok(())
    }

    fn run_persistent(&mut self, plan: &Plan, init: &InitScript, acc: &mut Accumulator) -> Result<()> {
        let Some((mut session, baseline)) = self.open_warmed(plan, init, acc)? else {
            return Ok(());
        };
        let load_init = session.startup_time();
        let n = acc.trials;
        let steps: Vec<Step> = (1..=n).map(|i| query_step(plan, i)).collect();

        // The block gets the whole per-trial budget once per query.
        let timeout = self.options.trial_timeout.saturating_mul(n as u32);
        match session.submit_block(&steps, timeout) {
            Ok(ex) => {
                let elapsed = ex.elapsed();
                let block = elapsed - baseline.min(elapsed);
                let block_secs = block.as_secs_f64();
                let amortized = block_secs / n as f64;
                acc.block_secs = Some(block_secs);
                acc.amortized_secs = Some(amortized);

                // Markers outside any labelled section (stderr, say) cannot be
                // attributed to one query, so they flag every query in the block.
                for (i, step) in steps.iter().enumerate() {
                    let mut record = acc.record(i + 1, n, elapsed);
                    record.load_init_secs = Some(load_init.as_secs_f64());
                    record.query_secs = Some(amortized);
                    attach_section(&mut record, &ex, step);
                    acc.push(record);
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                for trial in 1..=n {
                    acc.failed(trial, n, &e);
                }
            }
        }
        session.close();
        Ok(())
    }

    /// Open one session and run the retained warm-up. `None` when the session
    /// could not be opened; every trial has then been recorded as failed.
    fn open_warmed(
        &mut self,
        plan: &Plan,
        init: &InitScript,
        acc: &mut Accumulator,
    ) -> Result<Option<(ScriptSession<R>, Duration)>> {
        let queries = if plan.mode == TimingMode::PersistentSession {
            acc.trials
        } else {
            1
        };
        let mut session = match self.open(plan.engine, init) {
            Ok(s) => s,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                for trial in 1..=acc.trials {
                    acc.failed(trial, queries, &e);
                }
                return Ok(None);
            }
        };
        acc.load_inits.push(session.startup_time());

        let warmup = Step::labelled(WARMUP_LABEL, protocol::run_query(plan.engine, &plan.query.body));
        let baseline = match session.submit_retained(&warmup, self.options.trial_timeout) {
            Ok(ex) => {
                if ex.fallbacks > 0 {
                    warn!(fallbacks = ex.fallbacks, "fallback marker during warm-up");
                }
                ex.elapsed()
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                // Without a warm-up the init run is the best baseline left.
                warn!(error = %e, "warm-up failed, using init time as baseline");
                session.startup_time()
            }
        };
        acc.baseline = Some(baseline);
        Ok(Some((session, baseline)))
    }
}

fn query_step(plan: &Plan, trial: usize) -> Step {
    Step::labelled(
        format!("QUERY {}", trial),
        protocol::run_query(plan.engine, &plan.query.body),
    )
}

/// Row count, engine-reported time and fallback flag for one labelled step.
fn attach_section(record: &mut TrialRecord, ex: &Exchange, step: &Step) {
    let fallbacks = ex.fallbacks_for(step.label.as_deref());
    if let Some(section) = step.label.as_deref().and_then(|l| ex.section(l)) {
        record.row_count = Some(section.rows);
        record.reported_query_secs = section.reported_secs;
    }
    record.fallback_count = fallbacks;
    if fallbacks > 0 {
        let flagged = BenchError::Fallback(format!("{} marker line(s)", fallbacks));
        warn!(
            engine = %record.engine,
            query = %record.query,
            trial = record.trial,
            "{}",
            flagged
        );
        record.status = TrialStatus::Fallback;
        record.error = Some(flagged.to_string());
    }
}

/// Collects records and the mode-specific measurements for the summary.
struct Accumulator {
    engine: EngineKind,
    dataset_size: String,
    query: String,
    mode: TimingMode,
    trials: usize,
    records: Vec<TrialRecord>,
    load_inits: Vec<Duration>,
    baseline: Option<Duration>,
    block_secs: Option<f64>,
    amortized_secs: Option<f64>,
    gpu_before: Option<GpuStats>,
    gpu_after: Option<GpuStats>,
}

impl Accumulator {
    fn new(plan: &Plan, trials: usize) -> Self {
        Self {
            engine: plan.engine,
            dataset_size: plan.dataset_size.clone(),
            query: plan.query.name.clone(),
            mode: plan.mode,
            trials,
            records: Vec::with_capacity(trials),
            load_inits: Vec::new(),
            baseline: None,
            block_secs: None,
            amortized_secs: None,
            gpu_before: None,
            gpu_after: None,
        }
    }

    fn record(&self, trial: usize, queries: usize, elapsed: Duration) -> TrialRecord {
        TrialRecord {
            engine: self.engine,
            dataset_size: self.dataset_size.clone(),
            query: self.query.clone(),
            mode: self.mode,
            trial,
            queries,
            elapsed_secs: elapsed.as_secs_f64(),
            load_init_secs: None,
            query_secs: None,
            reported_query_secs: None,
            row_count: None,
            fallback_count: 0,
            status: TrialStatus::Ok,
            error: None,
        }
    }

    fn push(&mut self, record: TrialRecord) {
        self.records.push(record);
    }

    fn failed(&mut self, trial: usize, queries: usize, err: &BenchError) {
        warn!(
            engine = %self.engine,
            query = %self.query,
            trial,
            kind = err.kind(),
            error = %err,
            "trial failed"
        );
        let mut record = self.record(trial, queries, Duration::ZERO);
        record.status = match err {
            BenchError::Timeout(_) => TrialStatus::TimedOut,
            _ => TrialStatus::Failed,
        };
        record.error = Some(err.to_string());
        self.records.push(record);
    }

    fn finish(self) -> PlanResult {
        let query_secs = |status: TrialStatus| -> Vec<f64> {
            self.records
                .iter()
                .filter(|r| r.status == status)
                .filter_map(|r| r.query_secs)
                .collect()
        };
        let clean = Stats::from_secs(&query_secs(TrialStatus::Ok));
        let flagged = Stats::from_secs(&query_secs(TrialStatus::Fallback));
        let total = if self.mode == TimingMode::FreshPerTrial {
            let totals: Vec<f64> = self
                .records
                .iter()
                .filter(|r| r.status == TrialStatus::Ok)
                .map(|r| r.elapsed_secs)
                .collect();
            Stats::from_secs(&totals)
        } else {
            None
        };

        let failures = self.records.iter().filter(|r| !r.status.is_success()).count();
        let mut errors: Vec<String> = Vec::new();
        for r in self.records.iter().filter(|r| !r.status.is_success()) {
            if let Some(e) = &r.error {
                if !errors.contains(e) {
                    errors.push(e.clone());
                }
            }
        }

        let load_init_secs = Stats::from_durations(&self.load_inits).map(|s| s.mean_secs);

        let mut row_counts: Vec<u64> = self
            .records
            .iter()
            .filter(|r| r.status == TrialStatus::Ok)
            .filter_map(|r| r.row_count)
            .collect();
        row_counts.sort_unstable();
        row_counts.dedup();
        if row_counts.len() > 1 {
            warn!(
                engine = %self.engine,
                query = %self.query,
                counts = ?row_counts,
                "trials returned different row counts"
            );
        }

        let summary = PlanSummary {
            engine: self.engine,
            dataset_size: self.dataset_size.clone(),
            query: self.query.clone(),
            mode: self.mode,
            trials: self.trials,
            clean,
            flagged,
            total,
            failures,
            load_init_secs,
            baseline_secs: self.baseline.map(|d| d.as_secs_f64()),
            block_secs: self.block_secs,
            amortized_query_secs: self.amortized_secs,
            row_counts,
            gpu_before: self.gpu_before,
            gpu_after: self.gpu_after,
            errors,
        };
        info!(
            engine = %summary.engine,
            query = %summary.query,
            mode = %summary.mode,
            mean_secs = summary.clean.map(|s| s.mean_secs),
            failures,
            "plan finished"
        );
        PlanResult {
            records: self.records,
            summary,
        }
    }
}
