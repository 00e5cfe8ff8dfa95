//! From controller results to saved reports and a CPU/GPU pairing.

mod common;

use std::time::Duration;

use hop_benchmarks::channel::{ProcessOutput, ScriptRunner};
use hop_benchmarks::compare::{pair_summaries, Pairing};
use hop_benchmarks::controller::{BenchmarkController, ControllerOptions, Plan};
use hop_benchmarks::protocol::InitScript;
use hop_benchmarks::query::QueryDef;
use hop_benchmarks::recorder::{load_report, ResultRecorder};
use hop_benchmarks::schema::{EngineKind, TimingMode, TrialRecord};
use hop_benchmarks::Result;

/// Deterministic runner: `init_ms` per script plus `query_ms` per labelled
/// command, `rows` result rows per command.
struct Timed {
    init_ms: u64,
    query_ms: u64,
    marker: Option<&'static str>,
    rows: usize,
}

impl ScriptRunner for Timed {
    fn run(&mut self, script: &str, _timeout: Duration) -> Result<ProcessOutput> {
        let queries = script.lines().filter(|l| l.starts_with(".print")).count() as u64;
        let mut stdout = String::new();
        for line in script.lines() {
            if let Some(label) = line.strip_prefix(".print '").and_then(|l| l.strip_suffix('\'')) {
                stdout.push_str(label);
                stdout.push('\n');
                if let Some(m) = self.marker {
                    stdout.push_str(m);
                    stdout.push('\n');
                }
                for row in 0..self.rows {
                    stdout.push_str(&format!("{}\n", row));
                }
            }
        }
        Ok(ProcessOutput {
            stdout,
            stderr: String::new(),
            code: Some(0),
            elapsed: Duration::from_millis(self.init_ms + queries * self.query_ms),
        })
    }
}

fn run(engine: EngineKind, query_ms: u64, marker: Option<&'static str>) -> hop_benchmarks::PlanResult {
    run_with_rows(engine, query_ms, marker, 2)
}

fn run_with_rows(
    engine: EngineKind,
    query_ms: u64,
    marker: Option<&'static str>,
    rows: usize,
) -> hop_benchmarks::PlanResult {
    let mut c = BenchmarkController::new(
        move |_| Timed {
            init_ms: 100,
            query_ms,
            marker,
            rows,
        },
        common::matcher(),
        ControllerOptions::default(),
    );
    let plan = Plan {
        engine,
        dataset_size: "1m".into(),
        query: QueryDef::new("two_hop", "SELECT 1"),
        mode: TimingMode::WarmSingleSession,
        trials: 3,
    };
    let init = InitScript::from_lines(vec!["CREATE TABLE nodes AS SELECT 1;".into()]);
    c.run_plan(&plan, &init).unwrap()
}

#[test]
fn warm_plans_pair_into_speedup() {
    let cpu = run(EngineKind::Cpu, 400, None);
    let gpu = run(EngineKind::Gpu, 100, None);

    // Each trial replays warm-up + query, so query time is one query_ms.
    for r in &cpu.records {
        assert!((r.query_secs.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(r.row_count, Some(2));
    }

    let comparisons = pair_summaries([&cpu.summary, &gpu.summary]);
    assert_eq!(comparisons.len(), 1);
    let speedup = comparisons[0].speedup().unwrap();
    assert!((speedup - 4.0).abs() < 1e-9);
}

#[test]
fn flagged_gpu_plan_is_not_comparable() {
    let cpu = run(EngineKind::Cpu, 400, None);
    let gpu = run(EngineKind::Gpu, 100, Some(common::MARKER));
    let comparisons = pair_summaries([&cpu.summary, &gpu.summary]);
    assert!(matches!(comparisons[0].pairing, Pairing::NotComparable { .. }));
}

#[test]
fn engines_disagreeing_on_rows_are_not_comparable() {
    let cpu = run_with_rows(EngineKind::Cpu, 400, None, 3);
    let gpu = run_with_rows(EngineKind::Gpu, 100, None, 2);
    assert_eq!(cpu.summary.row_counts, vec![3]);
    assert_eq!(gpu.summary.row_counts, vec![2]);

    let comparisons = pair_summaries([&cpu.summary, &gpu.summary]);
    assert_eq!(
        comparisons[0].pairing,
        Pairing::NotComparable {
            reason: "row count mismatch cpu=3 gpu=2".into()
        }
    );
}

#[test]
fn saved_report_round_trips_through_compare() {
    let dir = tempfile::tempdir().unwrap();
    let mut rec = ResultRecorder::new("hop-bench", dir.path());
    for (engine, ms) in [(EngineKind::Cpu, 300), (EngineKind::Gpu, 150)] {
        let result = run(engine, ms, None);
        rec.record_plan(result.records, result.summary);
    }
    let saved = rec.save().unwrap();

    let report = load_report(&saved.json).unwrap();
    assert_eq!(report.trials.len(), 6);
    assert_eq!(report.summaries.len(), 2);
    let speedup = pair_summaries(&report.summaries)[0].speedup().unwrap();
    assert!((speedup - 2.0).abs() < 1e-9);

    let csv = std::fs::read_to_string(&saved.csv).unwrap();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some(TrialRecord::CSV_HEADER));
    assert_eq!(lines.count(), 6);
}
