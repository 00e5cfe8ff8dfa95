//! Timed query benchmarks across engines, dataset sizes and queries.
//!
//! Usage:
//!   cargo run --release --bin hop-bench -- --query 2_hop --size 10k --size 1m --mode warm
//!   cargo run --release --bin hop-bench -- --query 3_hop --engine gpu --mode persistent --trials 10
//!   cargo run --release --bin hop-bench -- --config bench.json --query 2_hop --csv
//!
//! Writes `<results_dir>/<category>-<timestamp>-<commit>.{json,csv}`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hop_benchmarks::channel::BatchTransport;
use hop_benchmarks::compare::{format_secs, pair_summaries, Pairing};
use hop_benchmarks::config::BenchConfig;
use hop_benchmarks::controller::{BenchmarkController, ControllerOptions, Plan};
use hop_benchmarks::dataset::DatasetPaths;
use hop_benchmarks::fallback::SubstringMatcher;
use hop_benchmarks::protocol::InitScript;
use hop_benchmarks::query::QueryDef;
use hop_benchmarks::recorder::ResultRecorder;
use hop_benchmarks::schema::{EngineKind, PlanSummary, TimingMode, TrialRecord};

#[derive(Parser, Debug)]
#[command(name = "hop-bench")]
#[command(about = "CPU vs GPU query benchmarks over session-driven engine processes")]
struct Args {
    /// JSON configuration file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Query name, resolved to <query_dir>/<dialect>/<name>.sql. Repeatable.
    #[arg(long = "query", required = true)]
    queries: Vec<String>,

    /// Dataset size label. Repeatable.
    #[arg(long = "size", default_value = "10k")]
    sizes: Vec<String>,

    /// Engine (cpu or gpu). Repeatable. Default: both.
    #[arg(long = "engine")]
    engines: Vec<EngineKind>,

    /// Timing mode: fresh, warm or persistent.
    #[arg(long, default_value = "warm")]
    mode: TimingMode,

    /// Trials per plan (queries per block in persistent mode).
    #[arg(long, default_value_t = 5)]
    trials: usize,

    #[arg(long)]
    cpu_binary: Option<PathBuf>,

    #[arg(long)]
    gpu_binary: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    query_dir: Option<PathBuf>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    /// Emit engine timer output and attach engine-reported times.
    #[arg(long)]
    engine_timer: bool,

    /// Result file prefix.
    #[arg(long, default_value = "hop-bench")]
    category: String,

    /// Print one CSV row per trial to stdout.
    #[arg(long)]
    csv: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let engines = if args.engines.is_empty() {
        EngineKind::ALL.to_vec()
    } else {
        args.engines.clone()
    };

    if !args.csv {
        eprintln!("=== Engine Query Benchmark ===");
        eprintln!("Engines:  {}", join(&engines));
        eprintln!("Sizes:    {}", args.sizes.join(", "));
        eprintln!("Queries:  {}", args.queries.join(", "));
        eprintln!("Mode:     {}", args.mode);
        eprintln!("Trials:   {}", args.trials);
        eprintln!();
    }

    let matcher = Arc::new(SubstringMatcher::new(config.fallback_markers.iter()));
    let options = ControllerOptions {
        startup_timeout: config.timeouts.startup(),
        trial_timeout: config.timeouts.trial(),
        engine_timer: config.engine_timer,
    };
    let cpu_binary = config.cpu_binary.clone();
    let gpu_binary = config.gpu_binary.clone();
    let poll = config.timeouts.poll().min(std::time::Duration::from_millis(5));
    let mut controller = BenchmarkController::new(
        move |engine| {
            let binary = match engine {
                EngineKind::Cpu => cpu_binary.clone(),
                EngineKind::Gpu => gpu_binary.clone(),
            };
            BatchTransport::new(binary).with_poll(poll)
        },
        matcher,
        options,
    );

    let mut recorder = ResultRecorder::new(&args.category, &config.results_dir);
    let mut fatal = None;
    if args.csv {
        println!("{}", TrialRecord::CSV_HEADER);
    }

    'sizes: for size in &args.sizes {
        let paths = match DatasetPaths::for_size(&config.data_dir, size).check() {
            Ok(p) => p,
            Err(e) => {
                warn!(size = %size, error = %e, "skipping dataset size");
                continue;
            }
        };

        for &engine in &engines {
            let buffer = config.buffer_for(size);
            let init = InitScript::new(engine, &paths.nodes, &paths.edges, &buffer);

            for name in &args.queries {
                let query = match QueryDef::load(&config.query_dir, engine, name) {
                    Ok(q) => q,
                    Err(e) => {
                        warn!(engine = %engine, query = %name, error = %e, "skipping query");
                        continue;
                    }
                };
                let plan = Plan {
                    engine,
                    dataset_size: size.clone(),
                    query,
                    mode: args.mode,
                    trials: args.trials,
                };

                match controller.run_plan(&plan, &init) {
                    Ok(result) => {
                        if args.csv {
                            for r in &result.records {
                                println!("{}", r.to_csv_row());
                            }
                        } else {
                            print_summary(&result.summary);
                        }
                        recorder.record_plan(result.records, result.summary);
                    }
                    Err(e) => {
                        // Only a missing binary gets here; keep what was measured.
                        eprintln!("Aborting: {}", e);
                        fatal = Some(e);
                        break 'sizes;
                    }
                }
            }
        }
    }

    if !args.csv {
        print_comparisons(recorder.summaries());
    }
    let saved = recorder.save().context("failed to save results")?;
    info!(json = %saved.json.display(), csv = %saved.csv.display(), "done");
    if let Some(e) = fatal {
        return Err(anyhow::Error::new(e).context("benchmark run aborted"));
    }
    if !args.csv {
        eprintln!("=== Benchmark complete ===");
    }
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<BenchConfig> {
    let mut config = BenchConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", args.config))?;
    if let Some(p) = &args.cpu_binary {
        config.cpu_binary = p.clone();
    }
    if let Some(p) = &args.gpu_binary {
        config.gpu_binary = p.clone();
    }
    if let Some(p) = &args.data_dir {
        config.data_dir = p.clone();
    }
    if let Some(p) = &args.query_dir {
        config.query_dir = p.clone();
    }
    if let Some(p) = &args.results_dir {
        config.results_dir = p.clone();
    }
    if args.engine_timer {
        config.engine_timer = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn join(engines: &[EngineKind]) -> String {
    engines.iter().map(|e| e.label()).collect::<Vec<_>>().join(", ")
}

fn print_summary(s: &PlanSummary) {
    eprintln!(
        "--- {} / {} / {} / {} ({} trials) ---",
        s.engine, s.dataset_size, s.query, s.mode, s.trials
    );
    if let Some(load) = s.load_init_secs {
        eprintln!("  load+init:  {}", format_secs(load));
    }
    if let Some(total) = &s.total {
        eprintln!(
            "  total:      avg {}  min {}  max {}",
            format_secs(total.mean_secs),
            format_secs(total.min_secs),
            format_secs(total.max_secs)
        );
    }
    match &s.clean {
        Some(c) => eprintln!(
            "  query:      avg {}  min {}  max {}  ({} clean)",
            format_secs(c.mean_secs),
            format_secs(c.min_secs),
            format_secs(c.max_secs),
            c.samples
        ),
        None => eprintln!("  query:      no clean samples"),
    }
    if !s.row_counts.is_empty() {
        let counts: Vec<String> = s.row_counts.iter().map(u64::to_string).collect();
        eprintln!("  rows:       {}", counts.join(" / "));
    }
    if let (Some(before), Some(after)) = (&s.gpu_before, &s.gpu_after) {
        eprintln!(
            "  gpu mem:    {:.0} -> {:.0} MB of {:.0} MB (util {}% -> {}%)",
            before.memory_used_mb,
            after.memory_used_mb,
            after.memory_total_mb,
            before.utilization_percent,
            after.utilization_percent
        );
    }
    if let (Some(block), Some(per)) = (s.block_secs, s.amortized_query_secs) {
        eprintln!(
            "  block:      {}  amortized {} per query (block / N, not measured)",
            format_secs(block),
            format_secs(per)
        );
    }
    if let Some(f) = &s.flagged {
        eprintln!(
            "  FALLBACK:   {} trial(s) hit the slow path, avg {} (excluded from comparison)",
            f.samples,
            format_secs(f.mean_secs)
        );
    }
    if s.failures > 0 {
        eprintln!("  failures:   {}", s.failures);
        for e in &s.errors {
            eprintln!("    {}", e);
        }
    }
    eprintln!();
}

fn print_comparisons(summaries: &[PlanSummary]) {
    let comparisons = pair_summaries(summaries);
    if comparisons.is_empty() {
        return;
    }
    eprintln!("--- CPU vs GPU ---");
    eprintln!(
        "  {:<8} {:<20} {:<11} {:>12} {:>12} {:>9}",
        "size", "query", "mode", "cpu", "gpu", "speedup"
    );
    for c in &comparisons {
        match &c.pairing {
            Pairing::Comparable {
                cpu_mean_secs,
                gpu_mean_secs,
                speedup,
            } => eprintln!(
                "  {:<8} {:<20} {:<11} {:>12} {:>12} {:>8.2}x",
                c.key.dataset_size,
                c.key.query,
                c.key.mode,
                format_secs(*cpu_mean_secs),
                format_secs(*gpu_mean_secs),
                speedup
            ),
            Pairing::NotComparable { reason } => eprintln!(
                "  {:<8} {:<20} {:<11} not comparable: {}",
                c.key.dataset_size, c.key.query, c.key.mode, reason
            ),
        }
    }
    eprintln!();
}
