//! Iterative multi-source BFS against a live engine session.
//!
//! Loads one dataset size into a long-lived engine process, then expands the
//! frontier one hop per command until convergence, the hop limit, or a failure.
//! A report is saved even when the engine fails to start; only a missing
//! binary exits without one.
//!
//! Usage:
//!   cargo run --release --bin hop-bfs -- --size 1m
//!   cargo run --release --bin hop-bfs -- --engine cpu --size 10k --validate
//!   cargo run --release --bin hop-bfs -- --size 5m --max-hops 6 --frontier-ceiling 50000

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hop_benchmarks::bfs::{BfsReport, IterativeBfs, Termination};
use hop_benchmarks::compare::format_secs;
use hop_benchmarks::config::BenchConfig;
use hop_benchmarks::dataset::{validate_distances, DatasetPaths, Graph};
use hop_benchmarks::fallback::SubstringMatcher;
use hop_benchmarks::protocol::InitScript;
use hop_benchmarks::recorder::ResultRecorder;
use hop_benchmarks::schema::EngineKind;
use hop_benchmarks::session::PipedOptions;

#[derive(Parser, Debug)]
#[command(name = "hop-bfs")]
#[command(about = "Engine-driven iterative BFS from all seed-labelled nodes")]
struct Args {
    /// JSON configuration file; flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value = "gpu")]
    engine: EngineKind,

    /// Dataset size label.
    #[arg(long, default_value = "10k")]
    size: String,

    /// Engine binary (overrides the configured one for --engine).
    #[arg(long)]
    binary: Option<PathBuf>,

    #[arg(long)]
    data_dir: Option<PathBuf>,

    #[arg(long)]
    results_dir: Option<PathBuf>,

    #[arg(long)]
    seed_label: Option<String>,

    #[arg(long)]
    max_hops: Option<u32>,

    #[arg(long)]
    frontier_ceiling: Option<usize>,

    /// Settle interval before reading each hop's result file, in ms.
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Check distances against an in-memory reference BFS.
    #[arg(long)]
    validate: bool,

    /// Skip writing the JSON report.
    #[arg(long)]
    no_save: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    let engine = args.engine;
    let binary = config.binary(engine).to_path_buf();

    let paths = DatasetPaths::for_size(&config.data_dir, &args.size)
        .check()
        .with_context(|| format!("dataset {} not available", args.size))?;

    eprintln!("=== Iterative BFS ===");
    eprintln!("Engine:    {} ({})", engine, binary.display());
    eprintln!("Dataset:   {}", args.size);
    eprintln!("Seeds:     label = '{}'", config.bfs.seed_label);
    eprintln!("Max hops:  {}", config.bfs.max_hops);
    eprintln!("Ceiling:   {}", config.bfs.frontier_ceiling);
    eprintln!();

    let recorder = ResultRecorder::new("hop-bfs", &config.results_dir);

    let init = InitScript::new(engine, &paths.nodes, &paths.edges, &config.buffer_for(&args.size));
    let options = PipedOptions {
        startup_timeout: config.timeouts.startup(),
        settle: config.timeouts.settle(),
        poll: config.timeouts.poll(),
        close_grace: config.timeouts.close_grace(),
    };
    let matcher = Arc::new(SubstringMatcher::new(config.fallback_markers.iter()));

    let bfs = IterativeBfs::new(config.bfs.clone());
    eprintln!("Starting engine, loading tables and searching...");
    let run = bfs
        .run_on_engine(&binary, &init, matcher, options, config.schema.clone(), config.timeouts.hop())
        .context("engine binary not available")?;
    let startup = run.startup;
    let outcome = run.outcome;
    eprintln!();
    eprintln!("--- Distance distribution ---");
    eprintln!("  {:>8}  {:>12}", "distance", "nodes");
    for (d, n) in &outcome.distance_counts {
        eprintln!("  {:>8}  {:>12}", d, n);
    }
    eprintln!();
    eprintln!("--- Per-hop timing ---");
    eprintln!(
        "  {:>4}  {:>10}  {:>10}  {:>10}  {:>12}",
        "hop", "frontier", "returned", "new", "latency"
    );
    for h in &outcome.hops {
        eprintln!(
            "  {:>4}  {:>10}  {:>10}  {:>10}  {:>12}{}{}",
            h.hop,
            h.frontier,
            h.returned,
            h.new_nodes,
            format_secs(h.elapsed_secs),
            if h.degraded { "  (artifact missing)" } else { "" },
            if h.fallbacks > 0 { "  (FALLBACK)" } else { "" },
        );
    }
    eprintln!();
    eprintln!("Visited:      {}", outcome.total_visited());
    eprintln!("Max distance: {}", outcome.max_distance());
    eprintln!("Startup:      {}", format_secs(startup.as_secs_f64()));
    eprintln!("Expansion:    {}", format_secs(outcome.expansion_time().as_secs_f64()));
    eprintln!("BFS total:    {}", format_secs(outcome.elapsed.as_secs_f64()));
    match &outcome.termination {
        Termination::Converged { distance } => eprintln!("Stopped:      converged after distance {}", distance),
        Termination::HopLimit { max_hops } => eprintln!("Stopped:      hop limit {} reached", max_hops),
        Termination::EmptyFrontier => eprintln!("Stopped:      no seed nodes"),
        Termination::Failed { hop, kind, error } => {
            eprintln!("Stopped:      EARLY at hop {} ({}): {}", hop, kind, error)
        }
        Termination::StartupFailed { kind, error } => {
            eprintln!("Stopped:      engine did not start ({}): {}", kind, error)
        }
    }
    for t in &outcome.truncations {
        eprintln!(
            "Truncated:    hop {} frontier {} -> {} (lowest ids kept; distances past this are approximate)",
            t.hop, t.original, t.kept
        );
    }
    if outcome.degraded() {
        eprintln!("WARNING:      some result artifacts were missing or unreadable");
    }

    let mut report = BfsReport::new(
        recorder.metadata().clone(),
        engine,
        &args.size,
        bfs.settings(),
        startup,
        &outcome,
    );

    let startup_failed = matches!(outcome.termination, Termination::StartupFailed { .. });
    if args.validate && !startup_failed {
        eprintln!();
        eprint!("Loading reference graph...");
        let graph = Graph::load(&paths, &config.schema).context("failed to load reference graph")?;
        eprintln!(" done ({} nodes, {} edges)", graph.node_count(), graph.edge_count());
        let reference = graph.reference_distances(&config.bfs.seed_label, config.bfs.max_hops);
        let validation = validate_distances(outcome.distances(), &reference);
        if validation.pass {
            eprintln!("Validation: PASS ({} nodes checked)", reference.len());
        } else {
            eprintln!(
                "Validation: FAIL ({} mismatches out of {} reachable nodes)",
                validation.mismatches,
                reference.len()
            );
            for detail in &validation.details {
                eprintln!("  {}", detail);
            }
        }
        report.validation = Some(validation);
    }

    if !args.no_save {
        let path = recorder.save_json(&report).context("failed to save BFS report")?;
        info!(path = %path.display(), "report saved");
        eprintln!("Results saved to {}", path.display());
    }
    if let Termination::StartupFailed { error, .. } = &outcome.termination {
        anyhow::bail!("engine session failed to start: {}", error);
    }
    eprintln!("=== BFS complete ===");
    Ok(())
}

fn build_config(args: &Args) -> anyhow::Result<BenchConfig> {
    let mut config = BenchConfig::load_or_default(args.config.as_deref())
        .with_context(|| format!("failed to load config {:?}", args.config))?;
    if let Some(p) = &args.binary {
        match args.engine {
            EngineKind::Cpu => config.cpu_binary = p.clone(),
            EngineKind::Gpu => config.gpu_binary = p.clone(),
        }
    }
    if let Some(p) = &args.data_dir {
        config.data_dir = p.clone();
    }
    if let Some(p) = &args.results_dir {
        config.results_dir = p.clone();
    }
    if let Some(label) = &args.seed_label {
        config.bfs.seed_label = label.clone();
    }
    if let Some(n) = args.max_hops {
        config.bfs.max_hops = n;
    }
    if let Some(n) = args.frontier_ceiling {
        config.bfs.frontier_ceiling = n;
    }
    if let Some(ms) = args.settle_ms {
        config.timeouts.settle_ms = ms;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}
