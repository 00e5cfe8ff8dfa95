//! CPU vs GPU comparison tool.
//!
//! Loads one or more JSON reports written by `hop-bench`, pairs CPU and GPU
//! plans by (size, query, mode) and prints a speedup table. Pairs where either
//! side only has fallback-flagged or failed trials are listed as not comparable.
//!
//! Usage: `cargo run --bin bench-compare -- <report.json> [<report.json> ...]`

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use hop_benchmarks::compare::{format_secs, pair_summaries, Pairing};
use hop_benchmarks::recorder::load_report;
use hop_benchmarks::schema::PlanSummary;

#[derive(Parser, Debug)]
#[command(name = "bench-compare")]
#[command(about = "Pair CPU and GPU results from hop-bench reports")]
struct Args {
    /// Report files; later files override earlier ones for the same plan.
    #[arg(required = true)]
    reports: Vec<PathBuf>,

    /// Print the pairing as CSV instead of a table.
    #[arg(long)]
    csv: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut summaries: Vec<PlanSummary> = Vec::new();
    for path in &args.reports {
        let report = load_report(path).with_context(|| format!("cannot load {}", path.display()))?;
        eprintln!(
            "Report: {} ({}, {} plans)",
            path.display(),
            report.metadata.timestamp,
            report.summaries.len()
        );
        summaries.extend(report.summaries);
    }
    eprintln!();

    let comparisons = pair_summaries(&summaries);

    if args.csv {
        println!("dataset_size,query,mode,cpu_mean_secs,gpu_mean_secs,speedup,note");
        for c in &comparisons {
            match &c.pairing {
                Pairing::Comparable {
                    cpu_mean_secs,
                    gpu_mean_secs,
                    speedup,
                } => println!(
                    "{},{},{},{:.6},{:.6},{:.3},",
                    c.key.dataset_size, c.key.query, c.key.mode, cpu_mean_secs, gpu_mean_secs, speedup
                ),
                Pairing::NotComparable { reason } => println!(
                    "{},{},{},,,,{}",
                    c.key.dataset_size, c.key.query, c.key.mode, reason
                ),
            }
        }
        return Ok(());
    }

    println!(
        "{:<8} | {:<24} | {:<10} | {:>12} | {:>12} | {:>10}",
        "Size", "Query", "Mode", "CPU", "GPU", "Speedup"
    );
    println!("{}", "-".repeat(92));

    let mut compared = 0u32;
    let mut skipped = 0u32;
    for c in &comparisons {
        match &c.pairing {
            Pairing::Comparable {
                cpu_mean_secs,
                gpu_mean_secs,
                speedup,
            } => {
                compared += 1;
                let hint = if *speedup > 1.01 {
                    "gpu faster"
                } else if *speedup < 0.99 {
                    "cpu faster"
                } else {
                    "~same"
                };
                println!(
                    "{:<8} | {:<24} | {:<10} | {:>12} | {:>12} | {:>9.2}x ({})",
                    c.key.dataset_size,
                    c.key.query,
                    c.key.mode,
                    format_secs(*cpu_mean_secs),
                    format_secs(*gpu_mean_secs),
                    speedup,
                    hint,
                );
            }
            Pairing::NotComparable { reason } => {
                skipped += 1;
                println!(
                    "{:<8} | {:<24} | {:<10} | not comparable: {}",
                    c.key.dataset_size, c.key.query, c.key.mode, reason
                );
            }
        }
    }

    println!("{}", "-".repeat(92));
    println!("Compared: {} | Not comparable: {}", compared, skipped);
    Ok(())
}
