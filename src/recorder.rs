//! Result recorder for saving benchmark runs.
//!
//! Writes `<results_dir>/<category>-<timestamp>-<commit>.json` (a [`RunReport`])
//! and a CSV of the trial log next to it with the same stem.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tracing::info;

use crate::error::{BenchError, Result};
use crate::gpu;
use crate::schema::{HardwareInfo, PlanSummary, RunMetadata, RunReport, TrialLog, TrialRecord};

pub const SCHEMA_VERSION: u32 = 1;

/// Paths written by [`ResultRecorder::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResults {
    pub json: PathBuf,
    pub csv: PathBuf,
}

/// Accumulates trial records and plan summaries for one run.
pub struct ResultRecorder {
    category: String,
    results_dir: PathBuf,
    metadata: RunMetadata,
    log: TrialLog,
    summaries: Vec<PlanSummary>,
}

impl ResultRecorder {
    /// Captures metadata (hardware, git, timestamp) at construction time.
    pub fn new(category: &str, results_dir: impl Into<PathBuf>) -> Self {
        Self::with_metadata(category, results_dir, capture_metadata())
    }

    pub fn with_metadata(category: &str, results_dir: impl Into<PathBuf>, metadata: RunMetadata) -> Self {
        Self {
            category: category.to_string(),
            results_dir: results_dir.into(),
            metadata,
            log: TrialLog::new(),
            summaries: Vec::new(),
        }
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    pub fn record(&mut self, record: TrialRecord) {
        self.log.push(record);
    }

    pub fn record_plan(&mut self, records: Vec<TrialRecord>, summary: PlanSummary) {
        self.log.extend(records);
        self.summaries.push(summary);
    }

    pub fn log(&self) -> &TrialLog {
        &self.log
    }

    pub fn summaries(&self) -> &[PlanSummary] {
        &self.summaries
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            schema_version: SCHEMA_VERSION,
            metadata: self.metadata.clone(),
            trials: self.log.records().to_vec(),
            summaries: self.summaries.clone(),
        }
    }

    /// `<category>-<timestamp>-<commit>`
    fn stem(&self) -> String {
        let commit = self.metadata.git_commit.as_deref().unwrap_or("unknown");
        // Colons are not portable in file names.
        let ts = self.metadata.timestamp.replace(':', "-");
        format!("{}-{}-{}", self.category, ts, commit)
    }

    /// Write the JSON report and the CSV trial log.
    pub fn save(&self) -> Result<SavedResults> {
        let json_path = self.save_json(&self.report())?;
        let csv_path = self.results_dir.join(format!("{}.csv", self.stem()));
        fs::write(&csv_path, self.log.to_csv())?;

        info!(json = %json_path.display(), csv = %csv_path.display(), "results saved");
        eprintln!("Results saved to {}", json_path.display());
        Ok(SavedResults {
            json: json_path,
            csv: csv_path,
        })
    }

    /// Write any serializable report under the recorder's naming scheme.
    pub fn save_json<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        fs::create_dir_all(&self.results_dir)?;
        let path = self.results_dir.join(format!("{}.json", self.stem()));
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| BenchError::Config(format!("failed to serialize report: {}", e)))?;
        fs::write(&path, json)?;
        Ok(path)
    }
}

/// Load a report written by [`ResultRecorder::save`].
pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents = fs::read_to_string(path)
        .map_err(|e| BenchError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| BenchError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

// ---------------------------------------------------------------------------
// Metadata capture helpers
// ---------------------------------------------------------------------------

pub fn capture_metadata() -> RunMetadata {
    RunMetadata {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        git_commit: git_short_commit(),
        git_branch: git_branch(),
        git_dirty: git_is_dirty(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        hardware: capture_hardware(),
    }
}

fn git(args: &[&str]) -> Option<Vec<u8>> {
    std::process::Command::new("git")
        .args(args)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| o.stdout)
}

fn git_short_commit() -> Option<String> {
    git(&["rev-parse", "--short", "HEAD"]).map(|o| String::from_utf8_lossy(&o).trim().to_string())
}

fn git_branch() -> Option<String> {
    git(&["rev-parse", "--abbrev-ref", "HEAD"]).map(|o| String::from_utf8_lossy(&o).trim().to_string())
}

fn git_is_dirty() -> Option<bool> {
    git(&["status", "--porcelain"]).map(|o| !o.is_empty())
}

fn capture_hardware() -> HardwareInfo {
    HardwareInfo {
        cpu: read_cpu_model(),
        cores: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(0),
        ram_gb: read_total_ram_gb(),
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        gpu: gpu::device_name(),
    }
}

fn read_cpu_model() -> String {
    fs::read_to_string("/proc/cpuinfo")
        .ok()
        .and_then(|s| cpu_model_from(&s))
        .unwrap_or_else(|| "unknown".to_string())
}

fn cpu_model_from(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .find(|l| l.starts_with("model name"))
        .and_then(|l| l.split_once(':'))
        .map(|(_, v)| v.trim().to_string())
}

fn read_total_ram_gb() -> u64 {
    fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|s| ram_gb_from(&s))
        .unwrap_or(0)
}

/// `MemTotal:       65838092 kB` -> 62
fn ram_gb_from(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024 * 1024))
}
