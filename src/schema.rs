//! Shared result types.
//!
//! Both engines produce records in this one schema so CPU and GPU runs can be
//! placed side by side without per-engine adapters.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::gpu::GpuStats;

/// Which engine a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// CPU analytical engine (baseline).
    Cpu,
    /// GPU-accelerated fork of the same engine.
    Gpu,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Cpu, EngineKind::Gpu];

    pub fn label(self) -> &'static str {
        match self {
            EngineKind::Cpu => "cpu",
            EngineKind::Gpu => "gpu",
        }
    }

    /// Subdirectory of the query directory holding this engine's query texts.
    pub fn query_dialect(self) -> &'static str {
        match self {
            EngineKind::Cpu => "duckdb",
            EngineKind::Gpu => "sirius",
        }
    }

    pub fn accelerated(self) -> bool {
        matches!(self, EngineKind::Gpu)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "duckdb" => Ok(EngineKind::Cpu),
            "gpu" | "sirius" => Ok(EngineKind::Gpu),
            other => Err(format!("unknown engine '{}' (expected cpu or gpu)", other)),
        }
    }
}

/// Timing mode of a benchmark plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// New process per trial; reports combined load+init+query time.
    FreshPerTrial,
    /// One session, one discarded warm-up, N timed trials.
    WarmSingleSession,
    /// One session, one discarded warm-up, one block of N back-to-back queries.
    /// Per-query time is amortized (block / N), not measured.
    PersistentSession,
}

impl TimingMode {
    pub const ALL: [TimingMode; 3] = [
        TimingMode::FreshPerTrial,
        TimingMode::WarmSingleSession,
        TimingMode::PersistentSession,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimingMode::FreshPerTrial => "fresh",
            TimingMode::WarmSingleSession => "warm",
            TimingMode::PersistentSession => "persistent",
        }
    }
}

impl fmt::Display for TimingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for TimingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fresh" | "fresh_per_trial" => Ok(TimingMode::FreshPerTrial),
            "warm" | "warm_cache" | "warm_single_session" => Ok(TimingMode::WarmSingleSession),
            "persistent" | "persistent_session" => Ok(TimingMode::PersistentSession),
            other => Err(format!(
                "unknown mode '{}' (expected fresh, warm or persistent)",
                other
            )),
        }
    }
}

/// Outcome of one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Ok,
    /// Completed, but the engine reported a fallback to its slow path.
    Fallback,
    Failed,
    TimedOut,
}

impl TrialStatus {
    pub fn label(self) -> &'static str {
        match self {
            TrialStatus::Ok => "ok",
            TrialStatus::Fallback => "fallback",
            TrialStatus::Failed => "failed",
            TrialStatus::TimedOut => "timed_out",
        }
    }

    /// Produced timing numbers (flagged or not).
    pub fn is_success(self) -> bool {
        matches!(self, TrialStatus::Ok | TrialStatus::Fallback)
    }
}

/// One measurement sample. Immutable once pushed into a [`TrialLog`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub engine: EngineKind,
    pub dataset_size: String,
    pub query: String,
    pub mode: TimingMode,
    /// 1-based trial index within its plan.
    pub trial: usize,
    /// Number of queries this sample covers (N for a persistent block, else 1).
    pub queries: usize,
    /// Wall time of the process run that produced this sample.
    pub elapsed_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub load_init_secs: Option<f64>,
    /// Per-query time. Amortized when `queries > 1`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub query_secs: Option<f64>,
    /// Per-query time as reported by the engine's own timer, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub reported_query_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub row_count: Option<u64>,
    #[serde(default)]
    pub fallback_count: usize,
    pub status: TrialStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub error: Option<String>,
}

impl TrialRecord {
    pub const CSV_HEADER: &'static str = "engine,dataset_size,query,mode,trial,queries,elapsed_secs,load_init_secs,query_secs,reported_query_secs,row_count,fallback_count,status,error";

    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{:.6},{},{},{},{},{},{},{}",
            self.engine,
            csv_field(&self.dataset_size),
            csv_field(&self.query),
            self.mode,
            self.trial,
            self.queries,
            self.elapsed_secs,
            opt_secs(self.load_init_secs),
            opt_secs(self.query_secs),
            opt_secs(self.reported_query_secs),
            self.row_count.map(|n| n.to_string()).unwrap_or_default(),
            self.fallback_count,
            self.status.label(),
            self.error.as_deref().map(csv_field).unwrap_or_default(),
        )
    }
}

fn opt_secs(v: Option<f64>) -> String {
    v.map(|s| format!("{:.6}", s)).unwrap_or_default()
}

/// Quote a field when it contains a delimiter, quote or newline.
pub fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Append-only sequence of trial records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrialLog {
    records: Vec<TrialRecord>,
}

impl TrialLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: TrialRecord) {
        self.records.push(record);
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = TrialRecord>) {
        self.records.extend(records);
    }

    pub fn records(&self) -> &[TrialRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::with_capacity(64 * (self.records.len() + 1));
        out.push_str(TrialRecord::CSV_HEADER);
        out.push('\n');
        for r in &self.records {
            out.push_str(&r.to_csv_row());
            out.push('\n');
        }
        out
    }
}

/// Mean/min/max over a set of durations, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mean_secs: f64,
    pub min_secs: f64,
    pub max_secs: f64,
    pub samples: usize,
}

impl Stats {
    /// `None` for an empty input.
    pub fn from_secs(values: &[f64]) -> Option<Stats> {
        if values.is_empty() {
            return None;
        }
        let sum: f64 = values.iter().sum();
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Stats {
            mean_secs: sum / values.len() as f64,
            min_secs: min,
            max_secs: max,
            samples: values.len(),
        })
    }

    pub fn from_durations(values: &[Duration]) -> Option<Stats> {
        let secs: Vec<f64> = values.iter().map(Duration::as_secs_f64).collect();
        Self::from_secs(&secs)
    }
}

/// Aggregate view of one plan (engine × size × query × mode).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub engine: EngineKind,
    pub dataset_size: String,
    pub query: String,
    pub mode: TimingMode,
    pub trials: usize,
    /// Per-query time over successful, unflagged trials.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub clean: Option<Stats>,
    /// Per-query time over successful trials that hit the fallback path.
    /// Never merged with `clean`.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub flagged: Option<Stats>,
    /// Combined load+init+query time (fresh mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub total: Option<Stats>,
    pub failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub load_init_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub baseline_secs: Option<f64>,
    /// Persistent mode: wall time of the query block with the baseline removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub block_secs: Option<f64>,
    /// Persistent mode: `block_secs / trials`. An average, not a per-query measurement.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub amortized_query_secs: Option<f64>,
    /// Distinct row counts returned by clean trials, ascending. A plan whose
    /// trials disagree lists every count seen.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub row_counts: Vec<u64>,
    /// Device 0 before and after the plan (accelerated engines, `nvml` builds).
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub gpu_before: Option<GpuStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub gpu_after: Option<GpuStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Top-level report written to a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version for forward compatibility.
    pub schema_version: u32,
    pub metadata: RunMetadata,
    pub trials: Vec<TrialRecord>,
    pub summaries: Vec<PlanSummary>,
}

/// Metadata captured at the start of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// RFC 3339 timestamp of the run start.
    pub timestamp: String,
    /// Short git commit hash (absent outside a git checkout).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    /// Whether the working tree had uncommitted changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
    pub tool_version: String,
    pub hardware: HardwareInfo,
}

/// Hardware information for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareInfo {
    pub cpu: String,
    /// Number of logical cores.
    pub cores: usize,
    /// Total RAM in GB.
    pub ram_gb: u64,
    pub os: String,
    pub arch: String,
    /// Name of GPU device 0, when NVML can see one.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub gpu: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: TrialStatus) -> TrialRecord {
        TrialRecord {
            engine: EngineKind::Gpu,
            dataset_size: "1m".into(),
            query: "2_hop".into(),
            mode: TimingMode::FreshPerTrial,
            trial: 1,
            queries: 1,
            elapsed_secs: 1.5,
            load_init_secs: Some(1.0),
            query_secs: Some(0.5),
            reported_query_secs: None,
            row_count: Some(42),
            fallback_count: 0,
            status,
            error: None,
        }
    }

    #[test]
    fn csv_row_matches_header_arity() {
        let header_cols = TrialRecord::CSV_HEADER.split(',').count();
        let row = record(TrialStatus::Ok).to_csv_row();
        assert_eq!(row.split(',').count(), header_cols);
        assert!(row.starts_with("gpu,1m,2_hop,fresh,1,1,1.500000,1.000000,0.500000,,42,0,ok,"));
    }

    #[test]
    fn csv_quotes_error_text() {
        let mut r = record(TrialStatus::Failed);
        r.error = Some("exit 1: bad, \"quoted\"".into());
        assert!(r.to_csv_row().ends_with(",failed,\"exit 1: bad, \"\"quoted\"\"\""));
    }

    #[test]
    fn stats_over_values() {
        let s = Stats::from_secs(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(s.mean_secs, 2.0);
        assert_eq!(s.min_secs, 1.0);
        assert_eq!(s.max_secs, 3.0);
        assert_eq!(s.samples, 3);
        assert!(Stats::from_secs(&[]).is_none());
    }

    #[test]
    fn parse_labels() {
        assert_eq!("sirius".parse::<EngineKind>().unwrap(), EngineKind::Gpu);
        assert_eq!("persistent_session".parse::<TimingMode>().unwrap(), TimingMode::PersistentSession);
        assert!("turbo".parse::<TimingMode>().is_err());
    }

    #[test]
    fn summary_without_optional_fields_loads() {
        let json = r#"{"engine":"cpu","dataset_size":"10k","query":"2_hop","mode":"warm_single_session","trials":3,"failures":0}"#;
        let s: PlanSummary = serde_json::from_str(json).unwrap();
        assert!(s.row_counts.is_empty());
        assert!(s.gpu_before.is_none());
        assert!(s.clean.is_none());
    }

    #[test]
    fn log_is_append_only_csv() {
        let mut log = TrialLog::new();
        log.push(record(TrialStatus::Ok));
        log.push(record(TrialStatus::TimedOut));
        let csv = log.to_csv();
        assert_eq!(csv.lines().count(), 3);
        assert_eq!(csv.lines().next().unwrap(), TrialRecord::CSV_HEADER);
        assert_eq!(log.records()[1].status, TrialStatus::TimedOut);
    }
}
