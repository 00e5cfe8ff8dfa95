//! Run configuration.
//!
//! Every field has a default so an empty JSON object (or no file at all) is a
//! valid configuration. Binaries layer CLI flags on top of what is loaded here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};
use crate::schema::EngineKind;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_FALLBACK_MARKER: &str = "Error in GPUExecuteQuery";
pub const DEFAULT_FRONTIER_CEILING: usize = 100_000;
pub const DEFAULT_MAX_HOPS: u32 = 20;
pub const DEFAULT_SEED_LABEL: &str = "1";

const DEFAULT_BUFFER: (&str, &str) = ("512 MB", "1 GB");

fn default_buffer_sizes() -> BTreeMap<String, BufferBounds> {
    [
        ("10k", "256 MB", "512 MB"),
        ("50k", "512 MB", "1 GB"),
        ("100k", "1 GB", "2 GB"),
        ("1m", "2 GB", "4 GB"),
        ("5m", "4 GB", "8 GB"),
        ("20m", "6 GB", "8 GB"),
        ("full", "2 GB", "4 GB"),
    ]
    .into_iter()
    .map(|(size, min, max)| (size.to_string(), BufferBounds::new(min, max)))
    .collect()
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Accelerator buffer bounds passed verbatim to the engine (e.g. `"4 GB"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferBounds {
    pub min: String,
    pub max: String,
}

impl BufferBounds {
    pub fn new(min: &str, max: &str) -> Self {
        Self {
            min: min.to_string(),
            max: max.to_string(),
        }
    }
}

/// Column names of the two dataset tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableSchema {
    pub node_id: String,
    pub node_label: String,
    pub edge_src: String,
    pub edge_dst: String,
}

impl Default for TableSchema {
    fn default() -> Self {
        Self {
            node_id: "id".to_string(),
            node_label: "label".to_string(),
            edge_src: "src".to_string(),
            edge_dst: "dst".to_string(),
        }
    }
}

/// Wall-clock budgets, all in milliseconds so the JSON stays readable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub startup_ms: u64,
    pub trial_ms: u64,
    pub hop_ms: u64,
    pub settle_ms: u64,
    pub poll_ms: u64,
    pub close_grace_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            startup_ms: 300_000,
            trial_ms: 300_000,
            hop_ms: 60_000,
            settle_ms: 500,
            poll_ms: 50,
            close_grace_ms: 5_000,
        }
    }
}

impl Timeouts {
    pub fn startup(&self) -> Duration {
        Duration::from_millis(self.startup_ms)
    }
    pub fn trial(&self) -> Duration {
        Duration::from_millis(self.trial_ms)
    }
    pub fn hop(&self) -> Duration {
        Duration::from_millis(self.hop_ms)
    }
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Iterative BFS knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BfsSettings {
    pub seed_label: String,
    pub max_hops: u32,
    pub frontier_ceiling: usize,
}

impl Default for BfsSettings {
    fn default() -> Self {
        Self {
            seed_label: DEFAULT_SEED_LABEL.to_string(),
            max_hops: DEFAULT_MAX_HOPS,
            frontier_ceiling: DEFAULT_FRONTIER_CEILING,
        }
    }
}

/// Top-level configuration for a benchmark or BFS run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub cpu_binary: PathBuf,
    pub gpu_binary: PathBuf,
    pub data_dir: PathBuf,
    pub query_dir: PathBuf,
    pub results_dir: PathBuf,
    pub buffer_sizes: BTreeMap<String, BufferBounds>,
    pub timeouts: Timeouts,
    pub bfs: BfsSettings,
    /// Substrings that mark a silent degradation to the slow path.
    pub fallback_markers: Vec<String>,
    pub schema: TableSchema,
    /// Emit `.timer on` and labelled sections so the engine reports its own
    /// per-command time alongside the wall clock.
    pub engine_timer: bool,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            cpu_binary: PathBuf::from("duckdb"),
            gpu_binary: PathBuf::from("sirius/build/release/duckdb"),
            data_dir: PathBuf::from("data/processed"),
            query_dir: PathBuf::from("sql"),
            results_dir: PathBuf::from("results"),
            buffer_sizes: default_buffer_sizes(),
            timeouts: Timeouts::default(),
            bfs: BfsSettings::default(),
            fallback_markers: vec![DEFAULT_FALLBACK_MARKER.to_string()],
            schema: TableSchema::default(),
            engine_timer: false,
        }
    }
}

impl BenchConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| BenchError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: BenchConfig = serde_json::from_str(&contents)
            .map_err(|e| BenchError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `load` when a path is given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.bfs.frontier_ceiling == 0 {
            return Err(BenchError::Config("bfs.frontier_ceiling must be > 0".into()));
        }
        if self.timeouts.trial_ms == 0 || self.timeouts.hop_ms == 0 || self.timeouts.startup_ms == 0 {
            return Err(BenchError::Config("timeouts must be > 0".into()));
        }
        Ok(())
    }

    pub fn binary(&self, engine: EngineKind) -> &Path {
        match engine {
            EngineKind::Cpu => &self.cpu_binary,
            EngineKind::Gpu => &self.gpu_binary,
        }
    }

    /// Buffer bounds for a dataset size label, falling back to a small default.
    pub fn buffer_for(&self, size: &str) -> BufferBounds {
        self.buffer_sizes
            .get(size)
            .cloned()
            .unwrap_or_else(|| BufferBounds::new(DEFAULT_BUFFER.0, DEFAULT_BUFFER.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_is_default() {
        let config: BenchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.bfs, BfsSettings::default());
        assert_eq!(config.timeouts, Timeouts::default());
        assert_eq!(config.fallback_markers, vec![DEFAULT_FALLBACK_MARKER.to_string()]);
        assert!(!config.engine_timer);
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let config: BenchConfig =
            serde_json::from_str(r#"{"bfs": {"max_hops": 3}, "timeouts": {"settle_ms": 10}}"#)
                .unwrap();
        assert_eq!(config.bfs.max_hops, 3);
        assert_eq!(config.bfs.frontier_ceiling, DEFAULT_FRONTIER_CEILING);
        assert_eq!(config.timeouts.settle(), Duration::from_millis(10));
        assert_eq!(config.timeouts.hop_ms, Timeouts::default().hop_ms);
    }

    #[test]
    fn buffer_lookup_falls_back() {
        let config = BenchConfig::default();
        assert_eq!(config.buffer_for("5m"), BufferBounds::new("4 GB", "8 GB"));
        assert_eq!(config.buffer_for("7x"), BufferBounds::new("512 MB", "1 GB"));
    }

    #[test]
    fn zero_ceiling_rejected() {
        let mut config = BenchConfig::default();
        config.bfs.frontier_ceiling = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.json");
        std::fs::write(&path, r#"{"cpu_binary": "/opt/duckdb", "engine_timer": true}"#).unwrap();
        let config = BenchConfig::load(&path).unwrap();
        assert_eq!(config.binary(EngineKind::Cpu), Path::new("/opt/duckdb"));
        assert!(config.engine_timer);
    }
}
