//! Pairing of CPU and GPU plan summaries.
//!
//! Plans pair up by (dataset size, query, mode). A speedup is only computed
//! when both sides have clean (unflagged, successful) samples that returned
//! the same number of rows; anything else is listed with the reason it cannot
//! be compared.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::schema::{EngineKind, PlanSummary, TimingMode};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct PairKey {
    pub dataset_size: String,
    pub query: String,
    pub mode: TimingMode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pairing {
    Comparable {
        cpu_mean_secs: f64,
        gpu_mean_secs: f64,
        /// cpu / gpu; above 1 means the GPU engine is faster.
        speedup: f64,
    },
    NotComparable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub key: PairKey,
    pub pairing: Pairing,
}

impl Comparison {
    pub fn speedup(&self) -> Option<f64> {
        match self.pairing {
            Pairing::Comparable { speedup, .. } => Some(speedup),
            Pairing::NotComparable { .. } => None,
        }
    }
}

/// Pair every plan in `summaries`. If a key appears more than once for the
/// same engine, the last one wins.
pub fn pair_summaries<'a>(summaries: impl IntoIterator<Item = &'a PlanSummary>) -> Vec<Comparison> {
    let mut slots: BTreeMap<PairKey, (Option<&PlanSummary>, Option<&PlanSummary>)> = BTreeMap::new();
    for s in summaries {
        let key = PairKey {
            dataset_size: s.dataset_size.clone(),
            query: s.query.clone(),
            mode: s.mode,
        };
        let slot = slots.entry(key).or_default();
        match s.engine {
            EngineKind::Cpu => slot.0 = Some(s),
            EngineKind::Gpu => slot.1 = Some(s),
        }
    }

    slots
        .into_iter()
        .map(|(key, (cpu, gpu))| Comparison {
            key,
            pairing: pair(cpu, gpu),
        })
        .collect()
}

fn pair(cpu: Option<&PlanSummary>, gpu: Option<&PlanSummary>) -> Pairing {
    let (cpu, gpu) = match (cpu, gpu) {
        (Some(c), Some(g)) => (c, g),
        (Some(_), None) => return not_comparable("no gpu result"),
        (None, Some(_)) => return not_comparable("no cpu result"),
        (None, None) => return not_comparable("no results"),
    };
    let cpu_mean = match side_mean(cpu) {
        Ok(m) => m,
        Err(reason) => return not_comparable(&format!("cpu {}", reason)),
    };
    let gpu_mean = match side_mean(gpu) {
        Ok(m) => m,
        Err(reason) => return not_comparable(&format!("gpu {}", reason)),
    };
    if !cpu.row_counts.is_empty() && !gpu.row_counts.is_empty() && cpu.row_counts != gpu.row_counts {
        return not_comparable(&format!(
            "row count mismatch cpu={} gpu={}",
            join_counts(&cpu.row_counts),
            join_counts(&gpu.row_counts)
        ));
    }
    if gpu_mean <= 0.0 {
        return not_comparable("gpu mean is zero");
    }
    Pairing::Comparable {
        cpu_mean_secs: cpu_mean,
        gpu_mean_secs: gpu_mean,
        speedup: cpu_mean / gpu_mean,
    }
}

fn side_mean(s: &PlanSummary) -> Result<f64, String> {
    match (&s.clean, &s.flagged) {
        (Some(stats), _) => Ok(stats.mean_secs),
        (None, Some(_)) => Err("only has fallback-flagged trials".to_string()),
        (None, None) if s.failures > 0 => Err(format!("failed all {} trials", s.failures)),
        (None, None) => Err("has no samples".to_string()),
    }
}

fn join_counts(counts: &[u64]) -> String {
    counts.iter().map(u64::to_string).collect::<Vec<_>>().join("/")
}

fn not_comparable(reason: &str) -> Pairing {
    Pairing::NotComparable {
        reason: reason.to_string(),
    }
}

/// Human-readable seconds.
pub fn format_secs(secs: f64) -> String {
    if secs < 1e-3 {
        format!("{:.1} us", secs * 1e6)
    } else if secs < 1.0 {
        format!("{:.2} ms", secs * 1e3)
    } else {
        format!("{:.3} s", secs)
    }
}
