//! Iterative multi-source BFS driven one hop per engine command.
//!
//! A single SQL query cannot express exhaustive reachability at depth without
//! exploding joins, so the search runs here: each hop sends one
//! neighbor-expansion command for the current frontier, and the visited set,
//! frontier and termination decision live on this side.
//!
//! ```text
//! Start ──seeds──▶ Expanding(0) ──hop──▶ Expanding(1) ──hop──▶ … ──▶ Done
//!   │                    │
//!   └─ no seeds ─▶ Done  └─ no new nodes / hop limit / command failure ─▶ Done
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::channel::IdArtifact;
use crate::config::{BfsSettings, TableSchema};
use crate::dataset::{Graph, ValidationResult};
use crate::error::{BenchError, Result};
use crate::fallback::FallbackMatcher;
use crate::protocol::{self, InitScript};
use crate::schema::{EngineKind, RunMetadata};
use crate::session::{PipedOptions, PipedSession};

pub type NodeId = u64;

/// Ids returned by one seed or expansion command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub nodes: Vec<NodeId>,
    /// The result artifact was missing or unparsable and was read as empty.
    pub degraded: bool,
    pub fallbacks: usize,
    pub elapsed: Duration,
}

impl From<IdArtifact> for Expansion {
    fn from(a: IdArtifact) -> Self {
        Expansion {
            degraded: a.degraded(),
            nodes: a.ids,
            fallbacks: a.fallbacks,
            elapsed: a.elapsed,
        }
    }
}

/// Where frontier expansions come from.
pub trait NeighborSource {
    /// All node ids labelled `label`.
    fn seeds(&mut self, label: &str) -> Result<Expansion>;

    /// Distinct one-edge successors of `frontier`. `hop` is the distance the
    /// returned nodes would be discovered at.
    fn expand(&mut self, frontier: &[NodeId], hop: u32) -> Result<Expansion>;
}

/// Expansion through a live engine session: one export command per hop.
pub struct EngineNeighbors<'a> {
    session: &'a mut PipedSession,
    schema: TableSchema,
    timeout: Duration,
}

impl<'a> EngineNeighbors<'a> {
    pub fn new(session: &'a mut PipedSession, schema: TableSchema, timeout: Duration) -> Self {
        Self {
            session,
            schema,
            timeout,
        }
    }
}

impl NeighborSource for EngineNeighbors<'_> {
    fn seeds(&mut self, label: &str) -> Result<Expansion> {
        let query = protocol::seed_query(&self.schema, label);
        Ok(self.session.export_ids(&query, "bfs_seeds", self.timeout)?.into())
    }

    fn expand(&mut self, frontier: &[NodeId], hop: u32) -> Result<Expansion> {
        let query = protocol::neighbor_query(&self.schema, frontier);
        let name = format!("bfs_hop_{}", hop);
        Ok(self.session.export_ids(&query, &name, self.timeout)?.into())
    }
}

impl NeighborSource for Graph {
    fn seeds(&mut self, label: &str) -> Result<Expansion> {
        let start = Instant::now();
        let nodes = self.nodes_with_label(label);
        Ok(Expansion {
            nodes,
            elapsed: start.elapsed(),
            ..Expansion::default()
        })
    }

    fn expand(&mut self, frontier: &[NodeId], _hop: u32) -> Result<Expansion> {
        let start = Instant::now();
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for &u in frontier {
            for &v in self.neighbors(u) {
                if seen.insert(v) {
                    nodes.push(v);
                }
            }
        }
        Ok(Expansion {
            nodes,
            elapsed: start.elapsed(),
            ..Expansion::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Why the search stopped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    /// A hop found no new nodes. `distance` is the last distance with discoveries.
    Converged { distance: u32 },
    /// The hop limit was reached while the frontier was still non-empty.
    HopLimit { max_hops: u32 },
    /// No node carries the seed label.
    EmptyFrontier,
    /// A command failed; everything discovered before `hop` is kept.
    Failed { hop: u32, kind: String, error: String },
    /// The engine session never came up, so nothing was searched.
    StartupFailed { kind: String, error: String },
}

/// Frontier cut down to the ceiling before a hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Truncation {
    pub hop: u32,
    pub original: usize,
    pub kept: usize,
}

/// One expansion command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HopRecord {
    /// Distance of the nodes this hop discovers.
    pub hop: u32,
    /// Frontier size actually sent (after truncation).
    pub frontier: usize,
    /// Distinct ids the command returned.
    pub returned: usize,
    /// Ids not visited before.
    pub new_nodes: usize,
    pub elapsed_secs: f64,
    pub fallbacks: usize,
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub struct BfsOutcome {
    visited: HashMap<NodeId, u32>,
    pub distance_counts: BTreeMap<u32, usize>,
    pub hops: Vec<HopRecord>,
    pub truncations: Vec<Truncation>,
    pub termination: Termination,
    pub seed_elapsed: Duration,
    /// The seed artifact was missing or unparsable.
    pub seeds_degraded: bool,
    pub elapsed: Duration,
}

impl BfsOutcome {
    /// Node id -> first-discovery distance.
    pub fn distances(&self) -> &HashMap<NodeId, u32> {
        &self.visited
    }

    pub fn distance(&self, id: NodeId) -> Option<u32> {
        self.visited.get(&id).copied()
    }

    pub fn total_visited(&self) -> usize {
        self.visited.len()
    }

    pub fn max_distance(&self) -> u32 {
        self.distance_counts.keys().next_back().copied().unwrap_or(0)
    }

    /// Ran to a natural end (no new nodes) rather than stopping on a limit or error.
    pub fn converged(&self) -> bool {
        matches!(self.termination, Termination::Converged { .. })
    }

    /// Stopped because a command failed; the distances are partial.
    pub fn stopped_early(&self) -> bool {
        matches!(
            self.termination,
            Termination::Failed { .. } | Termination::StartupFailed { .. }
        )
    }

    /// Outcome of a run whose session could not be opened.
    pub fn startup_failed(err: &BenchError, elapsed: Duration) -> Self {
        BfsOutcome {
            visited: HashMap::new(),
            distance_counts: BTreeMap::new(),
            hops: Vec::new(),
            truncations: Vec::new(),
            termination: Termination::StartupFailed {
                kind: err.kind().to_string(),
                error: err.to_string(),
            },
            seed_elapsed: Duration::ZERO,
            seeds_degraded: false,
            elapsed,
        }
    }

    pub fn truncated(&self) -> bool {
        !self.truncations.is_empty()
    }

    /// Some artifact was missing or unparsable and was read as "no rows".
    pub fn degraded(&self) -> bool {
        self.seeds_degraded || self.hops.iter().any(|h| h.degraded)
    }

    /// Sum of per-hop expansion latencies.
    pub fn expansion_time(&self) -> Duration {
        self.hops
            .iter()
            .map(|h| Duration::from_secs_f64(h.elapsed_secs))
            .sum()
    }
}

/// Serialized record of one BFS run.
#[derive(Debug, Clone, Serialize)]
pub struct BfsReport {
    pub metadata: RunMetadata,
    pub engine: EngineKind,
    pub dataset_size: String,
    pub seed_label: String,
    pub max_hops: u32,
    pub frontier_ceiling: usize,
    pub startup_secs: f64,
    pub seed_secs: f64,
    pub elapsed_secs: f64,
    pub total_visited: usize,
    pub max_distance: u32,
    pub distance_counts: BTreeMap<u32, usize>,
    pub termination: Termination,
    pub degraded: bool,
    pub hops: Vec<HopRecord>,
    pub truncations: Vec<Truncation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
}

impl BfsReport {
    pub fn new(
        metadata: RunMetadata,
        engine: EngineKind,
        dataset_size: &str,
        settings: &BfsSettings,
        startup: Duration,
        outcome: &BfsOutcome,
    ) -> Self {
        Self {
            metadata,
            engine,
            dataset_size: dataset_size.to_string(),
            seed_label: settings.seed_label.clone(),
            max_hops: settings.max_hops,
            frontier_ceiling: settings.frontier_ceiling,
            startup_secs: startup.as_secs_f64(),
            seed_secs: outcome.seed_elapsed.as_secs_f64(),
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            total_visited: outcome.total_visited(),
            max_distance: outcome.max_distance(),
            distance_counts: outcome.distance_counts.clone(),
            termination: outcome.termination.clone(),
            degraded: outcome.degraded(),
            hops: outcome.hops.clone(),
            truncations: outcome.truncations.clone(),
            validation: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Result of [`IterativeBfs::run_on_engine`].
#[derive(Debug, Clone)]
pub struct EngineRun {
    /// Time to a ready session, or to the startup failure.
    pub startup: Duration,
    pub outcome: BfsOutcome,
}

enum State {
    Start,
    Expanding { distance: u32 },
    Done(Termination),
}

pub struct IterativeBfs {
    settings: BfsSettings,
}

impl IterativeBfs {
    pub fn new(settings: BfsSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &BfsSettings {
        &self.settings
    }

    /// Open a session on `binary`, search through it, then close it.
    ///
    /// A session that fails to start still yields an outcome
    /// (`Termination::StartupFailed`) so the run can be reported; only a
    /// missing binary is returned as an error.
    pub fn run_on_engine(
        &self,
        binary: &Path,
        init: &InitScript,
        matcher: Arc<dyn FallbackMatcher>,
        options: PipedOptions,
        schema: TableSchema,
        hop_timeout: Duration,
    ) -> Result<EngineRun> {
        let started = Instant::now();
        let mut session = match PipedSession::open(binary, init, matcher, options) {
            Ok(s) => s,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(binary = %binary.display(), error = %e, "engine session failed to start");
                let startup = started.elapsed();
                return Ok(EngineRun {
                    startup,
                    outcome: BfsOutcome::startup_failed(&e, startup),
                });
            }
        };
        let startup = session.startup_time();
        let outcome = {
            let mut source = EngineNeighbors::new(&mut session, schema, hop_timeout);
            self.run(&mut source)
        };
        session.close();
        Ok(EngineRun { startup, outcome })
    }

    /// Run to completion. Never fails: command errors end the search with
    /// `Termination::Failed` and the partial result.
    pub fn run<S: NeighborSource + ?Sized>(&self, source: &mut S) -> BfsOutcome {
        let started = Instant::now();
        let ceiling = self.settings.frontier_ceiling.max(1);
        let max_hops = self.settings.max_hops;

        let mut visited: HashMap<NodeId, u32> = HashMap::new();
        let mut distance_counts: BTreeMap<u32, usize> = BTreeMap::new();
        let mut hops = Vec::new();
        let mut truncations = Vec::new();
        let mut frontier: Vec<NodeId> = Vec::new();
        let mut seed_elapsed = Duration::ZERO;
        let mut seeds_degraded = false;

        let mut state = State::Start;
        let termination = loop {
            state = match state {
                State::Start => match source.seeds(&self.settings.seed_label) {
                    Err(e) => State::Done(failed(0, &e)),
                    Ok(seeds) => {
                        seed_elapsed = seeds.elapsed;
                        seeds_degraded = seeds.degraded;
                        if seeds.degraded {
                            warn!("seed artifact degraded, treating as no seeds");
                        }
                        frontier = sorted_distinct(seeds.nodes);
                        if frontier.is_empty() {
                            info!(label = %self.settings.seed_label, "no seed nodes");
                            State::Done(Termination::EmptyFrontier)
                        } else {
                            for &id in &frontier {
                                visited.insert(id, 0);
                            }
                            distance_counts.insert(0, frontier.len());
                            info!(seeds = frontier.len(), "distance 0");
                            if max_hops == 0 {
                                State::Done(Termination::HopLimit { max_hops })
                            } else {
                                State::Expanding { distance: 0 }
                            }
                        }
                    }
                },

                State::Expanding { distance } => {
                    let hop = distance + 1;
                    if frontier.len() > ceiling {
                        warn!(
                            hop,
                            frontier = frontier.len(),
                            kept = ceiling,
                            "frontier over ceiling, keeping lowest ids"
                        );
                        truncations.push(Truncation {
                            hop,
                            original: frontier.len(),
                            kept: ceiling,
                        });
                        frontier.truncate(ceiling);
                    }

                    match source.expand(&frontier, hop) {
                        Err(e) => {
                            warn!(hop, error = %e, "expansion failed, stopping early");
                            State::Done(failed(hop, &e))
                        }
                        Ok(exp) => {
                            let returned = sorted_distinct(exp.nodes);
                            let new_nodes: Vec<NodeId> = returned
                                .iter()
                                .copied()
                                .filter(|id| !visited.contains_key(id))
                                .collect();

                            hops.push(HopRecord {
                                hop,
                                frontier: frontier.len(),
                                returned: returned.len(),
                                new_nodes: new_nodes.len(),
                                elapsed_secs: exp.elapsed.as_secs_f64(),
                                fallbacks: exp.fallbacks,
                                degraded: exp.degraded,
                            });
                            info!(
                                hop,
                                frontier = frontier.len(),
                                returned = returned.len(),
                                new = new_nodes.len(),
                                elapsed_ms = exp.elapsed.as_secs_f64() * 1000.0,
                                "expanded"
                            );

                            if new_nodes.is_empty() {
                                State::Done(Termination::Converged { distance })
                            } else {
                                for &id in &new_nodes {
                                    visited.insert(id, hop);
                                }
                                distance_counts.insert(hop, new_nodes.len());
                                frontier = new_nodes;
                                if hop >= max_hops {
                                    State::Done(Termination::HopLimit { max_hops })
                                } else {
                                    State::Expanding { distance: hop }
                                }
                            }
                        }
                    }
                }

                State::Done(t) => break t,
            };
        };

        BfsOutcome {
            visited,
            distance_counts,
            hops,
            truncations,
            termination,
            seed_elapsed,
            seeds_degraded,
            elapsed: started.elapsed(),
        }
    }
}

fn failed(hop: u32, e: &BenchError) -> Termination {
    Termination::Failed {
        hop,
        kind: e.kind().to_string(),
        error: e.to_string(),
    }
}

fn sorted_distinct(mut ids: Vec<NodeId>) -> Vec<NodeId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max_hops: u32, ceiling: usize) -> BfsSettings {
        BfsSettings {
            seed_label: "1".to_string(),
            max_hops,
            frontier_ceiling: ceiling,
        }
    }

    fn graph(seeds: &[u64], edges: &[(u64, u64)]) -> Graph {
        let mut g = Graph::new();
        for &s in seeds {
            g.add_node(s, "1");
        }
        for &(a, b) in edges {
            for id in [a, b] {
                if g.label(id).is_none() {
                    g.add_node(id, "2");
                }
            }
            g.add_edge(a, b);
        }
        g
    }

    #[test]
    fn first_discovery_wins() {
        let mut g = graph(&[1], &[(1, 2), (2, 3), (1, 3)]);
        let out = IterativeBfs::new(settings(20, 100)).run(&mut g);
        assert_eq!(out.distance(1), Some(0));
        assert_eq!(out.distance(2), Some(1));
        assert_eq!(out.distance(3), Some(1));
        assert_eq!(out.max_distance(), 1);
        assert!(out.converged());
        assert_eq!(out.termination, Termination::Converged { distance: 1 });
    }

    #[test]
    fn isolated_seed_stops_after_one_hop() {
        let mut g = graph(&[7], &[]);
        let out = IterativeBfs::new(settings(20, 100)).run(&mut g);
        assert_eq!(out.hops.len(), 1);
        assert_eq!(out.hops[0].new_nodes, 0);
        assert_eq!(out.total_visited(), 1);
        assert!(out.converged());
    }

    #[test]
    fn no_seeds_is_empty_frontier() {
        let mut g = graph(&[], &[(1, 2)]);
        let out = IterativeBfs::new(settings(20, 100)).run(&mut g);
        assert_eq!(out.termination, Termination::EmptyFrontier);
        assert_eq!(out.total_visited(), 0);
        assert!(out.hops.is_empty());
    }

    #[test]
    fn hop_limit_stops_with_frontier_left() {
        let mut g = graph(&[1], &[(1, 2), (2, 3), (3, 4)]);
        let out = IterativeBfs::new(settings(2, 100)).run(&mut g);
        assert_eq!(out.termination, Termination::HopLimit { max_hops: 2 });
        assert_eq!(out.distance(3), Some(2));
        assert_eq!(out.distance(4), None);
    }

    #[test]
    fn zero_hops_keeps_only_seeds() {
        let mut g = graph(&[1], &[(1, 2)]);
        let out = IterativeBfs::new(settings(0, 100)).run(&mut g);
        assert_eq!(out.total_visited(), 1);
        assert!(out.hops.is_empty());
    }

    #[test]
    fn truncation_keeps_lowest_ids() {
        // Seeds 1..=5, each with a private successor 10+i.
        let edges: Vec<(u64, u64)> = (1..=5).map(|i| (i, 10 + i)).collect();
        let mut g = graph(&[5, 4, 3, 2, 1], &edges);
        let out = IterativeBfs::new(settings(20, 2)).run(&mut g);
        assert_eq!(
            out.truncations,
            vec![Truncation { hop: 1, original: 5, kept: 2 }]
        );
        assert_eq!(out.distance(11), Some(1));
        assert_eq!(out.distance(12), Some(1));
        assert_eq!(out.distance(13), None);
        assert_eq!(out.hops[0].frontier, 2);
    }

    #[test]
    fn dangling_edges_are_empty_neighbor_sets() {
        let mut g = Graph::new();
        g.add_node(1, "1");
        g.add_edge(1, 500);
        let out = IterativeBfs::new(settings(20, 100)).run(&mut g);
        assert_eq!(out.distance(500), Some(1));
        assert!(out.converged());
    }

    /// Seeds plus a queue of canned expansion results.
    struct Scripted {
        seeds: Vec<NodeId>,
        hops: std::collections::VecDeque<Result<Expansion>>,
    }

    impl NeighborSource for Scripted {
        fn seeds(&mut self, _label: &str) -> Result<Expansion> {
            Ok(Expansion {
                nodes: self.seeds.clone(),
                ..Expansion::default()
            })
        }

        fn expand(&mut self, _frontier: &[NodeId], _hop: u32) -> Result<Expansion> {
            self.hops.pop_front().unwrap_or_else(|| Ok(Expansion::default()))
        }
    }

    fn nodes(ids: &[NodeId]) -> Result<Expansion> {
        Ok(Expansion {
            nodes: ids.to_vec(),
            elapsed: Duration::from_millis(3),
            ..Expansion::default()
        })
    }

    #[test]
    fn failed_hop_keeps_partial_distances() {
        let mut source = Scripted {
            seeds: vec![1],
            hops: vec![
                nodes(&[2, 3]),
                Err(BenchError::Timeout(Duration::from_secs(60))),
            ]
            .into(),
        };
        let out = IterativeBfs::new(settings(20, 100)).run(&mut source);
        assert!(out.stopped_early());
        assert!(!out.converged());
        match &out.termination {
            Termination::Failed { hop, kind, .. } => {
                assert_eq!(*hop, 2);
                assert_eq!(kind, "timeout");
            }
            other => panic!("unexpected termination {:?}", other),
        }
        assert_eq!(out.total_visited(), 3);
        assert_eq!(out.distance(3), Some(1));
        assert_eq!(out.hops.len(), 1);
    }

    #[test]
    fn missing_artifact_reads_as_convergence() {
        let mut source = Scripted {
            seeds: vec![1],
            hops: vec![
                nodes(&[2]),
                Ok(Expansion {
                    degraded: true,
                    ..Expansion::default()
                }),
            ]
            .into(),
        };
        let out = IterativeBfs::new(settings(20, 100)).run(&mut source);
        assert_eq!(out.termination, Termination::Converged { distance: 1 });
        assert!(out.degraded());
        assert!(out.hops[1].degraded);
    }

    #[test]
    fn revisited_nodes_are_not_new() {
        let mut source = Scripted {
            seeds: vec![1, 1, 2],
            hops: vec![nodes(&[1, 2, 3, 3]), nodes(&[1, 3])].into(),
        };
        let out = IterativeBfs::new(settings(20, 100)).run(&mut source);
        assert_eq!(out.distance_counts.get(&0), Some(&2));
        assert_eq!(out.distance_counts.get(&1), Some(&1));
        assert_eq!(out.hops[0].returned, 3);
        assert_eq!(out.hops[0].new_nodes, 1);
    }

    #[test]
    fn start_is_idempotent() {
        let mut g = graph(&[9, 3, 5], &[(3, 4)]);
        let a = g.seeds("1").unwrap().nodes;
        let b = g.seeds("1").unwrap().nodes;
        assert_eq!(a, b);
        assert_eq!(a, vec![3, 5, 9]);
    }

    fn metadata() -> RunMetadata {
        RunMetadata {
            timestamp: "2026-10-16T09:30:00Z".into(),
            git_commit: None,
            git_branch: None,
            git_dirty: None,
            tool_version: "0.1.0".into(),
            hardware: crate::schema::HardwareInfo {
                cpu: "test".into(),
                cores: 1,
                ram_gb: 1,
                os: "linux".into(),
                arch: "x86_64".into(),
                gpu: None,
            },
        }
    }

    #[test]
    fn failed_report_keeps_reason_and_error_kind() {
        let mut source = Scripted {
            seeds: vec![1],
            hops: vec![nodes(&[2]), Err(BenchError::Timeout(Duration::from_secs(60)))].into(),
        };
        let bfs = IterativeBfs::new(settings(20, 100));
        let out = bfs.run(&mut source);
        let report = BfsReport::new(metadata(), EngineKind::Gpu, "1m", bfs.settings(), Duration::ZERO, &out);

        let json = serde_json::to_value(&report).unwrap();
        let t = &json["termination"];
        assert_eq!(t["reason"], "failed");
        assert_eq!(t["kind"], "timeout");
        assert_eq!(t["hop"], 2);
        assert!(t["error"].as_str().unwrap().contains("60"));
        assert_eq!(json["total_visited"], 2);
        assert!(json.get("validation").is_none());
    }

    #[test]
    fn startup_failure_is_an_early_stop() {
        let err = BenchError::Startup("engine exited during init".into());
        let out = BfsOutcome::startup_failed(&err, Duration::from_millis(40));
        assert!(out.stopped_early());
        assert!(!out.converged());
        assert_eq!(out.total_visited(), 0);
        assert_eq!(out.max_distance(), 0);
        let json = serde_json::to_value(&out.termination).unwrap();
        assert_eq!(json["reason"], "startup_failed");
        assert_eq!(json["kind"], "startup");
    }
}
