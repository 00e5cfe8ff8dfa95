//! Dataset files and an in-memory view of the graph.
//!
//! The generator writes two CSVs per size label:
//! - `nodes_<size>.csv`: header, then `id,label` per line
//! - `edges_<size>.csv`: header, then `src,dst` per line (directed)
//!
//! The in-memory [`Graph`] exists for validation: it gives a brute-force
//! reference BFS to check engine-driven results against, and doubles as a
//! neighbor source for exercising the BFS engine without an engine process.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::TableSchema;
use crate::error::{BenchError, Result};

/// Resolved file paths for one dataset size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub size: String,
    pub nodes: PathBuf,
    pub edges: PathBuf,
}

impl DatasetPaths {
    pub fn for_size(data_dir: &Path, size: &str) -> Self {
        Self {
            size: size.to_string(),
            nodes: data_dir.join(format!("nodes_{}.csv", size)),
            edges: data_dir.join(format!("edges_{}.csv", size)),
        }
    }

    /// Both files must exist. Paths are made absolute because the engine may
    /// run with a different working directory.
    pub fn check(&self) -> Result<Self> {
        for p in [&self.nodes, &self.edges] {
            if !p.exists() {
                return Err(BenchError::Dataset(format!(
                    "dataset {} missing {}",
                    self.size,
                    p.display()
                )));
            }
        }
        Ok(Self {
            size: self.size.clone(),
            nodes: absolute(&self.nodes)?,
            edges: absolute(&self.edges)?,
        })
    }
}

fn absolute(p: &Path) -> Result<PathBuf> {
    Ok(std::fs::canonicalize(p)?)
}

/// Directed multigraph with string labels.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    labels: HashMap<u64, String>,
    adjacency: HashMap<u64, Vec<u64>>,
    edge_count: usize,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: u64, label: &str) {
        self.labels.insert(id, label.to_string());
    }

    /// Edges may reference ids that were never added as nodes.
    pub fn add_edge(&mut self, src: u64, dst: u64) {
        self.adjacency.entry(src).or_default().push(dst);
        self.edge_count += 1;
    }

    pub fn node_count(&self) -> usize {
        self.labels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn label(&self, id: u64) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Successors of `id`; empty for unknown (dangling) ids.
    pub fn neighbors(&self, id: u64) -> &[u64] {
        self.adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Ids whose label equals `label`, ascending.
    pub fn nodes_with_label(&self, label: &str) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .labels
            .iter()
            .filter(|(_, l)| l.as_str() == label)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Load both CSVs of a dataset.
    pub fn load(paths: &DatasetPaths, schema: &TableSchema) -> Result<Self> {
        let mut graph = Graph::new();

        let nodes = read(&paths.nodes)?;
        let mut lines = nodes.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| BenchError::Dataset(format!("{} is empty", paths.nodes.display())))?;
        let id_col = column(header, &schema.node_id, &paths.nodes)?;
        let label_col = column(header, &schema.node_label, &paths.nodes)?;
        for line in lines {
            let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('"')).collect();
            let id = parse_id(field(&fields, id_col, line)?, &paths.nodes)?;
            let label = field(&fields, label_col, line)?;
            graph.add_node(id, label);
        }

        let edges = read(&paths.edges)?;
        let mut lines = edges.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| BenchError::Dataset(format!("{} is empty", paths.edges.display())))?;
        let src_col = column(header, &schema.edge_src, &paths.edges)?;
        let dst_col = column(header, &schema.edge_dst, &paths.edges)?;
        for line in lines {
            let fields: Vec<&str> = line.split(',').map(|f| f.trim().trim_matches('"')).collect();
            let src = parse_id(field(&fields, src_col, line)?, &paths.edges)?;
            let dst = parse_id(field(&fields, dst_col, line)?, &paths.edges)?;
            graph.add_edge(src, dst);
        }

        Ok(graph)
    }

    /// Brute-force multi-source BFS from every node labelled `seed_label`.
    ///
    /// Returns node id -> minimum number of edge traversals from any seed,
    /// for nodes within `max_hops`.
    pub fn reference_distances(&self, seed_label: &str, max_hops: u32) -> HashMap<u64, u32> {
        let mut dist: HashMap<u64, u32> = HashMap::new();
        let mut queue: VecDeque<u64> = VecDeque::new();
        for id in self.nodes_with_label(seed_label) {
            dist.insert(id, 0);
            queue.push_back(id);
        }
        while let Some(u) = queue.pop_front() {
            let du = dist[&u];
            if du >= max_hops {
                continue;
            }
            for &v in self.neighbors(u) {
                if !dist.contains_key(&v) {
                    dist.insert(v, du + 1);
                    queue.push_back(v);
                }
            }
        }
        dist
    }
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| BenchError::Dataset(format!("failed to read {}: {}", path.display(), e)))
}

fn column(header: &str, name: &str, path: &Path) -> Result<usize> {
    header
        .split(',')
        .position(|c| c.trim().trim_matches('"') == name)
        .ok_or_else(|| {
            BenchError::Dataset(format!(
                "{}: header '{}' has no column '{}'",
                path.display(),
                header.trim(),
                name
            ))
        })
}

fn field<'a>(fields: &[&'a str], idx: usize, line: &str) -> Result<&'a str> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| BenchError::Dataset(format!("short line '{}'", line.trim())))
}

fn parse_id(s: &str, path: &Path) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|e| BenchError::Dataset(format!("{}: bad id '{}': {}", path.display(), s, e)))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub pass: bool,
    pub mismatches: usize,
    pub details: Vec<String>,
}

/// Compare BFS distances against a reference map.
pub fn validate_distances(
    actual: &HashMap<u64, u32>,
    reference: &HashMap<u64, u32>,
) -> ValidationResult {
    let mut mismatches = 0;
    let mut details = Vec::new();

    // Sorted so the first reported details are stable.
    let expected: BTreeMap<u64, u32> = reference.iter().map(|(&k, &v)| (k, v)).collect();
    for (&vid, &ref_depth) in &expected {
        match actual.get(&vid) {
            None => {
                mismatches += 1;
                if details.len() < 10 {
                    details.push(format!(
                        "vertex {}: expected depth {}, but not visited",
                        vid, ref_depth
                    ));
                }
            }
            Some(&d) if d != ref_depth => {
                mismatches += 1;
                if details.len() < 10 {
                    details.push(format!("vertex {}: expected depth {}, got {}", vid, ref_depth, d));
                }
            }
            _ => {}
        }
    }

    let unexpected: BTreeMap<u64, u32> = actual
        .iter()
        .filter(|(k, _)| !reference.contains_key(k))
        .map(|(&k, &v)| (k, v))
        .collect();
    for (vid, d) in unexpected {
        mismatches += 1;
        if details.len() < 10 {
            details.push(format!("vertex {}: expected unreachable, got depth {}", vid, d));
        }
    }

    ValidationResult {
        pass: mismatches == 0,
        mismatches,
        details,
    }
}
