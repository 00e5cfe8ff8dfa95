//! Shared fixtures: fake engine executables, small datasets and graphs.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use hop_benchmarks::dataset::{DatasetPaths, Graph};
use hop_benchmarks::fallback::{FallbackMatcher, SubstringMatcher};
use hop_benchmarks::session::PipedOptions;

pub const MARKER: &str = "Error in GPUExecuteQuery";

pub fn matcher() -> Arc<dyn FallbackMatcher> {
    Arc::new(SubstringMatcher::new([MARKER]))
}

// =============================================================================
// Fake engines
// =============================================================================

/// Write an executable `/bin/sh` script standing in for the engine binary.
/// The engine is invoked as `<binary> -init <script>`, so the script path is `$2`.
#[cfg(unix)]
pub fn fake_engine(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Batch engine that echoes `.print` labels and answers every timed
/// statement with a single row `1`.
#[cfg(unix)]
pub fn echo_engine(dir: &Path) -> PathBuf {
    fake_engine(
        dir,
        "echo-engine",
        r#"sed -n -e "s/^\.print '\(.*\)'$/\1/p" -e 's/^SELECT.*/1/p' -e 's/^call gpu_processing.*/1/p' "$2""#,
    )
}

/// Line-oriented streaming engine backed by a fixture directory:
/// `<fixtures>/seeds` lists seed ids, `<fixtures>/adj/<id>` lists successors.
/// Extra shell `case` arms can be spliced in ahead of the defaults.
#[cfg(unix)]
pub fn streaming_engine(dir: &Path, fixtures: &Path, extra_arms: &str) -> PathBuf {
    let body = format!(
        r#"FIX='{fix}'
hop=0
[ -f "$2" ] || exit 9
while IFS= read -r line; do
  case "$line" in
    .quit) exit 0 ;;
  esac
  path=$(printf '%s\n' "$line" | sed -n "s/.*) TO '\([^']*\)'.*/\1/p")
  [ -n "$path" ] || continue
  case "$line" in
    *"SELECT 1 AS node_id"*)
      printf 'node_id\n1\n' > "$path.tmp" ;;
{extra}
    *"WHERE label"*)
      {{ echo node_id; cat "$FIX/seeds"; }} > "$path.tmp" ;;
    *" IN ("*)
      hop=$((hop + 1))
      ids=$(printf '%s\n' "$line" | sed -n 's/.* IN (\([0-9,]*\)).*/\1/p' | tr ',' ' ')
      {{ echo node_id; for i in $ids; do [ -f "$FIX/adj/$i" ] && cat "$FIX/adj/$i"; done | sort -un; }} > "$path.tmp" ;;
  esac
  [ -f "$path.tmp" ] && mv "$path.tmp" "$path"
done
"#,
        fix = fixtures.display(),
        extra = extra_arms,
    );
    fake_engine(dir, "stream-engine", &body)
}

/// Lay out a graph as fixtures for [`streaming_engine`].
pub fn write_fixtures(dir: &Path, graph: &Graph, seed_label: &str, node_ids: &[u64]) -> PathBuf {
    let fix = dir.join("fixtures");
    let adj = fix.join("adj");
    std::fs::create_dir_all(&adj).unwrap();

    let seeds: Vec<String> = graph
        .nodes_with_label(seed_label)
        .iter()
        .map(|id| id.to_string())
        .collect();
    std::fs::write(fix.join("seeds"), lines(&seeds)).unwrap();

    for &id in node_ids {
        let succ: Vec<String> = graph.neighbors(id).iter().map(|v| v.to_string()).collect();
        if !succ.is_empty() {
            std::fs::write(adj.join(id.to_string()), lines(&succ)).unwrap();
        }
    }
    fix
}

fn lines(items: &[String]) -> String {
    let mut out = String::new();
    for i in items {
        out.push_str(i);
        out.push('\n');
    }
    out
}

/// Short timings so process tests stay quick; settle leaves room for a slow `sh`.
pub fn fast_piped_options() -> PipedOptions {
    PipedOptions {
        startup_timeout: Duration::from_secs(10),
        settle: Duration::from_millis(200),
        poll: Duration::from_millis(10),
        close_grace: Duration::from_secs(2),
    }
}

// =============================================================================
// Datasets and graphs
// =============================================================================

pub fn write_dataset(dir: &Path, size: &str, graph: &Graph, node_ids: &[u64]) -> DatasetPaths {
    let paths = DatasetPaths::for_size(dir, size);
    let mut nodes = String::from("id,label\n");
    for &id in node_ids {
        nodes.push_str(&format!("{},{}\n", id, graph.label(id).unwrap_or("unknown")));
    }
    let mut edges = String::from("src,dst\n");
    for &id in node_ids {
        for &v in graph.neighbors(id) {
            edges.push_str(&format!("{},{}\n", id, v));
        }
    }
    std::fs::write(&paths.nodes, nodes).unwrap();
    std::fs::write(&paths.edges, edges).unwrap();
    paths
}

/// Deterministic sparse digraph: `n` nodes labelled "1" (every 7th), "2" or
/// "unknown", and `m` random edges (self-loops and duplicates allowed).
pub fn random_graph(seed: u64, n: u64, m: usize) -> (Graph, Vec<u64>) {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        state >> 33
    };

    let mut g = Graph::new();
    let ids: Vec<u64> = (0..n).map(|i| i * 3 + 1).collect();
    for (i, &id) in ids.iter().enumerate() {
        let label = match i % 7 {
            0 => "1",
            1 | 2 => "unknown",
            _ => "2",
        };
        g.add_node(id, label);
    }
    for _ in 0..m {
        let a = ids[(next() % n) as usize];
        let b = ids[(next() % n) as usize];
        g.add_edge(a, b);
    }
    (g, ids)
}

/// Distance -> count, from an id -> distance map.
pub fn histogram<'a>(distances: impl IntoIterator<Item = &'a u32>) -> BTreeMap<u32, usize> {
    let mut h = BTreeMap::new();
    for &d in distances {
        *h.entry(d).or_insert(0) += 1;
    }
    h
}
