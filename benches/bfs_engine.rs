//! In-memory cost of the frontier expansion loop.
//!
//! Runs `IterativeBfs` over a synthetic graph so the bookkeeping (dedup,
//! truncation, distance assignment) can be tracked apart from engine time.
//!
//! Run: `cargo bench --bench bfs_engine`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hop_benchmarks::config::BfsSettings;
use hop_benchmarks::dataset::Graph;
use hop_benchmarks::IterativeBfs;

const SIZES: [u64; 3] = [1_000, 10_000, 100_000];
const OUT_DEGREE: u64 = 8;

/// Every 64th node is a seed; each node links to `OUT_DEGREE` pseudo-random targets.
fn synthetic_graph(nodes: u64) -> Graph {
    let mut graph = Graph::new();
    for id in 0..nodes {
        graph.add_node(id, if id % 64 == 0 { "1" } else { "2" });
    }
    let mut state = 0x2545_f491_4f6c_dd1du64;
    for src in 0..nodes {
        for _ in 0..OUT_DEGREE {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            graph.add_edge(src, state % nodes);
        }
    }
    graph
}

fn bfs_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("bfs/full");
    group.sample_size(20);

    for nodes in SIZES {
        let mut graph = synthetic_graph(nodes);
        group.throughput(Throughput::Elements(graph.edge_count() as u64));
        let bfs = IterativeBfs::new(BfsSettings {
            seed_label: "1".into(),
            max_hops: 64,
            frontier_ceiling: usize::MAX,
        });
        group.bench_function(BenchmarkId::new("nodes", nodes), |b| {
            b.iter(|| black_box(bfs.run(&mut graph).total_visited()));
        });
    }
    group.finish();
}

fn bfs_truncated(c: &mut Criterion) {
    let mut group = c.benchmark_group("bfs/truncated");
    group.sample_size(20);

    let nodes = 100_000;
    let mut graph = synthetic_graph(nodes);
    for ceiling in [1_000usize, 10_000] {
        let bfs = IterativeBfs::new(BfsSettings {
            seed_label: "1".into(),
            max_hops: 64,
            frontier_ceiling: ceiling,
        });
        group.bench_function(BenchmarkId::new("ceiling", ceiling), |b| {
            b.iter(|| black_box(bfs.run(&mut graph).total_visited()));
        });
    }
    group.finish();
}

criterion_group!(benches, bfs_full, bfs_truncated);
criterion_main!(benches);
