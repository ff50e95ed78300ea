use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use fdk_core::edge::Edge;
use fdk_core::path::shortest_paths;

fn grid_topology(side: usize) -> Vec<Edge> {
    let mut edges = Vec::new();

    let id = |x: usize, y: usize| format!("openflow:{}-{}", x, y);

    for x in 0..side {
        for y in 0..side {
            if x + 1 < side {
                edges.push(Edge::new(id(x, y), id(x + 1, y), "1".into(), "2".into(), 1_000_000_000));
                edges.push(Edge::new(id(x + 1, y), id(x, y), "2".into(), "1".into(), 1_000_000_000));
            }
            if y + 1 < side {
                edges.push(Edge::new(id(x, y), id(x, y + 1), "3".into(), "4".into(), 1_000_000_000));
                edges.push(Edge::new(id(x, y + 1), id(x, y), "4".into(), "3".into(), 1_000_000_000));
            }
        }
    }

    edges
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("path_selector");
    group.throughput(Throughput::Elements(1));

    for side in [4usize, 8, 16] {
        let edges = grid_topology(side);
        group.bench_function(format!("grid_{}x{}", side, side), |bencher| {
            bencher.iter(|| {
                let result = shortest_paths(&edges, "openflow:0-0", 1_000_000);
                std::hint::black_box(result);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
