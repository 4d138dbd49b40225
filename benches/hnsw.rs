//! Graph benchmarks
//!
//! Run with: cargo bench --bench hnsw

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::time::Duration;
use yakhnsw::pq::{train, TrainingConfig};
use yakhnsw::{DistanceKind, Graph, GraphConfig, InputNode, Quantizer};

const DIM: usize = 64;

fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
    (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
}

fn build(n: usize, ef_search: usize, seed: u64) -> Graph<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = Graph::new(GraphConfig {
        m: 16,
        ef_search,
        distance: DistanceKind::Euclidean,
        seed: Some(seed),
        ..Default::default()
    })
    .unwrap();
    graph
        .add((0..n as u64).map(|k| InputNode::new(k, random_vector(DIM, &mut rng))))
        .unwrap();
    graph
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_insert");

    // Each iteration rebuilds the graph
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for n in [100, 500, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| black_box(build(n, 20, 1000 + n as u64).len()))
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_search");
    group.sample_size(50);
    group.measurement_time(Duration::from_secs(3));

    for ef in [20, 50, 100] {
        let graph = build(3000, ef, 4242);
        let mut query_rng = StdRng::seed_from_u64(ef as u64 + 5000);
        let query = random_vector(DIM, &mut query_rng);

        group.bench_with_input(BenchmarkId::from_parameter(ef), &ef, |b, _| {
            b.iter(|| black_box(graph.search(&query, 10).unwrap()))
        });
    }

    group.finish();
}

fn bench_pq(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(77);
    let data: Vec<Vec<f64>> = (0..2000)
        .map(|_| random_vector(DIM, &mut rng).into_iter().map(f64::from).collect())
        .collect();
    let codebook = train(
        data.iter().cloned(),
        &TrainingConfig {
            m: 8,
            k: 64,
            max_iters: 15,
            seed: Some(77),
            ..Default::default()
        },
    )
    .unwrap();
    let quantizer = Quantizer::new(codebook.into());
    let codes: Vec<Vec<u8>> = data.iter().map(|v| quantizer.encode(v).unwrap()).collect();
    let query = &data[0];

    let mut group = c.benchmark_group("pq");
    group.bench_function("encode", |b| b.iter(|| black_box(quantizer.encode(query).unwrap())));
    group.bench_function("adc_table_scan_2000", |b| {
        b.iter(|| {
            let table = quantizer.compute_distance_table(query).unwrap();
            let mut best = f64::INFINITY;
            for code in &codes {
                let d = quantizer.asymmetric_distance_with_table(&table, code).unwrap();
                best = best.min(d);
            }
            black_box(best)
        })
    });
    group.finish();

    let mut graph = build(2000, 50, 91);
    graph.train_pq_codebook_from_data(8, 64).unwrap();
    let q = random_vector(DIM, &mut rng);
    c.bench_function("pq_graph_search", |b| b.iter(|| black_box(graph.search(&q, 10).unwrap())));
}

fn bench_snapshot(c: &mut Criterion) {
    let graph = build(2000, 20, 5);
    let bytes = graph.to_binary().unwrap();

    let mut group = c.benchmark_group("snapshot");
    group.sample_size(20);
    group.bench_function("encode", |b| b.iter(|| black_box(graph.to_binary().unwrap())));
    group.bench_function("decode", |b| {
        b.iter(|| black_box(Graph::<u64>::from_binary(&bytes, DistanceKind::Euclidean).unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_pq, bench_snapshot);
criterion_main!(benches);
