use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simstore::core::config::{Config, IndexKind, LshConfig};
use simstore::feature::object::Object;
use simstore::feature::vector::Feature;
use simstore::matcher::emd::emd_hat;
use simstore::server::shard::{Shard, ShardQuery};
use simstore::storage::layout::ShardPaths;
use tempfile::TempDir;

const DIM: usize = 32;

fn random_object(rng: &mut StdRng) -> Object {
    Object::single(Feature::dense((0..DIM).map(|_| rng.gen_range(-1.0..1.0)).collect()))
}

/// Open a shard in a fresh directory and fill it with `n` random points
fn filled_shard(config: &Config, n: usize) -> (TempDir, Shard) {
    let dir = TempDir::new().unwrap();
    let shard = Shard::open(config, 0, ShardPaths::in_dir(dir.path().to_path_buf())).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    for i in 0..n {
        shard.insert(&format!("obj{}", i), "", random_object(&mut rng)).unwrap();
    }
    (dir, shard)
}

fn base_config() -> Config {
    let mut config = Config::default();
    config.object.dim = DIM;
    config
}

/// Benchmark single object insertion
fn bench_insert(c: &mut Criterion) {
    let (_dir, shard) = filled_shard(&base_config(), 0);
    let mut rng = StdRng::seed_from_u64(7);
    let mut id = 0;
    c.bench_function("shard_insert", |b| {
        b.iter(|| {
            shard.insert(&format!("k{}", id), "", random_object(&mut rng)).unwrap();
            id += 1;
        });
    });
}

/// Compare query latency across index kinds
fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search_k10");
    let n = 5000;

    let mut linear = base_config();
    linear.index.kind = IndexKind::Linear;

    let mut graph = base_config();
    graph.index.graph.min_index_size = 1000;

    let mut lsh = base_config();
    lsh.index.kind = IndexKind::Lsh;
    lsh.index.lsh = LshConfig { tables: 8, bits: 8, allocate: 16 * 1024 * 1024, seed: 3 };

    for (name, config) in [("linear", linear), ("graph", graph), ("lsh", lsh)] {
        let (_dir, shard) = filled_shard(&config, n);
        shard.reindex().unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let query = ShardQuery { k: Some(10), hint_k: Some(10), ..Default::default() };
        group.bench_with_input(BenchmarkId::from_parameter(name), &n, |b, _| {
            b.iter(|| {
                let q = random_object(&mut rng);
                black_box(shard.search(&q, &query).unwrap());
            });
        });
    }
    group.finish();
}

/// EMD between objects of growing part counts
fn bench_emd(c: &mut Criterion) {
    let mut group = c.benchmark_group("emd_parts");
    group.sample_size(10);
    for parts in [50usize, 100, 200] {
        let mut rng = StdRng::seed_from_u64(parts as u64);
        let n = 2 * parts;
        let positions: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..100.0)).collect();
        let cost: Vec<Vec<f64>> = (0..n)
            .map(|i| (0..n).map(|j| (positions[i] - positions[j]).abs()).collect())
            .collect();
        let p: Vec<f64> = (0..n).map(|b| if b < parts { 1.0 / parts as f64 } else { 0.0 }).collect();
        let q: Vec<f64> = (0..n).map(|b| if b >= parts { 1.0 / parts as f64 } else { 0.0 }).collect();
        group.bench_with_input(BenchmarkId::from_parameter(parts), &parts, |b, _| {
            b.iter(|| black_box(emd_hat(&p, &q, &cost, 0.0)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_emd);
criterion_main!(benches);
