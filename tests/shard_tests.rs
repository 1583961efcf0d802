use std::sync::Arc;
use std::thread;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use simstore::core::config::{Config, IndexKind, LshConfig, MatcherKind};
use simstore::core::error::ErrorKind;
use simstore::feature::object::{Object, Part};
use simstore::feature::similarity::Similarity;
use simstore::feature::vector::Feature;
use simstore::server::shard::{Shard, ShardQuery};
use simstore::storage::layout::ShardPaths;
use tempfile::TempDir;

fn config(dim: usize) -> Config {
    let mut config = Config::default();
    config.object.dim = dim;
    config
}

fn open(config: &Config, dir: &TempDir) -> Shard {
    Shard::open(config, 0, ShardPaths::in_dir(dir.path().to_path_buf())).unwrap()
}

fn random_point(rng: &mut StdRng, dim: usize) -> Object {
    Object::single(Feature::dense((0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect()))
}

fn query(k: usize) -> ShardQuery {
    ShardQuery { k: Some(k), hint_k: Some(k), ..Default::default() }
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let config = config(3);
    {
        let shard = open(&config, &dir);
        shard.insert("a", "first", Object::single(Feature::dense(vec![1.0, 0.0, 0.0]))).unwrap();
        shard.insert("b", "second", Object::single(Feature::dense(vec![0.0, 1.0, 0.0]))).unwrap();
        shard.insert("c", "third", Object::single(Feature::dense(vec![0.0, 0.0, 1.0]))).unwrap();
        shard.sync().unwrap();
    }
    let shard = open(&config, &dir);
    assert_eq!(shard.len(), 3);
    assert_eq!(shard.get("a").unwrap().id, 0);
    assert_eq!(shard.get("c").unwrap().id, 2);
    assert_eq!(shard.get("b").unwrap().meta, "second");

    let hits = shard.search(&Object::single(Feature::dense(vec![0.0, 0.9, 0.0])), &query(1)).unwrap().hits;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, "b");

    // Ids continue after the replayed ones.
    shard.insert("d", "", Object::single(Feature::dense(vec![1.0, 1.0, 1.0]))).unwrap();
    assert_eq!(shard.get("d").unwrap().id, 3);
}

#[test]
fn test_similarity_sorts_descending_and_filters_by_threshold() {
    let dir = TempDir::new().unwrap();
    let mut config = config(2);
    config.similarity = Similarity::Cosine;
    let shard = open(&config, &dir);
    shard.insert("same", "", Object::single(Feature::dense(vec![1.0, 0.0]))).unwrap();
    shard.insert("diag", "", Object::single(Feature::dense(vec![1.0, 1.0]))).unwrap();
    shard.insert("ortho", "", Object::single(Feature::dense(vec![0.0, 1.0]))).unwrap();

    let q = Object::single(Feature::dense(vec![2.0, 0.0]));
    let hits = shard.search(&q, &query(10)).unwrap().hits;
    let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
    assert_eq!(keys, vec!["same", "diag", "ortho"]);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    // Orthogonal vectors give a zero cosine, which is reported as -1.
    assert_eq!(hits[2].score, -1.0);

    let filtered = shard
        .search(&q, &ShardQuery { r: Some(0.5), ..query(10) })
        .unwrap()
        .hits;
    let keys: Vec<&str> = filtered.iter().map(|h| h.key.as_str()).collect();
    assert_eq!(keys, vec!["same", "diag"]);
}

#[test]
fn test_distance_sorts_ascending_and_truncates() {
    let dir = TempDir::new().unwrap();
    let shard = open(&config(1), &dir);
    for (key, x) in [("far", 9.0), ("near", 1.0), ("mid", 4.0)] {
        shard.insert(key, "", Object::single(Feature::dense(vec![x]))).unwrap();
    }
    let q = Object::single(Feature::dense(vec![0.0]));
    let hits = shard.search(&q, &ShardQuery { k: Some(2), hint_k: Some(3), ..Default::default() }).unwrap().hits;
    let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
    assert_eq!(keys, vec!["near", "mid"]);

    let hits = shard.search(&q, &ShardQuery { r: Some(4.0), ..query(3) }).unwrap().hits;
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_graph_tail_matches_linear_shard() {
    let dim = 4;
    let mut graph_config = config(dim);
    graph_config.index.graph.min_index_size = 40;
    graph_config.index.graph.pool_size = 20;
    graph_config.index.graph.degree = 10;
    graph_config.index.graph.search_seeds = 1000;
    graph_config.index.graph.search_pool = 1000;
    let mut linear_config = config(dim);
    linear_config.index.kind = IndexKind::Linear;

    let graph_dir = TempDir::new().unwrap();
    let linear_dir = TempDir::new().unwrap();
    let graph = open(&graph_config, &graph_dir);
    let linear = open(&linear_config, &linear_dir);

    let mut rng = StdRng::seed_from_u64(21);
    for i in 0..60 {
        let object = random_point(&mut rng, dim);
        graph.insert(&format!("k{}", i), "", object.clone()).unwrap();
        linear.insert(&format!("k{}", i), "", object).unwrap();
    }
    graph.reindex().unwrap();
    assert_eq!(graph.stats().indexed, 60);
    for i in 60..120 {
        let object = random_point(&mut rng, dim);
        graph.insert(&format!("k{}", i), "", object.clone()).unwrap();
        linear.insert(&format!("k{}", i), "", object).unwrap();
    }
    assert_eq!(graph.stats().indexed, 60);
    assert_eq!(linear.stats().indexed, 0);

    for _ in 0..10 {
        let q = random_point(&mut rng, dim);
        let a = graph.search(&q, &query(8)).unwrap().hits;
        let b = linear.search(&q, &query(8)).unwrap().hits;
        assert_eq!(a, b);
    }
}

#[test]
fn test_graph_snapshot_survives_restart() {
    let dim = 3;
    let dir = TempDir::new().unwrap();
    let mut config = config(dim);
    config.index.graph.min_index_size = 10;
    config.index.graph.pool_size = 10;
    config.index.graph.degree = 5;
    let mut rng = StdRng::seed_from_u64(8);
    {
        let shard = open(&config, &dir);
        for i in 0..30 {
            shard.insert(&format!("k{}", i), "", random_point(&mut rng, dim)).unwrap();
        }
        shard.reindex().unwrap();
        shard.insert("tail", "", random_point(&mut rng, dim)).unwrap();
        shard.sync().unwrap();
    }
    assert!(dir.path().join("index.bin").exists());
    let shard = open(&config, &dir);
    let stats = shard.stats();
    assert_eq!(stats.records, 31);
    assert_eq!(stats.indexed, 30);
}

#[test]
fn test_lsh_exhaustion_leaves_no_partial_object() {
    let dir = TempDir::new().unwrap();
    let mut config = config(2);
    config.index.kind = IndexKind::Lsh;
    config.index.lsh = LshConfig { tables: 2, bits: 2, allocate: 4096, seed: 1 };
    let shard = open(&config, &dir);

    let mut rng = StdRng::seed_from_u64(2);
    let mut inserted = 0;
    let err = loop {
        let parts = (0..2)
            .map(|_| Part::new(Feature::dense(vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])))
            .collect();
        match shard.insert(&format!("k{}", inserted), "", Object::new(parts)) {
            Ok(_) => inserted += 1,
            Err(e) => break e,
        }
        assert!(inserted < 10_000);
    };
    assert_eq!(err.kind, ErrorKind::OutOfMemory);
    assert!(inserted > 0);
    let stats = shard.stats();
    assert_eq!(stats.records, inserted);
    assert_eq!(stats.features, 2 * inserted);
    drop(shard);

    // The rejected object never reached the journal.
    let shard = open(&config, &dir);
    assert_eq!(shard.len(), inserted);
}

#[test]
fn test_readonly_shard_rejects_mutation() {
    let dir = TempDir::new().unwrap();
    let mut config = config(2);
    {
        let shard = open(&config, &dir);
        shard.insert("a", "", Object::single(Feature::dense(vec![0.0, 0.0]))).unwrap();
    }
    config.readonly = true;
    let shard = open(&config, &dir);
    assert_eq!(shard.len(), 1);
    let object = Object::single(Feature::dense(vec![1.0, 1.0]));
    assert_eq!(shard.insert("b", "", object).unwrap_err().kind, ErrorKind::Permission);
    assert_eq!(shard.clear().unwrap_err().kind, ErrorKind::Permission);
    assert_eq!(shard.sync().unwrap_err().kind, ErrorKind::Permission);
    assert_eq!(shard.reindex().unwrap_err().kind, ErrorKind::Permission);
    let hits = shard.search(&Object::single(Feature::dense(vec![0.0, 0.0])), &query(1)).unwrap().hits;
    assert_eq!(hits[0].key, "a");
}

#[test]
fn test_clear_is_irreversible() {
    let dir = TempDir::new().unwrap();
    let config = config(2);
    {
        let shard = open(&config, &dir);
        shard.insert("a", "", Object::single(Feature::dense(vec![0.0, 0.0]))).unwrap();
        shard.insert("b", "", Object::single(Feature::dense(vec![1.0, 0.0]))).unwrap();
        let held = shard.get("a").unwrap();
        shard.clear().unwrap();
        assert!(shard.is_empty());
        assert!(shard.get("a").is_none());
        assert_eq!(held.key, "a");
        assert!(shard.fetch(&["a".to_string()]).is_empty());
        shard.insert("a", "again", Object::single(Feature::dense(vec![5.0, 5.0]))).unwrap();
    }
    let shard = open(&config, &dir);
    assert_eq!(shard.len(), 1);
    assert_eq!(shard.get("a").unwrap().meta, "again");
}

#[test]
fn test_counting_matcher_counts_matched_parts() {
    let dir = TempDir::new().unwrap();
    let mut config = config(1);
    config.matcher.kind = MatcherKind::Counting;
    config.defaults.hint_r = Some(0.5);
    let shard = open(&config, &dir);
    let multi = |xs: &[f32]| Object::new(xs.iter().map(|x| Part::new(Feature::dense(vec![*x]))).collect());
    shard.insert("two", "", multi(&[0.0, 10.0])).unwrap();
    shard.insert("one", "", multi(&[0.0, 50.0])).unwrap();
    shard.insert("none", "", multi(&[100.0])).unwrap();

    let hits = shard.search(&multi(&[0.1, 10.1]), &ShardQuery { hint_k: Some(10), ..Default::default() }).unwrap().hits;
    let ranked: Vec<(&str, f32)> = hits.iter().map(|h| (h.key.as_str(), h.score)).collect();
    assert_eq!(ranked, vec![("two", 2.0), ("one", 1.0)]);
}

#[test]
fn test_emd_matcher_ranks_weighted_objects() {
    let dir = TempDir::new().unwrap();
    let mut config = config(1);
    config.object.weighted = true;
    config.similarity = Similarity::L1;
    config.matcher.kind = MatcherKind::Emd;
    let shard = open(&config, &dir);
    let weighted = |xs: &[(f32, f32)]| {
        Object::new(xs.iter().map(|(x, w)| Part::weighted(Feature::dense(vec![*x]), *w)).collect())
    };
    shard.insert("exact", "", weighted(&[(0.0, 1.0), (4.0, 1.0)])).unwrap();
    shard.insert("shifted", "", weighted(&[(1.0, 1.0), (5.0, 1.0)])).unwrap();

    let q = weighted(&[(0.0, 2.0), (4.0, 2.0)]);
    let hits = shard.search(&q, &ShardQuery { hint_k: Some(10), ..Default::default() }).unwrap().hits;
    assert_eq!(hits[0].key, "exact");
    assert!(hits[0].score.abs() < 1e-5);
    assert_eq!(hits[1].key, "shifted");
    assert!((hits[1].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_similarity_params_are_validated() {
    let dir = TempDir::new().unwrap();
    let shard = open(&config(1), &dir);
    let q = Object::single(Feature::dense(vec![0.0]));
    let err = shard.search(&q, &ShardQuery { params: "p=1".into(), ..Default::default() }).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Request);
}

fn graph_config(dim: usize, min_index_size: usize) -> Config {
    let mut config = config(dim);
    config.index.graph.min_index_size = min_index_size;
    config.index.graph.pool_size = 16;
    config.index.graph.degree = 8;
    config.index.graph.search_seeds = 1000;
    config.index.graph.search_pool = 1000;
    config
}

#[test]
fn test_concurrent_syncs_all_succeed() {
    let dim = 3;
    let dir = TempDir::new().unwrap();
    let config = graph_config(dim, 20);
    let shard = Arc::new(open(&config, &dir));
    let mut rng = StdRng::seed_from_u64(12);
    for i in 0..200 {
        shard.insert(&format!("k{}", i), "", random_point(&mut rng, dim)).unwrap();
    }
    shard.reindex().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let shard = shard.clone();
            thread::spawn(move || (0..20).filter(|_| shard.sync().is_err()).count())
        })
        .collect();
    let failures: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(failures, 0);
    drop(shard);

    let leftovers: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name != "journal.log" && name != "index.bin" && name != "index.bin.meta")
        .collect();
    assert!(leftovers.is_empty(), "{:?}", leftovers);
    let shard = open(&config, &dir);
    assert_eq!(shard.stats().indexed, 200);
}

#[test]
fn test_ids_follow_insert_order_under_concurrent_search() {
    let dim = 2;
    let dir = TempDir::new().unwrap();
    let shard = Arc::new(open(&config(dim), &dir));
    let total = 300;

    let writer = {
        let shard = shard.clone();
        thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(30);
            for i in 0..total {
                shard.insert(&format!("k{}", i), "", random_point(&mut rng, dim)).unwrap();
            }
        })
    };
    let readers: Vec<_> = (0..4u64)
        .map(|t| {
            let shard = shard.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(100 + t);
                for _ in 0..100 {
                    let q = random_point(&mut rng, dim);
                    let hits = shard.search(&q, &query(5)).unwrap().hits;
                    assert!(hits.len() <= 5);
                    assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
                }
            })
        })
        .collect();
    writer.join().unwrap();
    for r in readers {
        r.join().unwrap();
    }

    assert_eq!(shard.len(), total);
    for i in 0..total {
        assert_eq!(shard.get(&format!("k{}", i)).unwrap().id as usize, i);
    }
}

#[test]
fn test_search_results_survive_replay_and_reindex() {
    let dim = 4;
    let dir = TempDir::new().unwrap();
    let config = graph_config(dim, 40);
    let mut rng = StdRng::seed_from_u64(77);
    let queries: Vec<Object> = (0..8).map(|_| random_point(&mut rng, dim)).collect();

    let before: Vec<_> = {
        let shard = open(&config, &dir);
        for i in 0..120 {
            shard.insert(&format!("k{}", i), &format!("m{}", i), random_point(&mut rng, dim)).unwrap();
        }
        shard.reindex().unwrap();
        queries.iter().map(|q| shard.search(q, &query(6)).unwrap().hits).collect()
    };

    // No sync: the graph comes back from the journal alone.
    assert!(!dir.path().join("index.bin").exists());
    let shard = open(&config, &dir);
    shard.reindex().unwrap();
    assert_eq!(shard.stats().indexed, 120);
    let after: Vec<_> = queries.iter().map(|q| shard.search(q, &query(6)).unwrap().hits).collect();
    assert_eq!(before, after);
}

#[test]
fn test_failed_clear_keeps_records() {
    let dir = TempDir::new().unwrap();
    let config = config(2);
    let shard = open(&config, &dir);
    shard.insert("a", "", Object::single(Feature::dense(vec![0.0, 0.0]))).unwrap();
    shard.insert("b", "", Object::single(Feature::dense(vec![1.0, 0.0]))).unwrap();

    // A directory where the snapshot file should be makes removal fail.
    std::fs::create_dir(dir.path().join("index.bin")).unwrap();
    std::fs::write(dir.path().join("index.bin").join("keep"), b"x").unwrap();
    assert!(shard.clear().is_err());

    assert_eq!(shard.len(), 2);
    assert_eq!(shard.get("b").unwrap().id, 1);
    drop(shard);
    std::fs::remove_dir_all(dir.path().join("index.bin")).unwrap();
    assert_eq!(open(&config, &dir).len(), 2);
}
