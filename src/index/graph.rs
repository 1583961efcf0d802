use std::fs;
use std::path::Path;
use crate::core::config::{Config, GraphConfig};
use crate::core::error::{Error, Result};
use crate::core::stats::Timer;
use crate::core::types::ObjectId;
use crate::feature::similarity::{Similarity, SimilarityParams};
use crate::feature::vector::Feature;
use crate::index::nndescent::{self, KnnGraph};
use crate::index::{Index, Match, SearchParams};
use crate::storage::layout::sidecar;
use crate::storage::record_store::RecordStore;
use crate::storage::snapshot::{read_blob, write_atomic, write_blob};

const SNAPSHOT_MAGIC: &[u8; 4] = b"KNNG";

/// kNN-graph index with a linearly scanned tail.
///
/// Entries `[0, indexed)` are reachable through the graph built by the last
/// rebuild; later entries are scanned one by one until the next rebuild.
/// In linear mode no graph is ever built.
pub struct GraphIndex {
    similarity: Similarity,
    config: GraphConfig,
    linear: bool,
    entries: Vec<(ObjectId, u32)>,
    indexed: usize,
    graph: Option<KnnGraph>,
}

impl GraphIndex {
    pub fn new(config: &Config, linear: bool) -> Self {
        GraphIndex {
            similarity: config.similarity,
            config: config.index.graph.clone(),
            linear,
            entries: Vec::new(),
            indexed: 0,
            graph: None,
        }
    }

    fn resolve<'a>(&self, store: &'a RecordStore, entry: usize) -> Option<&'a Feature> {
        let (object, tag) = self.entries[entry];
        store.feature(object, tag)
    }

    fn load(&self, path: &Path) -> Result<(KnnGraph, usize)> {
        let watermark: usize = fs::read_to_string(sidecar(path))?
            .trim()
            .parse()
            .map_err(|e| Error::internal(format!("bad index sidecar: {}", e)))?;
        let graph: KnnGraph = bincode::deserialize(&read_blob(path, SNAPSHOT_MAGIC)?)?;
        if graph.len() != watermark || watermark > self.entries.len() || !graph.is_consistent() {
            return Err(Error::internal(format!(
                "snapshot covers {} nodes, sidecar says {}, index holds {}",
                graph.len(), watermark, self.entries.len()
            )));
        }
        Ok((graph, watermark))
    }
}

impl Index for GraphIndex {
    fn search(&self, store: &RecordStore, query: &Feature, params: &SearchParams) -> Result<Vec<Match>> {
        if let Some(&(object, _)) = self.entries.last() {
            if object as usize >= store.len() {
                return Err(Error::internal("index refers to records missing from the store"));
            }
        }
        let polarity = self.similarity.polarity();
        let max_cost = polarity.to_cost(params.r);
        let cost = |entry: usize| match self.resolve(store, entry) {
            Some(f) => polarity.to_cost(self.similarity.apply(f, query, &params.similarity)),
            None => f32::INFINITY,
        };

        let mut found: Vec<(usize, f32)> = Vec::new();
        if let Some(graph) = &self.graph {
            found.extend(
                graph
                    .search(cost, params.k, max_cost, self.config.search_pool, self.config.search_seeds, self.config.seed)
                    .into_iter()
                    .map(|(node, c)| (node as usize, c)),
            );
        }
        for entry in self.indexed..self.entries.len() {
            let c = cost(entry);
            if c <= max_cost {
                found.push((entry, c));
            }
        }
        found.sort_by(|a, b| a.1.total_cmp(&b.1));
        found.truncate(params.k);

        Ok(found
            .into_iter()
            .map(|(entry, c)| {
                let (object, tag) = self.entries[entry];
                Match { object, tag, score: polarity.from_cost(c) }
            })
            .collect())
    }

    fn insert(&mut self, object: ObjectId, tag: u32, _feature: &Feature) -> Result<()> {
        self.entries.push((object, tag));
        Ok(())
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.indexed = 0;
        self.graph = None;
    }

    fn rebuild(&mut self, store: &RecordStore) -> Result<()> {
        if self.linear {
            return Ok(());
        }
        let n = self.entries.len();
        if n == self.indexed {
            tracing::debug!("Graph index up to date at {} entries", n);
            return Ok(());
        }
        if n < self.config.min_index_size {
            tracing::debug!("{} entries below min_index_size {}, scanning linearly", n, self.config.min_index_size);
            self.graph = None;
            self.indexed = 0;
            return Ok(());
        }

        let features = (0..n)
            .map(|i| self.resolve(store, i).ok_or_else(|| Error::internal(format!("entry {} has no feature", i))))
            .collect::<Result<Vec<&Feature>>>()?;
        let polarity = self.similarity.polarity();
        let params = SimilarityParams::default();
        let similarity = self.similarity;

        tracing::info!("Rebuilding graph index over {} features", n);
        let timer = Timer::start();
        let graph = nndescent::build(
            n,
            |a, b| polarity.to_cost(similarity.apply(features[a], features[b], &params)),
            &self.config,
        );
        self.graph = Some(graph);
        self.indexed = n;
        tracing::info!("Graph index rebuilt in {:.3}s", timer.elapsed());
        Ok(())
    }

    fn snapshot(&self, path: &Path) -> Result<()> {
        match &self.graph {
            Some(graph) if !self.linear => {
                write_blob(path, SNAPSHOT_MAGIC, &bincode::serialize(graph)?)?;
                write_atomic(&sidecar(path), self.indexed.to_string().as_bytes())?;
                tracing::debug!("Graph snapshot written: {} nodes", graph.len());
            }
            _ => {
                for stale in [path.to_path_buf(), sidecar(path)] {
                    match fs::remove_file(&stale) {
                        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                        _ => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn recover(&mut self, store: &RecordStore, path: &Path) -> Result<()> {
        if self.linear {
            return Ok(());
        }
        match self.load(path) {
            Ok((graph, watermark)) => {
                tracing::info!("Graph index restored from snapshot: {} of {} entries", watermark, self.entries.len());
                self.graph = Some(graph);
                self.indexed = watermark;
                Ok(())
            }
            Err(e) => {
                tracing::info!("No usable graph snapshot at {:?} ({}), rebuilding", path, e);
                self.graph = None;
                self.indexed = 0;
                self.rebuild(store)
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn indexed(&self) -> usize {
        self.indexed
    }
}
