pub mod graph;
pub mod nndescent;
pub mod lsh;
pub mod inverted;

use std::path::Path;
use crate::core::config::{Config, IndexKind};
use crate::core::error::{Error, Result};
use crate::core::types::ObjectId;
use crate::feature::similarity::SimilarityParams;
use crate::feature::vector::Feature;
use crate::storage::record_store::RecordStore;

/// One index hit for one query feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub object: ObjectId,
    pub tag: u32,
    pub score: f32,
}

/// Effective bounds of one index lookup.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub k: usize,
    pub r: f32,
    pub similarity: SimilarityParams,
}

/// Deployment defaults substituted for absent or non-finite hints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexDefaults {
    pub k: usize,
    pub r: f32,
}

impl IndexDefaults {
    pub fn new(k: usize, r: f32) -> Result<Self> {
        if k == 0 {
            return Err(Error::config("default hint K must be positive"));
        }
        if !r.is_finite() {
            return Err(Error::config("default hint R must be finite"));
        }
        Ok(IndexDefaults { k, r })
    }

    /// Without a configured `hint_r` every finite score passes.
    pub fn from_config(config: &Config) -> Result<Self> {
        let r = config
            .defaults
            .hint_r
            .unwrap_or_else(|| config.similarity.polarity().loosest());
        IndexDefaults::new(config.defaults.hint_k, r)
    }

    pub fn resolve(&self, hint_k: Option<usize>, hint_r: Option<f32>, similarity: SimilarityParams) -> SearchParams {
        SearchParams {
            k: hint_k.filter(|k| *k > 0).unwrap_or(self.k),
            r: hint_r.filter(|r| r.is_finite()).unwrap_or(self.r),
            similarity,
        }
    }
}

/// Pluggable feature index.
///
/// Entries are `(object, tag)` pairs; features are resolved through the
/// shard's [`RecordStore`], which only grows. Implementations do no locking
/// of their own and rely on the owning shard's lock.
pub trait Index: Send + Sync {
    fn search(&self, store: &RecordStore, query: &Feature, params: &SearchParams) -> Result<Vec<Match>>;

    /// Fail without side effects if these features cannot all be inserted.
    fn ensure_capacity(&self, _features: &[&Feature]) -> Result<()> {
        Ok(())
    }

    fn insert(&mut self, object: ObjectId, tag: u32, feature: &Feature) -> Result<()>;

    fn clear(&mut self);

    fn rebuild(&mut self, store: &RecordStore) -> Result<()>;

    fn snapshot(&self, path: &Path) -> Result<()>;

    fn recover(&mut self, store: &RecordStore, path: &Path) -> Result<()>;

    /// Number of inserted entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries covered by a prebuilt structure.
    fn indexed(&self) -> usize {
        0
    }
}

pub fn create_index(config: &Config) -> Result<Box<dyn Index>> {
    Ok(match config.index.kind {
        IndexKind::Graph => Box::new(graph::GraphIndex::new(config, false)),
        IndexKind::Linear => Box::new(graph::GraphIndex::new(config, true)),
        IndexKind::Lsh => Box::new(lsh::LshIndex::new(config)?),
        IndexKind::Inverted => Box::new(inverted::InvertedIndex::new()),
    })
}
