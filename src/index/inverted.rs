use std::collections::HashMap;
use std::path::Path;
use crate::core::error::Result;
use crate::core::types::ObjectId;
use crate::feature::vector::Feature;
use crate::index::{Index, Match, SearchParams};
use crate::storage::record_store::RecordStore;

/// Exact-value index for discrete features.
///
/// Each bin maps a feature's byte image to the `(object, tag)` pairs that
/// produced it. The score of a match is the bin's size, a density signal
/// rather than a metric.
#[derive(Debug, Default)]
pub struct InvertedIndex {
    bins: HashMap<Box<[u8]>, Vec<(ObjectId, u32)>>,
    entries: usize,
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex::default()
    }

    /// Number of distinct feature values.
    pub fn bins(&self) -> usize {
        self.bins.len()
    }
}

impl Index for InvertedIndex {
    fn search(&self, _store: &RecordStore, query: &Feature, _params: &SearchParams) -> Result<Vec<Match>> {
        let Some(bin) = self.bins.get(&query.key_bytes()) else {
            return Ok(Vec::new());
        };
        let score = bin.len() as f32;
        Ok(bin.iter().map(|&(object, tag)| Match { object, tag, score }).collect())
    }

    fn insert(&mut self, object: ObjectId, tag: u32, feature: &Feature) -> Result<()> {
        self.bins.entry(feature.key_bytes()).or_default().push((object, tag));
        self.entries += 1;
        Ok(())
    }

    fn clear(&mut self) {
        self.bins.clear();
        self.entries = 0;
    }

    fn rebuild(&mut self, _store: &RecordStore) -> Result<()> {
        tracing::info!("Inverted index holds {} entries in {} bins, nothing to rebuild", self.entries, self.bins.len());
        Ok(())
    }

    fn snapshot(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn recover(&mut self, _store: &RecordStore, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::similarity::SimilarityParams;

    #[test]
    fn test_exact_lookup_scores_by_bin_size() {
        let mut index = InvertedIndex::new();
        let a = Feature::discrete(vec![1, 2, 3]);
        let b = Feature::discrete(vec![1, 2, 4]);
        index.insert(0, 0, &a).unwrap();
        index.insert(1, 2, &a).unwrap();
        index.insert(2, 0, &b).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.bins(), 2);

        let store = RecordStore::new();
        let params = SearchParams { k: 1, r: 0.0, similarity: SimilarityParams::default() };
        let hits = index.search(&store, &a, &params).unwrap();
        assert_eq!(hits, vec![
            Match { object: 0, tag: 0, score: 2.0 },
            Match { object: 1, tag: 2, score: 2.0 },
        ]);
        let miss = Feature::discrete(vec![9, 9, 9]);
        assert!(index.search(&store, &miss, &params).unwrap().is_empty());

        index.clear();
        assert!(index.search(&store, &a, &params).unwrap().is_empty());
    }
}
