use std::collections::HashMap;
use std::mem::size_of;
use std::path::Path;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::core::config::{Config, LshConfig};
use crate::core::error::{Error, Result};
use crate::core::types::ObjectId;
use crate::feature::similarity::Similarity;
use crate::feature::vector::{ElementType, Feature};
use crate::index::{Index, Match, SearchParams};
use crate::storage::record_store::RecordStore;

/// Slots per block.
const BLOCK_SLOTS: usize = 31;
const NIL: i32 = -1;

/// Fixed-size chunk of a bucket's slot list.
#[derive(Debug, Clone, Copy)]
struct Block {
    slots: [u32; BLOCK_SLOTS],
    next: i32,
}

impl Block {
    const EMPTY: Block = Block { slots: [0; BLOCK_SLOTS], next: NIL };
}

/// Singly linked list of blocks. Only the last block may be partly filled.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    first: i32,
    last: i32,
    count: u32,
    tail: u32,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    object: ObjectId,
    tag: u32,
}

/// One hash function per table, each producing `bits` bits.
enum Hasher {
    /// Sign of random projections.
    Planes(Vec<Vec<f32>>),
    /// Sampled bit positions.
    BitSample(Vec<usize>),
    /// Sampled dimensions, each value mixed with a salt.
    ValueSample(Vec<(usize, u64)>),
}

impl Hasher {
    fn new(similarity: Similarity, element: ElementType, dim: usize, tables: usize, bits: u32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let count = tables * bits as usize;
        match (similarity, element) {
            (Similarity::TypeHamming, _) => Hasher::ValueSample(
                (0..count).map(|_| (rng.gen_range(0..dim), rng.r#gen::<u64>())).collect(),
            ),
            (_, ElementType::Bits) => Hasher::BitSample((0..count).map(|_| rng.gen_range(0..dim * 64)).collect()),
            _ => Hasher::Planes(
                (0..count).map(|_| (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect()).collect(),
            ),
        }
    }

    fn bit(&self, feature: &Feature, i: usize) -> bool {
        match self {
            Hasher::Planes(planes) => feature.project(&planes[i]) >= 0.0,
            Hasher::BitSample(positions) => feature.bit(positions[i]),
            Hasher::ValueSample(samples) => {
                let (d, salt) = samples[i];
                mix(feature.element_bits(d) ^ salt) & 1 == 1
            }
        }
    }

    fn hash(&self, feature: &Feature, table: usize, bits: u32) -> usize {
        let base = table * bits as usize;
        (0..bits as usize).fold(0usize, |h, b| (h << 1) | self.bit(feature, base + b) as usize)
    }
}

/// splitmix64 finalizer.
fn mix(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Multi-table LSH over an arena sized once at construction.
///
/// Record and block storage never grow past the capacity derived from
/// `lsh.allocate`; an insert that would exceed it fails with an
/// out-of-memory error and leaves the index untouched.
pub struct LshIndex {
    similarity: Similarity,
    config: LshConfig,
    hasher: Hasher,
    tables: Vec<Vec<Bucket>>,
    blocks: Vec<Block>,
    records: Vec<Entry>,
    max_blocks: usize,
    max_records: usize,
}

impl LshIndex {
    pub fn new(config: &Config) -> Result<Self> {
        let lsh = config.index.lsh.clone();
        let table_size = 1usize << lsh.bits;
        let block_overhead = lsh.tables * table_size;
        let overhead_bytes = block_overhead * size_of::<Block>();
        if lsh.allocate <= overhead_bytes {
            return Err(Error::config(format!(
                "lsh.allocate of {} bytes cannot hold {} empty buckets", lsh.allocate, block_overhead
            )));
        }
        let max_records = (lsh.allocate - overhead_bytes) * BLOCK_SLOTS
            / (size_of::<Block>() * lsh.tables + size_of::<Entry>() * BLOCK_SLOTS);
        let max_blocks = block_overhead + max_records * lsh.tables / BLOCK_SLOTS;

        let hasher = Hasher::new(
            config.similarity, config.object.element, config.object.dim, lsh.tables, lsh.bits, lsh.seed,
        );
        let mut index = LshIndex {
            similarity: config.similarity,
            config: lsh,
            hasher,
            tables: Vec::new(),
            blocks: Vec::with_capacity(max_blocks),
            records: Vec::with_capacity(max_records),
            max_blocks,
            max_records,
        };
        index.reset();
        tracing::debug!(
            "LSH arena: {} records, {} blocks ({} tables x {} buckets)",
            max_records, max_blocks, index.config.tables, table_size
        );
        Ok(index)
    }

    pub fn capacity(&self) -> usize {
        self.max_records
    }

    /// Every bucket starts with one empty block.
    fn reset(&mut self) {
        let table_size = 1usize << self.config.bits;
        self.blocks.clear();
        self.records.clear();
        self.tables = (0..self.config.tables)
            .map(|_| {
                (0..table_size)
                    .map(|_| {
                        let at = self.blocks.len() as i32;
                        self.blocks.push(Block::EMPTY);
                        Bucket { first: at, last: at, count: 0, tail: 0 }
                    })
                    .collect()
            })
            .collect();
    }

    fn hashes(&self, feature: &Feature) -> Vec<usize> {
        (0..self.config.tables)
            .map(|t| self.hasher.hash(feature, t, self.config.bits))
            .collect()
    }

    fn out_of_memory(&self) -> Error {
        Error::out_of_memory(format!("LSH arena full: {} records, {} blocks", self.records.len(), self.blocks.len()))
    }

    /// Caller has checked capacity.
    fn add_to_bucket(&mut self, table: usize, hash: usize, slot: u32) {
        let mut bucket = self.tables[table][hash];
        if bucket.tail as usize >= BLOCK_SLOTS {
            let at = self.blocks.len() as i32;
            self.blocks.push(Block::EMPTY);
            self.blocks[bucket.last as usize].next = at;
            bucket.last = at;
            bucket.tail = 0;
        }
        self.blocks[bucket.last as usize].slots[bucket.tail as usize] = slot;
        bucket.tail += 1;
        bucket.count += 1;
        self.tables[table][hash] = bucket;
    }
}

impl Index for LshIndex {
    fn search(&self, store: &RecordStore, query: &Feature, params: &SearchParams) -> Result<Vec<Match>> {
        let polarity = self.similarity.polarity();
        let mut found = Vec::new();
        for (table, hash) in self.hashes(query).into_iter().enumerate() {
            let bucket = &self.tables[table][hash];
            let mut seen = 0u32;
            let mut at = bucket.first;
            while at != NIL {
                let block = &self.blocks[at as usize];
                let used = if at == bucket.last { bucket.tail as usize } else { BLOCK_SLOTS };
                for &slot in &block.slots[..used] {
                    let entry = self.records[slot as usize];
                    let feature = store
                        .feature(entry.object, entry.tag)
                        .ok_or_else(|| Error::internal("LSH entry refers to a missing record"))?;
                    let score = self.similarity.apply(feature, query, &params.similarity);
                    if polarity.passes(score, params.r) {
                        found.push(Match { object: entry.object, tag: entry.tag, score });
                    }
                    seen += 1;
                }
                at = block.next;
            }
            debug_assert_eq!(seen, bucket.count);
        }
        found.sort_by(|a, b| polarity.rank(a.score, b.score));
        found.truncate(params.k);
        Ok(found)
    }

    fn ensure_capacity(&self, features: &[&Feature]) -> Result<()> {
        if self.records.len() + features.len() > self.max_records {
            return Err(self.out_of_memory());
        }
        let mut pending: HashMap<(usize, usize), u32> = HashMap::new();
        let mut new_blocks = 0usize;
        for feature in features {
            for (table, hash) in self.hashes(feature).into_iter().enumerate() {
                let added = pending.entry((table, hash)).or_insert(0);
                let tail = self.tables[table][hash].tail as usize + *added as usize;
                if tail >= BLOCK_SLOTS && (tail - BLOCK_SLOTS) % BLOCK_SLOTS == 0 {
                    new_blocks += 1;
                }
                *added += 1;
            }
        }
        if self.blocks.len() + new_blocks > self.max_blocks {
            return Err(self.out_of_memory());
        }
        Ok(())
    }

    fn insert(&mut self, object: ObjectId, tag: u32, feature: &Feature) -> Result<()> {
        self.ensure_capacity(&[feature])?;
        let slot = self.records.len() as u32;
        self.records.push(Entry { object, tag });
        for (table, hash) in self.hashes(feature).into_iter().enumerate() {
            self.add_to_bucket(table, hash, slot);
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.reset();
    }

    fn rebuild(&mut self, _store: &RecordStore) -> Result<()> {
        tracing::debug!("LSH index is always current, nothing to rebuild");
        Ok(())
    }

    fn snapshot(&self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn recover(&mut self, _store: &RecordStore, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::IndexKind;
    use crate::core::error::ErrorKind;
    use crate::core::types::Record;
    use crate::feature::object::Object;
    use crate::feature::similarity::SimilarityParams;

    fn config(bits: u32, allocate: usize) -> Config {
        let mut config = Config::default();
        config.object.dim = 4;
        config.index.kind = IndexKind::Lsh;
        config.index.lsh = LshConfig { tables: 2, bits, allocate, seed: 5 };
        config
    }

    fn push(index: &mut LshIndex, store: &mut RecordStore, f: Feature) -> Result<()> {
        let id = store.next_id();
        index.insert(id, 0, &f)?;
        store.push(Record { id, key: id.to_string(), meta: String::new(), object: Object::single(f) });
        Ok(())
    }

    #[test]
    fn test_too_small_arena_is_config_error() {
        let err = LshIndex::new(&config(4, 16)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Config);
    }

    #[test]
    fn test_identical_features_collide_in_every_table() {
        let mut index = LshIndex::new(&config(4, 64 * 1024)).unwrap();
        let mut store = RecordStore::new();
        let f = Feature::dense(vec![0.3, -0.2, 0.9, 0.1]);
        push(&mut index, &mut store, f.clone()).unwrap();
        push(&mut index, &mut store, Feature::dense(vec![-5.0, 4.0, -3.0, 2.0])).unwrap();

        let params = SearchParams { k: 10, r: 0.5, similarity: SimilarityParams::default() };
        let hits = index.search(&store, &f, &params).unwrap();
        // One hit per table, duplicates left to the caller.
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|m| m.object == 0 && m.score == 0.0));
    }

    #[test]
    fn test_blocks_chain_past_one_block() {
        // Single bucket per table, so every record lands in the same chain.
        let mut config = config(1, 64 * 1024);
        config.index.lsh.tables = 1;
        let mut index = LshIndex::new(&config).unwrap();
        let mut store = RecordStore::new();
        let f = Feature::dense(vec![1.0, 1.0, 1.0, 1.0]);
        for _ in 0..100 {
            push(&mut index, &mut store, f.clone()).unwrap();
        }
        let params = SearchParams { k: 1000, r: f32::MAX, similarity: SimilarityParams::default() };
        assert_eq!(index.search(&store, &f, &params).unwrap().len(), 100);
        let params = SearchParams { k: 7, ..params };
        assert_eq!(index.search(&store, &f, &params).unwrap().len(), 7);
    }

    #[test]
    fn test_exhaustion_is_out_of_memory_without_partial_state() {
        let mut index = LshIndex::new(&config(2, 4096)).unwrap();
        let capacity = index.capacity();
        assert!(capacity > 0);
        let mut store = RecordStore::new();
        let f = Feature::dense(vec![0.5, 0.5, 0.5, 0.5]);
        for _ in 0..capacity {
            push(&mut index, &mut store, f.clone()).unwrap();
        }
        let err = push(&mut index, &mut store, f.clone()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::OutOfMemory);
        assert_eq!(index.len(), capacity);
        assert!(index.ensure_capacity(&[&f]).is_err());

        index.clear();
        assert_eq!(index.len(), 0);
        assert!(index.ensure_capacity(&[&f, &f]).is_ok());
    }

    #[test]
    fn test_bit_features_hash_by_sampled_bits() {
        let mut config = config(3, 64 * 1024);
        config.object.element = ElementType::Bits;
        config.object.dim = 1;
        config.similarity = Similarity::Hamming;
        let mut index = LshIndex::new(&config).unwrap();
        let mut store = RecordStore::new();
        let f = Feature::bits(vec![0xf0f0_f0f0_f0f0_f0f0]);
        push(&mut index, &mut store, f.clone()).unwrap();
        let params = SearchParams { k: 5, r: 0.0, similarity: SimilarityParams::default() };
        let hits = index.search(&store, &f, &params).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
