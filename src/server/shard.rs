use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::{ShardStats, Timer};
use crate::core::types::{FetchEntry, Hit, ObjectId, Record};
use crate::feature::object::{Object, ObjectLayout};
use crate::feature::similarity::Similarity;
use crate::feature::vector::Feature;
use crate::index::{create_index, Index, IndexDefaults};
use crate::matcher::{Candidates, Matcher};
use crate::storage::journal::Journal;
use crate::storage::layout::ShardPaths;
use crate::storage::record_store::RecordStore;

/// Caller-supplied search bounds; absent values fall back to shard defaults.
#[derive(Debug, Clone, Default)]
pub struct ShardQuery {
    pub k: Option<usize>,
    pub r: Option<f32>,
    pub hint_k: Option<usize>,
    pub hint_r: Option<f32>,
    pub params: String,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub hits: Vec<Hit>,
    pub filter_time: f64,
    pub rank_time: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsertTimings {
    pub journal_time: f64,
    pub index_time: f64,
}

/// Records, key table and index, guarded together by the shard lock.
struct ShardState {
    records: RecordStore,
    lookup: HashMap<String, ObjectId>,
    index: Box<dyn Index>,
}

impl ShardState {
    fn add(&mut self, key: String, meta: String, object: Object) -> Result<ObjectId> {
        let id = self.records.next_id();
        for (tag, feature) in object.features() {
            self.index.insert(id, tag, feature)?;
        }
        self.records.push(Record { id, key: key.clone(), meta, object });
        self.lookup.insert(key, id);
        Ok(id)
    }
}

/// One independently locked, independently durable partition of the store.
pub struct Shard {
    id: u16,
    layout: ObjectLayout,
    similarity: Similarity,
    matcher: Matcher,
    hint_defaults: IndexDefaults,
    default_k: usize,
    default_r: Option<f32>,
    readonly: bool,
    journal_sync: bool,
    paths: ShardPaths,
    journal: Journal,
    state: RwLock<ShardState>,
    /// Serializes index snapshot writers, which only hold the shared lock.
    snapshot_lock: Mutex<()>,
}

impl Shard {
    /// Open a shard, replaying its journal and restoring the index snapshot.
    pub fn open(config: &Config, id: u16, paths: ShardPaths) -> Result<Self> {
        config.validate()?;
        let matcher = Matcher::from_config(config)?;
        let hint_defaults = IndexDefaults::from_config(config)?;
        let journal = Journal::open(&paths.journal, config.object.clone(), config.readonly)?;

        let mut state = ShardState {
            records: RecordStore::new(),
            lookup: HashMap::new(),
            index: create_index(config)?,
        };
        let timer = Timer::start();
        let mut skipped = 0usize;
        journal.recover(|key, meta, object| {
            if state.lookup.contains_key(&key) {
                tracing::warn!("Shard {}: duplicate key {:?} in journal, skipped", id, key);
                skipped += 1;
                return Ok(());
            }
            let features: Vec<&Feature> = object.parts.iter().map(|p| &p.feature).collect();
            state.index.ensure_capacity(&features)?;
            state.add(key, meta, object)?;
            Ok(())
        })?;
        state.index.recover(&state.records, &paths.index)?;
        tracing::info!(
            "Shard {} opened: {} records, {} features, {} skipped in {:.3}s",
            id, state.records.len(), state.index.len(), skipped, timer.elapsed()
        );

        Ok(Shard {
            id,
            layout: config.object.clone(),
            similarity: config.similarity,
            matcher,
            hint_defaults,
            default_k: config.defaults.k,
            default_r: config.defaults.r,
            readonly: config.readonly,
            journal_sync: config.journal_sync,
            paths,
            journal,
            state: RwLock::new(state),
            snapshot_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(Error::permission(format!("shard {} is read-only", self.id)));
        }
        Ok(())
    }

    /// Journal first, then index and records. A duplicate key changes nothing.
    pub fn insert(&self, key: &str, meta: &str, object: Object) -> Result<InsertTimings> {
        self.check_writable()?;
        if key.is_empty() {
            return Err(Error::request("empty key"));
        }
        self.layout.check(&object)?;

        let mut state = self.state.write();
        if state.lookup.contains_key(key) {
            return Err(Error::request(format!("duplicate key: {}", key)));
        }
        let features: Vec<&Feature> = object.parts.iter().map(|p| &p.feature).collect();
        state.index.ensure_capacity(&features)?;

        let timer = Timer::start();
        self.journal.append(key, meta, &object)?;
        if self.journal_sync {
            self.journal.sync()?;
        }
        let journal_time = timer.elapsed();

        let timer = Timer::start();
        state.add(key.to_string(), meta.to_string(), object)?;
        Ok(InsertTimings { journal_time, index_time: timer.elapsed() })
    }

    pub fn search(&self, query: &Object, request: &ShardQuery) -> Result<SearchOutcome> {
        self.layout.check(query)?;
        let similarity_params = self.similarity.decode_params(&request.params)?;
        let params = self.hint_defaults.resolve(request.hint_k, request.hint_r, similarity_params.clone());

        let timer = Timer::start();
        let candidates = {
            let state = self.state.read();
            let mut candidates = Candidates::new();
            for (tag, feature) in query.features() {
                for m in state.index.search(&state.records, feature, &params)? {
                    candidates.add(tag, &m);
                }
            }
            candidates.attach(&state.records);
            candidates
        };
        let filter_time = timer.elapsed();

        // Records are append-only and reference counted, so ranking runs unlocked.
        let timer = Timer::start();
        let polarity = self.matcher.polarity();
        let r = request
            .r
            .filter(|r| r.is_finite())
            .or(self.default_r)
            .unwrap_or_else(|| polarity.accept_all());
        let k = request.k.filter(|k| *k > 0).unwrap_or(self.default_k);

        let mut hits = Vec::new();
        for candidate in candidates.into_vec() {
            let (score, details) = self.matcher.apply(query, &candidate, &similarity_params)?;
            if !polarity.passes(score, r) {
                continue;
            }
            let record = candidate
                .record
                .ok_or_else(|| Error::internal(format!("candidate {} has no record", candidate.object)))?;
            hits.push(Hit { key: record.key.clone(), meta: record.meta.clone(), score, details });
        }
        hits.sort_by(|a, b| polarity.rank(a.score, b.score));
        hits.truncate(k);

        Ok(SearchOutcome { hits, filter_time, rank_time: timer.elapsed() })
    }

    /// Metadata for the given keys; unknown keys are skipped.
    pub fn fetch(&self, keys: &[String]) -> Vec<FetchEntry> {
        let state = self.state.read();
        keys.iter()
            .filter_map(|key| state.lookup.get(key).and_then(|id| state.records.get(*id)))
            .map(|record| FetchEntry { key: record.key.clone(), meta: record.meta.clone() })
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<Arc<Record>> {
        let state = self.state.read();
        state.lookup.get(key).and_then(|id| state.records.get(*id)).cloned()
    }

    pub fn reindex(&self) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.state.write();
        let state = &mut *guard;
        state.index.rebuild(&state.records)
    }

    /// Drop every record, the index, the journal and the index snapshot.
    pub fn clear(&self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        // Memory is only dropped once the journal is empty.
        for path in [self.paths.index.clone(), self.paths.index_meta()] {
            match fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }
        self.journal.truncate()?;
        state.index.clear();
        state.records.clear();
        state.lookup.clear();
        tracing::info!("Shard {} cleared", self.id);
        Ok(())
    }

    /// Fsync the journal and snapshot the index.
    pub fn sync(&self) -> Result<()> {
        self.check_writable()?;
        let state = self.state.read();
        let _snapshot = self.snapshot_lock.lock();
        self.journal.sync()?;
        state.index.snapshot(&self.paths.index)?;
        tracing::debug!("Shard {} synced", self.id);
        Ok(())
    }

    pub fn stats(&self) -> ShardStats {
        let state = self.state.read();
        ShardStats {
            records: state.records.len(),
            features: state.index.len(),
            indexed: state.index.indexed(),
        }
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::feature::vector::Feature;

    fn config() -> Config {
        let mut config = Config::default();
        config.object.dim = 2;
        config
    }

    fn point(x: f32, y: f32) -> Object {
        Object::single(Feature::dense(vec![x, y]))
    }

    #[test]
    fn test_insert_search_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::open(&config(), 0, ShardPaths::in_dir(dir.path().to_path_buf())).unwrap();
        shard.insert("a", "ma", point(0.0, 0.0)).unwrap();
        shard.insert("b", "mb", point(3.0, 4.0)).unwrap();

        let hits = shard.search(&point(0.0, 0.0), &ShardQuery { hint_k: Some(5), ..Default::default() }).unwrap().hits;
        let keys: Vec<&str> = hits.iter().map(|h| h.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(hits[1].score, 5.0);

        let entries = shard.fetch(&["b".to_string(), "zz".to_string()]);
        assert_eq!(entries, vec![FetchEntry { key: "b".into(), meta: "mb".into() }]);
    }

    #[test]
    fn test_duplicate_key_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::open(&config(), 0, ShardPaths::in_dir(dir.path().to_path_buf())).unwrap();
        shard.insert("a", "", point(0.0, 0.0)).unwrap();
        let journal_len = fs::metadata(dir.path().join("journal.log")).unwrap().len();
        let err = shard.insert("a", "", point(1.0, 1.0)).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Request);
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.stats().features, 1);
        assert_eq!(fs::metadata(dir.path().join("journal.log")).unwrap().len(), journal_len);
    }

    #[test]
    fn test_bad_object_and_empty_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let shard = Shard::open(&config(), 0, ShardPaths::in_dir(dir.path().to_path_buf())).unwrap();
        assert!(shard.insert("", "", point(0.0, 0.0)).is_err());
        let wrong_dim = Object::single(Feature::dense(vec![1.0]));
        assert_eq!(shard.insert("a", "", wrong_dim).unwrap_err().kind, ErrorKind::Request);
        assert!(shard.is_empty());
    }
}
