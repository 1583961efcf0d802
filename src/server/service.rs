use std::fs;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::stats::{PingResponse, Timer};
use crate::core::types::*;
use crate::feature::object::Object;
use crate::server::extractor::Extractor;
use crate::server::shard::{Shard, ShardQuery};
use crate::server::translator::NameTranslator;
use crate::storage::layout::StorageLayout;

/// Operations exposed to RPC front ends.
pub trait Service: Send + Sync {
    fn ping(&self) -> Result<PingResponse>;
    fn insert(&self, request: &InsertRequest) -> Result<InsertResponse>;
    fn search(&self, request: &SearchRequest) -> Result<SearchResponse>;
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
    fn misc(&self, request: &MiscRequest) -> Result<MiscResponse>;
}

const REMOTE_SCHEMES: [&str; 3] = ["http://", "https://", "ftp://"];

/// Routes requests for external db ids to shards.
///
/// Shards that already have a db mapped are opened by [`Server::new`];
/// a shard assigned later is opened on its first insert.
pub struct Server {
    config: Config,
    storage: StorageLayout,
    translator: NameTranslator,
    extractor: Box<dyn Extractor>,
    shards: Vec<RwLock<Option<Arc<Shard>>>>,
    started: PingResponse,
}

impl Server {
    pub fn new(config: Config, extractor: Box<dyn Extractor>) -> Result<Self> {
        config.validate()?;
        let storage = StorageLayout::new(config.root.clone(), !config.readonly)?;
        let translator = NameTranslator::open(&storage.mapping_path(), config.max_shards, config.readonly)?;
        let started = record_start(&storage.state_path(), config.readonly)?;
        let shards = (0..config.max_shards).map(|_| RwLock::new(None)).collect();

        let server = Server { config, storage, translator, extractor, shards, started };
        for (db, internal) in server.translator.mappings() {
            tracing::debug!("Opening shard {} for db {}", internal, db);
            server.shard(internal)?;
        }
        tracing::info!(
            "Server started at {:?}: {} dbs, restart #{}{}",
            server.storage.base_dir,
            server.translator.len(),
            server.started.restart_count,
            if server.config.readonly { ", read-only" } else { "" }
        );
        Ok(server)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shard `internal`, opened if its slot is still empty.
    pub fn shard(&self, internal: u16) -> Result<Arc<Shard>> {
        let slot = self
            .shards
            .get(internal as usize)
            .ok_or_else(|| Error::internal(format!("shard {} out of range", internal)))?;
        if let Some(shard) = slot.read().as_ref() {
            return Ok(shard.clone());
        }
        let mut slot = slot.write();
        if let Some(shard) = slot.as_ref() {
            return Ok(shard.clone());
        }
        let shard = Arc::new(Shard::open(&self.config, internal, self.storage.shard(internal)?)?);
        *slot = Some(shard.clone());
        Ok(shard)
    }

    fn shard_for(&self, db: DbId) -> Result<Arc<Shard>> {
        self.shard(self.translator.lookup(db)?)
    }

    /// Resolve an object request into an object.
    ///
    /// Raw sources go through the extractor; encoded ones are decoded with
    /// the deployment's object layout. Remote URLs are never fetched.
    pub fn load_object(&self, request: &ObjectRequest) -> Result<Object> {
        let has_url = !request.url.is_empty();
        let has_content = !request.content.is_empty();
        if has_url && has_content {
            return Err(Error::request("object request sets both url and content"));
        }
        if has_url && REMOTE_SCHEMES.iter().any(|s| request.url.starts_with(s)) {
            return Err(Error::external(format!("cannot fetch remote object {}", request.url)));
        }
        let object = match (request.raw, has_url, has_content) {
            (true, false, true) => self.extractor.extract(&request.content, &request.type_hint, &self.config.tmp_dir)?,
            (true, true, false) => self.extractor.extract_path(Path::new(&request.url), &request.type_hint)?,
            (false, false, true) => self.config.object.decode_slice(&request.content)?,
            (false, true, false) => self.config.object.decode_slice(&fs::read(&request.url)?)?,
            _ => return Err(Error::request("object request has neither url nor content")),
        };
        self.config.object.check(&object)?;
        Ok(object)
    }
}

impl Service for Server {
    fn ping(&self) -> Result<PingResponse> {
        Ok(self.started.clone())
    }

    fn insert(&self, request: &InsertRequest) -> Result<InsertResponse> {
        if self.config.readonly {
            return Err(Error::permission("server is read-only"));
        }
        let timer = Timer::start();
        let object = self.load_object(&request.object)?;
        let load_time = timer.elapsed();
        let shard = self.shard(self.translator.lookup_with_insert(request.db)?)?;
        let timings = shard.insert(&request.key, &request.meta, object)?;
        Ok(InsertResponse {
            time: timer.elapsed(),
            load_time,
            journal_time: timings.journal_time,
            index_time: timings.index_time,
        })
    }

    fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let timer = Timer::start();
        let shard = self.shard_for(request.db)?;
        let load = Timer::start();
        let query = self.load_object(&request.object)?;
        let load_time = load.elapsed();
        let outcome = shard.search(&query, &ShardQuery {
            k: request.k,
            r: request.r,
            hint_k: request.hint_k,
            hint_r: request.hint_r,
            params: request.params.clone(),
        })?;
        Ok(SearchResponse {
            time: timer.elapsed(),
            load_time,
            filter_time: outcome.filter_time,
            rank_time: outcome.rank_time,
            hits: outcome.hits,
        })
    }

    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let shard = self.shard_for(request.db)?;
        Ok(FetchResponse { entries: shard.fetch(&request.keys) })
    }

    fn misc(&self, request: &MiscRequest) -> Result<MiscResponse> {
        let method = MiscMethod::parse(&request.method)
            .ok_or_else(|| Error::request(format!("unknown misc method: {:?}", request.method)))?;
        let shard = self.shard_for(request.db)?;
        match method {
            MiscMethod::Reindex => shard.reindex()?,
            MiscMethod::Clear => shard.clear()?,
            MiscMethod::Sync => shard.sync()?,
        }
        Ok(MiscResponse { code: 0, text: serde_json::to_string(&shard.stats())? })
    }
}

/// Update the persisted start history and return it.
fn record_start(path: &Path, readonly: bool) -> Result<PingResponse> {
    let now = chrono::Utc::now().timestamp();
    let previous: Option<PingResponse> = match fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str(&text) {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Ignoring unreadable server state {:?}: {}", path, e);
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };
    let started = PingResponse {
        first_start_time: previous.as_ref().map_or(now, |p| p.first_start_time),
        last_start_time: now,
        restart_count: previous.as_ref().map_or(0, |p| p.restart_count) + 1,
    };
    if !readonly {
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&started)?)?;
        fs::rename(&tmp, path)?;
    }
    Ok(started)
}
