use serde::{Serialize, Deserialize};
use crate::feature::object::Object;

/// Dense, zero-based internal id. Never reused within a shard.
pub type ObjectId = u32;

/// External tenant/database identifier.
pub type DbId = i32;

/// A stored object plus its unique key.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: ObjectId,
    pub key: String,
    pub meta: String,
    pub object: Object,
}

/// Externally visible search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub key: String,
    pub meta: String,
    pub score: f32,
    pub details: String,
}

/// Where an object comes from: raw media (through the extractor) or
/// pre-encoded bytes, given inline or by path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRequest {
    pub raw: bool,
    pub url: String,
    pub content: Vec<u8>,
    pub type_hint: String,
}

impl ObjectRequest {
    pub fn encoded(content: Vec<u8>) -> Self {
        ObjectRequest { raw: false, content, ..Default::default() }
    }

    pub fn raw(content: Vec<u8>, type_hint: &str) -> Self {
        ObjectRequest { raw: true, content, type_hint: type_hint.to_string(), ..Default::default() }
    }

    pub fn path(path: &str, raw: bool) -> Self {
        ObjectRequest { raw, url: path.to_string(), ..Default::default() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertRequest {
    pub db: DbId,
    pub key: String,
    pub meta: String,
    pub object: ObjectRequest,
}

/// Seconds spent in each insert stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsertResponse {
    pub time: f64,
    pub load_time: f64,
    pub journal_time: f64,
    pub index_time: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    pub db: DbId,
    pub object: ObjectRequest,
    pub k: Option<usize>,
    pub r: Option<f32>,
    pub hint_k: Option<usize>,
    pub hint_r: Option<f32>,
    pub params: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub time: f64,
    pub load_time: f64,
    pub filter_time: f64,
    pub rank_time: f64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    pub db: DbId,
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchEntry {
    pub key: String,
    pub meta: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchResponse {
    pub entries: Vec<FetchEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiscMethod {
    Reindex,
    Clear,
    Sync,
}

impl MiscMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "reindex" => Some(MiscMethod::Reindex),
            "clear" => Some(MiscMethod::Clear),
            "sync" => Some(MiscMethod::Sync),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiscRequest {
    pub db: DbId,
    pub method: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiscResponse {
    pub code: i32,
    pub text: String,
}
