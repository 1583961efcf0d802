use std::path::{Path, PathBuf};
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::feature::object::ObjectLayout;
use crate::feature::similarity::Similarity;
use crate::feature::vector::ElementType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub root: PathBuf,
    pub max_shards: usize,
    pub readonly: bool,
    pub journal_sync: bool,               // fsync after every append
    pub tmp_dir: PathBuf,                 // extractor scratch files

    pub defaults: SearchDefaults,
    pub object: ObjectLayout,
    pub similarity: Similarity,
    pub matcher: MatcherConfig,
    pub index: IndexConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchDefaults {
    pub k: usize,
    pub r: Option<f32>,
    pub hint_k: usize,
    pub hint_r: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatcherKind {
    Trivial,
    Counting,
    Emd,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub kind: MatcherKind,
    pub extra_mass_penalty: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Graph,
    Linear,
    Lsh,
    Inverted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,
    pub graph: GraphConfig,
    pub lsh: LshConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub min_index_size: usize,   // below this, everything is scanned linearly
    pub iterations: usize,
    pub pool_size: usize,        // L: candidate list per node during construction
    pub degree: usize,           // K: out-degree kept after construction
    pub sample: usize,           // S: new neighbors sampled per round
    pub delta: f32,              // stop when updates < delta * N * L
    pub seed: u64,
    pub search_pool: usize,
    pub search_seeds: usize,     // random entry points per search
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LshConfig {
    pub tables: usize,
    pub bits: u32,
    pub allocate: usize,         // arena bytes, fixed for the index lifetime
    pub seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("./data"),
            max_shards: 32,
            readonly: false,
            journal_sync: false,
            tmp_dir: std::env::temp_dir(),
            defaults: SearchDefaults::default(),
            object: ObjectLayout::default(),
            similarity: Similarity::default(),
            matcher: MatcherConfig::default(),
            index: IndexConfig::default(),
        }
    }
}

impl Default for SearchDefaults {
    fn default() -> Self {
        SearchDefaults { k: 10, r: None, hint_k: 1, hint_r: None }
    }
}

impl Default for MatcherConfig {
    fn default() -> Self {
        MatcherConfig { kind: MatcherKind::Trivial, extra_mass_penalty: 0.0 }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            kind: IndexKind::Graph,
            graph: GraphConfig::default(),
            lsh: LshConfig::default(),
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            min_index_size: 10_000,
            iterations: 30,
            pool_size: 100,
            degree: 25,
            sample: 10,
            delta: 0.002,
            seed: 1998,
            search_pool: 100,
            search_seeds: 10,
        }
    }
}

impl Default for LshConfig {
    fn default() -> Self {
        LshConfig {
            tables: 8,
            bits: 12,
            allocate: 64 * 1024 * 1024,   // 64MB
            seed: 2024,
        }
    }
}

impl Config {
    /// Read a JSON config file. A missing or unreadable file falls back to defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) => {
                tracing::warn!("Cannot load config file {:?} ({}), using defaults.", path, e);
                Ok(Config::default())
            }
        }
    }

    /// Apply `dotted.key=value` overrides. Values are parsed as JSON, else taken as strings.
    pub fn apply_overrides(&self, overrides: &[&str]) -> Result<Self> {
        let mut tree = serde_json::to_value(self)?;
        for item in overrides {
            let (key, raw) = match item.split_once('=') {
                Some((k, v)) if !k.is_empty() && !v.is_empty() => (k, v),
                _ => return Err(Error::config(format!("bad override: {}", item))),
            };
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            set_path(&mut tree, key, value)?;
        }
        Ok(serde_json::from_value(tree)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.object.validate_config()?;
        if self.max_shards == 0 || self.max_shards > u16::MAX as usize + 1 {
            return Err(Error::config("max_shards must be in 1..=65536"));
        }
        if self.defaults.k == 0 {
            return Err(Error::config("invalid defaults.k"));
        }
        if self.defaults.hint_k == 0 {
            return Err(Error::config("invalid defaults.hint_k"));
        }
        if matches!(self.defaults.hint_r, Some(r) if !r.is_finite()) {
            return Err(Error::config("invalid defaults.hint_r"));
        }
        if matches!(self.defaults.r, Some(r) if !r.is_finite()) {
            return Err(Error::config("invalid defaults.r"));
        }
        if !self.similarity.supports(self.object.element) {
            return Err(Error::config(format!(
                "{:?} does not apply to {:?} features", self.similarity, self.object.element
            )));
        }
        if self.matcher.kind == MatcherKind::Emd {
            if self.similarity.polarity().sign() > 0.0 {
                return Err(Error::config("EMD only works with distance-like similarity"));
            }
            if !self.object.weighted {
                return Err(Error::config("EMD only works with weighted multi-part objects"));
            }
        }
        match self.index.kind {
            IndexKind::Inverted if self.object.element == ElementType::F32 => {
                return Err(Error::config("inverted index needs discrete features"));
            }
            IndexKind::Lsh => {
                let lsh = &self.index.lsh;
                if lsh.tables == 0 || lsh.bits == 0 || lsh.bits > 24 {
                    return Err(Error::config("lsh.tables must be positive and lsh.bits in 1..=24"));
                }
            }
            IndexKind::Graph => {
                let g = &self.index.graph;
                if g.degree == 0 || g.pool_size < g.degree || g.sample == 0 {
                    return Err(Error::config("graph needs 0 < degree <= pool_size and sample > 0"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn set_path(tree: &mut Value, key: &str, value: Value) -> Result<()> {
    let (parents, last) = match key.rsplit_once('.') {
        Some((parents, last)) => (Some(parents), last),
        None => (None, key),
    };
    let not_a_section = || Error::config(format!("override {} does not name a section", key));
    let mut node = tree;
    for part in parents.into_iter().flat_map(|p| p.split('.')) {
        node = node
            .as_object_mut()
            .ok_or_else(not_a_section)?
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
    }
    node.as_object_mut().ok_or_else(not_a_section)?.insert(last.to_string(), value);
    Ok(())
}
