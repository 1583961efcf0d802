pub mod emd;

use std::collections::HashMap;
use std::sync::Arc;
use crate::core::config::{Config, MatcherKind};
use crate::core::error::{Error, Result};
use crate::core::types::{ObjectId, Record};
use crate::feature::object::Object;
use crate::feature::similarity::{Polarity, Similarity, SimilarityParams};
use crate::index::Match;
use crate::storage::record_store::RecordStore;

/// One index match between a query part and a part of a stored object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hint {
    pub query_tag: u32,
    pub data_tag: u32,
    pub score: f32,
}

/// All hints collected for one stored object during a search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub object: ObjectId,
    pub hints: Vec<Hint>,
    pub record: Option<Arc<Record>>,
}

/// Candidates keyed by object id, in first-seen order.
#[derive(Debug, Default)]
pub struct Candidates {
    order: Vec<ObjectId>,
    map: HashMap<ObjectId, Candidate>,
}

impl Candidates {
    pub fn new() -> Self {
        Candidates::default()
    }

    pub fn add(&mut self, query_tag: u32, m: &Match) {
        let order = &mut self.order;
        let candidate = self.map.entry(m.object).or_insert_with(|| {
            order.push(m.object);
            Candidate { object: m.object, hints: Vec::new(), record: None }
        });
        candidate.hints.push(Hint { query_tag, data_tag: m.tag, score: m.score });
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Resolve every candidate's record. Must run while `store` is locked.
    pub fn attach(&mut self, store: &RecordStore) {
        for candidate in self.map.values_mut() {
            candidate.record = store.get(candidate.object).cloned();
        }
    }

    pub fn into_vec(mut self) -> Vec<Candidate> {
        self.order.iter().filter_map(|id| self.map.remove(id)).collect()
    }
}

/// Turns a candidate's hints into one object-level score.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// First hint's score, polarity of the feature similarity.
    Trivial(Polarity),
    /// Number of hints; more is better.
    Counting,
    /// Transport cost between weighted part sets; lower is better.
    Emd { similarity: Similarity, extra_mass_penalty: f64 },
}

impl Matcher {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(match config.matcher.kind {
            MatcherKind::Trivial => Matcher::Trivial(config.similarity.polarity()),
            MatcherKind::Counting => Matcher::Counting,
            MatcherKind::Emd => {
                if config.similarity.polarity() != Polarity::Distance {
                    return Err(Error::config("EMD only works with distance-like similarity"));
                }
                if !config.object.weighted {
                    return Err(Error::config("EMD only works with weighted multi-part objects"));
                }
                Matcher::Emd {
                    similarity: config.similarity,
                    extra_mass_penalty: config.matcher.extra_mass_penalty,
                }
            }
        })
    }

    pub fn polarity(&self) -> Polarity {
        match self {
            Matcher::Trivial(polarity) => *polarity,
            Matcher::Counting => Polarity::Similarity,
            Matcher::Emd { .. } => Polarity::Distance,
        }
    }

    /// Score a candidate against the query object. Returns `(score, details)`.
    pub fn apply(&self, query: &Object, candidate: &Candidate, params: &SimilarityParams) -> Result<(f32, String)> {
        let first = candidate
            .hints
            .first()
            .ok_or_else(|| Error::internal(format!("candidate {} has no hints", candidate.object)))?;
        match self {
            Matcher::Trivial(_) => Ok((first.score, String::new())),
            Matcher::Counting => {
                let details = candidate
                    .hints
                    .iter()
                    .map(|h| format!("{}:{}", h.query_tag, h.data_tag))
                    .collect::<Vec<_>>()
                    .join(" ");
                Ok((candidate.hints.len() as f32, details))
            }
            Matcher::Emd { similarity, extra_mass_penalty } => {
                let record = candidate
                    .record
                    .as_ref()
                    .ok_or_else(|| Error::internal(format!("candidate {} has no record", candidate.object)))?;
                let cost = emd_score(query, &record.object, *similarity, *extra_mass_penalty, params)?;
                Ok((cost as f32, String::new()))
            }
        }
    }
}

fn normalized(object: &Object, offset: usize, out: &mut [f64]) -> Result<()> {
    let sum: f64 = object.parts.iter().map(|p| p.weight.unwrap_or(0.0) as f64).sum();
    if !(sum > 0.0 && sum.is_finite()) {
        return Err(Error::request("part weights must sum to a positive value"));
    }
    for (i, part) in object.parts.iter().enumerate() {
        out[offset + i] = part.weight.unwrap_or(0.0) as f64 / sum;
    }
    Ok(())
}

fn emd_score(
    query: &Object,
    data: &Object,
    similarity: Similarity,
    extra_mass_penalty: f64,
    params: &SimilarityParams,
) -> Result<f64> {
    let n1 = query.parts.len();
    let n2 = data.parts.len();
    let n = n1 + n2;
    let mut p = vec![0.0; n];
    let mut q = vec![0.0; n];
    normalized(query, 0, &mut p)?;
    normalized(data, n1, &mut q)?;

    // Same-side entries stay zero.
    let mut cost = vec![vec![0.0; n]; n];
    for (i, qp) in query.parts.iter().enumerate() {
        for (j, dp) in data.parts.iter().enumerate() {
            let d = similarity.apply(&qp.feature, &dp.feature, params) as f64;
            cost[i][n1 + j] = d;
            cost[n1 + j][i] = d;
        }
    }
    Ok(emd::emd_hat(&p, &q, &cost, extra_mass_penalty))
}
