use std::cmp::Ordering;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::feature::vector::{ElementType, Feature};

/// Sign convention of a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    /// Higher is better.
    Similarity,
    /// Lower is better.
    Distance,
}

impl Polarity {
    pub fn sign(&self) -> f32 {
        match self {
            Polarity::Similarity => 1.0,
            Polarity::Distance => -1.0,
        }
    }

    /// Ordering that puts the better score first.
    pub fn rank(&self, a: f32, b: f32) -> Ordering {
        match self {
            Polarity::Similarity => b.total_cmp(&a),
            Polarity::Distance => a.total_cmp(&b),
        }
    }

    /// Whether `score` is at least as good as `threshold`.
    pub fn passes(&self, score: f32, threshold: f32) -> bool {
        match self {
            Polarity::Similarity => score >= threshold,
            Polarity::Distance => score <= threshold,
        }
    }

    /// Threshold that accepts every score.
    pub fn accept_all(&self) -> f32 {
        match self {
            Polarity::Similarity => f32::NEG_INFINITY,
            Polarity::Distance => f32::INFINITY,
        }
    }

    /// Finite threshold that accepts every finite score.
    pub fn loosest(&self) -> f32 {
        match self {
            Polarity::Similarity => -f32::MAX,
            Polarity::Distance => f32::MAX,
        }
    }

    /// Maps a score onto "lower is better", as graph construction expects.
    pub fn to_cost(&self, score: f32) -> f32 {
        -self.sign() * score
    }

    pub fn from_cost(&self, cost: f32) -> f32 {
        -self.sign() * cost
    }
}

/// Per-request parameters handed to the similarity function.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityParams {
    pub raw: String,
}

impl SimilarityParams {
    pub fn encode(&self) -> String {
        self.raw.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Similarity {
    Cosine,
    L1,
    L2,
    Hamming,
    TypeHamming,
}

impl Default for Similarity {
    fn default() -> Self {
        Similarity::L2
    }
}

impl Similarity {
    pub fn polarity(&self) -> Polarity {
        match self {
            Similarity::Cosine => Polarity::Similarity,
            _ => Polarity::Distance,
        }
    }

    pub fn supports(&self, element: ElementType) -> bool {
        match self {
            Similarity::Cosine | Similarity::L1 | Similarity::L2 => {
                matches!(element, ElementType::F32 | ElementType::I32)
            }
            Similarity::Hamming => element == ElementType::Bits,
            Similarity::TypeHamming => true,
        }
    }

    /// None of the built-in measures take parameters.
    pub fn decode_params(&self, raw: &str) -> Result<SimilarityParams> {
        if raw.trim().is_empty() {
            return Ok(SimilarityParams::default());
        }
        Err(Error::request(format!("{:?} takes no similarity parameters, got {:?}", self, raw)))
    }

    pub fn apply(&self, a: &Feature, b: &Feature, _params: &SimilarityParams) -> f32 {
        match (self, a, b) {
            (Similarity::Cosine, _, _) => cosine(a, b),
            (Similarity::L1, _, _) => numeric_pairs(a, b)
                .map(|(x, y)| (x - y).abs())
                .sum::<f64>() as f32,
            (Similarity::L2, _, _) => numeric_pairs(a, b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f64>()
                .sqrt() as f32,
            (Similarity::Hamming, Feature::Bits(x), Feature::Bits(y)) => x.iter()
                .zip(y.iter())
                .map(|(p, q)| (p ^ q).count_ones())
                .sum::<u32>() as f32,
            (Similarity::TypeHamming, Feature::Dense(x), Feature::Dense(y)) => unequal(x, y),
            (Similarity::TypeHamming, Feature::Discrete(x), Feature::Discrete(y)) => unequal(x, y),
            (Similarity::TypeHamming, Feature::Bits(x), Feature::Bits(y)) => unequal(x, y),
            // Mixed element types never meet once the layout is validated.
            _ => self.polarity().loosest(),
        }
    }
}

fn numeric_pairs<'a>(a: &'a Feature, b: &'a Feature) -> Box<dyn Iterator<Item = (f64, f64)> + 'a> {
    match (a, b) {
        (Feature::Dense(x), Feature::Dense(y)) => {
            Box::new(x.iter().zip(y.iter()).map(|(p, q)| (*p as f64, *q as f64)))
        }
        (Feature::Discrete(x), Feature::Discrete(y)) => {
            Box::new(x.iter().zip(y.iter()).map(|(p, q)| (*p as f64, *q as f64)))
        }
        _ => Box::new(std::iter::empty()),
    }
}

fn cosine(a: &Feature, b: &Feature) -> f32 {
    let mut dot = 0.0f64;
    let mut m1 = 0.0f64;
    let mut m2 = 0.0f64;
    for (x, y) in numeric_pairs(a, b) {
        dot += x * y;
        m1 += x * x;
        m2 += y * y;
    }
    let v = (dot / (m1.sqrt() * m2.sqrt())) as f32;
    if v.is_normal() { v } else { -1.0 }
}

fn unequal<T: PartialEq>(x: &[T], y: &[T]) -> f32 {
    x.iter().zip(y.iter()).filter(|(p, q)| p != q).count() as f32
}
