//! Similarity metrics
//!
//! Every metric is expressed as a similarity where larger is closer, so the
//! index and the semantic router never need to know which one is in use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vector similarity metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Cosine similarity; vectors are L2-normalised before insertion
    #[default]
    Cosine,
    /// Euclidean distance mapped to `1 / (1 + d)`
    L2,
    /// Raw inner product
    Dot,
}

impl Metric {
    /// Similarity between two vectors of equal length
    pub fn similarity(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            // Inputs are normalised up front, so cosine reduces to a dot product
            Metric::Cosine | Metric::Dot => dot(a, b),
            Metric::L2 => 1.0 / (1.0 + l2_distance(a, b)),
        }
    }

    /// Whether vectors must be normalised before use
    pub fn requires_normalization(&self) -> bool {
        matches!(self, Metric::Cosine)
    }

    /// Prepare a vector for this metric (normalises for cosine)
    pub fn prepare(&self, vector: &mut [f32]) {
        if self.requires_normalization() {
            normalize(vector);
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::Dot => "dot",
        };
        f.write_str(name)
    }
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}
