//! Deterministic fallback vectors
//!
//! When the embedding provider is unreachable the router still needs *a*
//! vector for the query. These vectors are semantically meaningless but
//! reproducible: the same text always yields bit-identical output, across
//! processes and platforms.

use super::provider::EmbeddingProvider;
use crate::error::RouterResult;
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Seed derived from the first 8 bytes of the BLAKE3 hash of `text`
pub fn text_seed(text: &str) -> u64 {
    let hash = blake3::hash(text.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(seed)
}

/// Uniform values in [-1, 1) seeded from a hash of `text`. Not normalised.
pub fn fallback_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut rng = ChaCha20Rng::seed_from_u64(text_seed(text));
    (0..dimension).map(|_| rng.gen_range(-1.0f32..1.0)).collect()
}

/// Provider that never leaves the process; every vector is a fallback vector.
///
/// Used when no embedding credentials are configured.
#[derive(Debug, Clone)]
pub struct OfflineEmbeddingProvider {
    dimension: usize,
}

impl OfflineEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for OfflineEmbeddingProvider {
    fn name(&self) -> &str {
        "offline"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>> {
        Ok(fallback_vector(text, self.dimension))
    }
}
