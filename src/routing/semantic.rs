//! Embedding similarity against the exemplar corpus
//!
//! Each query is embedded through the shared cache and matched against an
//! HNSW index of exemplar vectors. The top-k neighbours vote: an agent's
//! score is the mean similarity of its exemplars among the neighbours, and
//! agents that do not appear score zero.

use super::agent_kind::AgentKind;
use super::exemplars::ExemplarSet;
use super::signal::{clamp_unit, SignalResult};
use crate::config::{FusionSection, IndexSection};
use crate::embedding::EmbeddingCache;
use crate::error::{RouterError, RouterResult};
use crate::index::{HnswIndex, HnswParams, Neighbor};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Score bands used to read semantic similarity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SemanticThresholds {
    /// Below this the semantic signal is ignored
    pub low: f64,
    /// At or above this the match is strong
    pub high: f64,
    /// Gap to the runner-up below which the top score is penalised
    pub ambiguity_margin: f64,
}

impl Default for SemanticThresholds {
    fn default() -> Self {
        Self::from(&FusionSection::default())
    }
}

impl From<&FusionSection> for SemanticThresholds {
    fn from(fusion: &FusionSection) -> Self {
        Self {
            low: fusion.low_threshold,
            high: fusion.high_threshold,
            ambiguity_margin: fusion.ambiguity_margin,
        }
    }
}

/// How much a semantic result can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
}

/// Per-agent semantic scores for one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticScores {
    /// Mean neighbour similarity per agent, in [0, 1]
    pub scores: BTreeMap<AgentKind, f64>,
    pub top: Option<AgentKind>,
    pub top_score: f64,
    /// Top score adjusted by the gap to the runner-up
    pub confidence: f64,
    pub strength: Strength,
}

impl SemanticScores {
    /// No semantic information
    pub fn empty() -> Self {
        Self {
            scores: BTreeMap::new(),
            top: None,
            top_score: 0.0,
            confidence: 0.0,
            strength: Strength::Weak,
        }
    }

    /// Summarise the neighbours of one search
    pub fn from_neighbors(neighbors: &[Neighbor<AgentKind>], thresholds: &SemanticThresholds) -> Self {
        if neighbors.is_empty() {
            return Self::empty();
        }

        let mut sums: BTreeMap<AgentKind, (f64, usize)> = BTreeMap::new();
        for neighbor in neighbors {
            let entry = sums.entry(neighbor.payload).or_insert((0.0, 0));
            entry.0 += clamp_unit(f64::from(neighbor.score));
            entry.1 += 1;
        }
        let scores: BTreeMap<AgentKind, f64> = sums
            .into_iter()
            .map(|(agent, (sum, count))| (agent, sum / count as f64))
            .collect();

        let mut ranked: Vec<(AgentKind, f64)> = scores.iter().map(|(a, s)| (*a, *s)).collect();
        ranked.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| a.0.priority().cmp(&b.0.priority()))
        });

        let (top, top_score) = ranked[0];
        let runner_up = ranked.get(1).map_or(0.0, |(_, score)| *score);
        let gap = top_score - runner_up;

        let confidence = if top_score < thresholds.low {
            0.0
        } else if gap > 2.0 * thresholds.ambiguity_margin {
            clamp_unit(top_score + 0.1)
        } else if gap < thresholds.ambiguity_margin {
            clamp_unit(top_score - 0.1)
        } else {
            top_score
        };

        let strength = if confidence >= thresholds.high {
            Strength::Strong
        } else if confidence >= thresholds.low {
            Strength::Moderate
        } else {
            Strength::Weak
        };

        Self {
            scores,
            top: Some(top),
            top_score,
            confidence,
            strength,
        }
    }

    /// Semantic score lent to `agent` during fusion.
    ///
    /// Raw scores are scaled by `confidence / top_score`, so ordering is
    /// preserved, the top agent contributes exactly `confidence`, and a
    /// weak result contributes nothing.
    pub fn contribution(&self, agent: AgentKind) -> f64 {
        if self.top_score <= 0.0 || self.confidence <= 0.0 {
            return 0.0;
        }
        let raw = self.scores.get(&agent).copied().unwrap_or(0.0);
        clamp_unit(raw * self.confidence / self.top_score)
    }

    pub fn to_signal(&self) -> SignalResult {
        match self.top {
            Some(agent) if self.confidence > 0.0 => SignalResult::new(
                agent,
                self.confidence,
                format!(
                    "closest exemplars belong to {agent} (score {:.2}, {:?})",
                    self.top_score, self.strength
                ),
            ),
            _ => SignalResult::none("no semantic match above the low threshold"),
        }
    }
}

/// Semantic scorer over an immutable exemplar index
pub struct SemanticRouter {
    index: HnswIndex<AgentKind>,
    cache: Arc<EmbeddingCache>,
    top_k: usize,
    thresholds: SemanticThresholds,
}

impl SemanticRouter {
    /// Embed every exemplar through the cache and build the index
    pub async fn build(
        exemplars: &ExemplarSet,
        cache: Arc<EmbeddingCache>,
        index: &IndexSection,
        fusion: &FusionSection,
    ) -> RouterResult<Self> {
        if exemplars.is_empty() {
            return Err(RouterError::invalid_configuration(
                "Semantic router needs at least one exemplar",
            ));
        }
        let params = HnswParams::from(index);
        if params.metric != cache.metric() {
            return Err(RouterError::invalid_configuration(format!(
                "Index metric {} does not match cache metric {}",
                params.metric,
                cache.metric()
            )));
        }

        let vectors = cache.embed_batch(&exemplars.texts()).await;
        let items = vectors
            .into_iter()
            .zip(exemplars.iter().map(|exemplar| exemplar.agent));
        let index_graph = HnswIndex::build(params, cache.dimension(), items)?;

        info!(
            exemplars = index_graph.len(),
            dimension = index_graph.dimension(),
            top_k = index.top_k,
            "Semantic router ready"
        );

        Ok(Self {
            index: index_graph,
            cache,
            top_k: index.top_k,
            thresholds: SemanticThresholds::from(fusion),
        })
    }

    /// Cache the router embeds queries through
    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    pub fn exemplar_count(&self) -> usize {
        self.index.len()
    }

    pub fn thresholds(&self) -> &SemanticThresholds {
        &self.thresholds
    }

    /// Score an already-embedded query
    pub fn score(&self, query_vector: &[f32]) -> RouterResult<SemanticScores> {
        let neighbors = self.index.search(query_vector, self.top_k)?;
        let scores = SemanticScores::from_neighbors(&neighbors, &self.thresholds);
        debug!(
            neighbors = neighbors.len(),
            top = ?scores.top,
            top_score = scores.top_score,
            confidence = scores.confidence,
            "Semantic scores"
        );
        Ok(scores)
    }

    /// Embed `query` through the cache and score it
    pub async fn route(&self, query: &str) -> RouterResult<SemanticScores> {
        let vector = self.cache.embed_one(query).await;
        self.score(&vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::CacheSettings;
    use crate::routing::exemplars::Exemplar;
    use crate::testing::mocks::MockEmbeddingProvider;

    fn neighbor(id: usize, agent: AgentKind, score: f32) -> Neighbor<AgentKind> {
        Neighbor {
            id,
            payload: agent,
            score,
        }
    }

    #[test]
    fn test_scores_average_per_agent() {
        let neighbors = vec![
            neighbor(0, AgentKind::Comparison, 0.9),
            neighbor(1, AgentKind::Comparison, 0.7),
            neighbor(2, AgentKind::General, 0.4),
        ];
        let scores = SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default());

        assert!((scores.scores[&AgentKind::Comparison] - 0.8).abs() < 1e-6);
        assert!((scores.scores[&AgentKind::General] - 0.4).abs() < 1e-6);
        assert!(!scores.scores.contains_key(&AgentKind::SellerInfo));
        assert_eq!(scores.top, Some(AgentKind::Comparison));
        // gap 0.4 > 2 * margin
        assert!((scores.confidence - 0.9).abs() < 1e-6);
        assert_eq!(scores.strength, Strength::Strong);
        assert_eq!(scores.contribution(AgentKind::SellerInfo), 0.0);
    }

    #[test]
    fn test_small_gap_is_penalised() {
        let neighbors = vec![
            neighbor(0, AgentKind::SellerInfo, 0.62),
            neighbor(1, AgentKind::Exploration, 0.6),
        ];
        let scores = SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default());
        assert!((scores.confidence - 0.52).abs() < 1e-6);
        assert_eq!(scores.strength, Strength::Moderate);

        // scaling keeps the order and gives the top agent its confidence
        let top = scores.contribution(AgentKind::SellerInfo);
        let second = scores.contribution(AgentKind::Exploration);
        assert!((top - scores.confidence).abs() < 1e-9);
        assert!(second < top);
    }

    #[test]
    fn test_weak_scores_contribute_nothing() {
        let neighbors = vec![
            neighbor(0, AgentKind::General, 0.25),
            neighbor(1, AgentKind::Exploration, 0.25),
            neighbor(2, AgentKind::Other, 0.25),
        ];
        let scores = SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default());
        assert_eq!(scores.confidence, 0.0);
        assert_eq!(scores.strength, Strength::Weak);
        for kind in AgentKind::PRIORITY {
            assert_eq!(scores.contribution(kind), 0.0);
        }
        assert_eq!(scores.to_signal().agent, None);
    }

    #[test]
    fn test_tied_scores_use_priority() {
        let neighbors = vec![
            neighbor(0, AgentKind::General, 0.8),
            neighbor(1, AgentKind::Comparison, 0.8),
        ];
        let scores = SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default());
        assert_eq!(scores.top, Some(AgentKind::Comparison));
    }

    #[test]
    fn test_negative_similarity_clamped() {
        let neighbors = vec![neighbor(0, AgentKind::Other, -0.5)];
        let scores = SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default());
        assert_eq!(scores.scores[&AgentKind::Other], 0.0);
    }

    #[tokio::test]
    async fn test_route_finds_nearest_cluster() {
        let provider = MockEmbeddingProvider::new(4)
            .with_vector("compare a and b", vec![0.0, 1.0, 0.0, 0.0])
            .with_vector("a versus b", vec![0.1, 0.9, 0.0, 0.0])
            .with_vector("opening hours", vec![1.0, 0.0, 0.0, 0.0])
            .with_vector("which shop", vec![0.0, 0.0, 1.0, 0.0])
            .with_vector("is x better than y", vec![0.05, 0.95, 0.05, 0.0]);
        let cache = Arc::new(EmbeddingCache::new(Arc::new(provider), CacheSettings::default()));

        let exemplars = ExemplarSet::from_exemplars(vec![
            Exemplar::new(AgentKind::Comparison, "compare a and b"),
            Exemplar::new(AgentKind::Comparison, "a versus b"),
            Exemplar::new(AgentKind::General, "opening hours"),
            Exemplar::new(AgentKind::SellerInfo, "which shop"),
        ]);
        let index = IndexSection {
            top_k: 2,
            ..Default::default()
        };
        let router = SemanticRouter::build(&exemplars, cache, &index, &FusionSection::default())
            .await
            .unwrap();
        assert_eq!(router.exemplar_count(), 4);

        let scores = router.route("is x better than y").await.unwrap();
        assert_eq!(scores.top, Some(AgentKind::Comparison));
        assert_eq!(scores.strength, Strength::Strong);
        assert_eq!(scores.to_signal().agent, Some(AgentKind::Comparison));
    }

    #[tokio::test]
    async fn test_empty_exemplars_rejected() {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(MockEmbeddingProvider::new(4)),
            CacheSettings::default(),
        ));
        let result = SemanticRouter::build(
            &ExemplarSet::default(),
            cache,
            &IndexSection::default(),
            &FusionSection::default(),
        )
        .await;
        assert!(matches!(
            result,
            Err(RouterError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_metric_mismatch_rejected() {
        let cache = Arc::new(EmbeddingCache::new(
            Arc::new(MockEmbeddingProvider::new(4)),
            CacheSettings::default(),
        ));
        let index = IndexSection {
            metric: crate::index::Metric::Dot,
            ..Default::default()
        };
        let result = SemanticRouter::build(
            &ExemplarSet::builtin(),
            cache,
            &index,
            &FusionSection::default(),
        )
        .await;
        assert!(result.is_err());
    }
}
