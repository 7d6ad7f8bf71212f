//! Hierarchical navigable small-world graph
//!
//! The index is built once from the exemplar corpus and then shared read-only
//! (behind an `Arc`) across routing tasks. Searches never mutate the graph and
//! never suspend.
//!
//! Scores are similarities (larger is closer). Whenever two candidates score
//! exactly the same, the one inserted first ranks higher, which makes both
//! construction and search deterministic for a given seed.

use super::metric::Metric;
use crate::config::IndexSection;
use crate::error::{RouterError, RouterResult};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use tracing::debug;

/// Levels above this are never assigned, whatever the RNG says
const MAX_LEVEL: usize = 16;

/// Construction and query parameters
#[derive(Debug, Clone, PartialEq)]
pub struct HnswParams {
    pub metric: Metric,
    /// Max neighbours per node on layers above 0
    pub m: usize,
    /// Max neighbours per node on layer 0
    pub m_max0: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub seed: u64,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self::from(&IndexSection::default())
    }
}

impl From<&IndexSection> for HnswParams {
    fn from(section: &IndexSection) -> Self {
        Self {
            metric: section.metric,
            m: section.m,
            m_max0: section.m * 2,
            ef_construction: section.ef_construction,
            ef_search: section.ef_search,
            seed: section.seed,
        }
    }
}

impl HnswParams {
    fn validate(&self) -> RouterResult<()> {
        if self.m < 2 || self.m_max0 == 0 || self.ef_construction == 0 || self.ef_search == 0 {
            return Err(RouterError::invalid_configuration(format!(
                "HNSW parameters must be positive (m >= 2): m={}, m_max0={}, ef_construction={}, ef_search={}",
                self.m, self.m_max0, self.ef_construction, self.ef_search
            )));
        }
        Ok(())
    }

    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

/// One search result
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor<T> {
    /// Insertion index of the matched node
    pub id: usize,
    pub payload: T,
    pub score: f32,
}

#[derive(Debug)]
struct Node<T> {
    vector: Vec<f32>,
    payload: T,
    /// Neighbour ids per layer, `neighbors[0]` is the base layer
    neighbors: Vec<Vec<usize>>,
}

/// Candidate ordered so that "greater" means "closer"
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    id: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// HNSW approximate nearest-neighbour index over payload-tagged vectors
#[derive(Debug)]
pub struct HnswIndex<T> {
    params: HnswParams,
    dimension: usize,
    nodes: Vec<Node<T>>,
    entry_point: Option<usize>,
    max_level: usize,
    level_mult: f64,
    rng: ChaCha20Rng,
}

impl<T: Clone> HnswIndex<T> {
    /// Create an empty index for vectors of `dimension` components
    pub fn new(params: HnswParams, dimension: usize) -> RouterResult<Self> {
        params.validate()?;
        if dimension == 0 {
            return Err(RouterError::invalid_configuration(
                "Index dimension must be positive",
            ));
        }
        Ok(Self {
            level_mult: 1.0 / (params.m as f64).ln(),
            rng: ChaCha20Rng::seed_from_u64(params.seed),
            params,
            dimension,
            nodes: Vec::new(),
            entry_point: None,
            max_level: 0,
        })
    }

    /// Build an index from `(vector, payload)` pairs in iteration order
    pub fn build<I>(params: HnswParams, dimension: usize, items: I) -> RouterResult<Self>
    where
        I: IntoIterator<Item = (Vec<f32>, T)>,
    {
        let mut index = Self::new(params, dimension)?;
        for (vector, payload) in items {
            index.insert(vector, payload)?;
        }
        debug!(
            nodes = index.len(),
            max_level = index.max_level,
            metric = %index.params.metric,
            "HNSW index built"
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.params.metric
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    /// Highest populated layer
    pub fn max_level(&self) -> usize {
        self.max_level
    }

    /// Payload of the node inserted at position `id`
    pub fn payload(&self, id: usize) -> Option<&T> {
        self.nodes.get(id).map(|node| &node.payload)
    }

    /// Insert one vector and return its id (its insertion position)
    pub fn insert(&mut self, mut vector: Vec<f32>, payload: T) -> RouterResult<usize> {
        if vector.len() != self.dimension {
            return Err(RouterError::dimension_mismatch(self.dimension, vector.len()));
        }
        self.params.metric.prepare(&mut vector);

        let id = self.nodes.len();
        let level = self.random_level();
        self.nodes.push(Node {
            vector,
            payload,
            neighbors: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_level = level;
            return Ok(id);
        };

        let query = self.nodes[id].vector.clone();
        let mut entry_points = vec![self.scored(&query, entry)];

        // Greedy descent through layers the new node does not live on
        for layer in (level + 1..=self.max_level).rev() {
            entry_points = self.search_layer(&query, &entry_points, 1, layer);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&query, &entry_points, self.params.ef_construction, layer);
            let selected = self.select_neighbors(&candidates, self.params.m);

            self.nodes[id].neighbors[layer] = selected.iter().map(|s| s.id).collect();
            for neighbor in &selected {
                self.connect(neighbor.id, id, layer);
            }
            entry_points = candidates;
        }

        if level > self.max_level {
            self.max_level = level;
            self.entry_point = Some(id);
        }
        Ok(id)
    }

    /// Return up to `k` nearest nodes to `query`, best first.
    ///
    /// When `k` is at least the number of nodes the whole index is scanned,
    /// so every node is returned in exact order.
    pub fn search(&self, query: &[f32], k: usize) -> RouterResult<Vec<Neighbor<T>>> {
        let Some(entry) = self.entry_point else {
            return Err(RouterError::IndexUnbuilt);
        };
        if query.len() != self.dimension {
            return Err(RouterError::dimension_mismatch(self.dimension, query.len()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut query = query.to_vec();
        self.params.metric.prepare(&mut query);

        let found = if k >= self.nodes.len() {
            self.exhaustive(&query)
        } else {
            let mut entry_points = vec![self.scored(&query, entry)];
            for layer in (1..=self.max_level).rev() {
                entry_points = self.search_layer(&query, &entry_points, 1, layer);
            }
            let ef = self.params.ef_search.max(k);
            self.search_layer(&query, &entry_points, ef, 0)
        };

        Ok(found
            .into_iter()
            .take(k)
            .map(|s| Neighbor {
                id: s.id,
                payload: self.nodes[s.id].payload.clone(),
                score: s.score,
            })
            .collect())
    }

    fn exhaustive(&self, query: &[f32]) -> Vec<Scored> {
        let mut all: Vec<Scored> = (0..self.nodes.len())
            .map(|id| self.scored(query, id))
            .collect();
        all.sort_by(|a, b| b.cmp(a));
        all
    }

    fn scored(&self, query: &[f32], id: usize) -> Scored {
        Scored {
            score: self.params.metric.similarity(query, &self.nodes[id].vector),
            id,
        }
    }

    fn random_level(&mut self) -> usize {
        // 1 - U keeps the argument of ln within (0, 1]
        let uniform: f64 = 1.0 - self.rng.gen::<f64>();
        let level = (-uniform.ln() * self.level_mult).floor() as usize;
        level.min(MAX_LEVEL)
    }

    /// Best-first beam search on one layer; returns up to `ef` nodes, best first
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[Scored],
        ef: usize,
        layer: usize,
    ) -> Vec<Scored> {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut candidates: BinaryHeap<Scored> = BinaryHeap::new();
        let mut results: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();

        for ep in entry_points {
            if visited.insert(ep.id) {
                candidates.push(*ep);
                results.push(Reverse(*ep));
                if results.len() > ef {
                    results.pop();
                }
            }
        }

        while let Some(current) = candidates.pop() {
            if let Some(Reverse(worst)) = results.peek() {
                if results.len() >= ef && current < *worst {
                    break;
                }
            }

            let Some(links) = self.nodes[current.id].neighbors.get(layer) else {
                continue;
            };
            for &next in links {
                if !visited.insert(next) {
                    continue;
                }
                let scored = self.scored(query, next);
                let admit = match results.peek() {
                    Some(Reverse(worst)) => results.len() < ef || scored > *worst,
                    None => true,
                };
                if admit {
                    candidates.push(scored);
                    results.push(Reverse(scored));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut found: Vec<Scored> = results.into_iter().map(|Reverse(s)| s).collect();
        found.sort_by(|a, b| b.cmp(a));
        found
    }

    /// Neighbour selection heuristic: prefer candidates that are closer to the
    /// base point than to any already selected neighbour, then top up with the
    /// best of the rejected ones so sparse regions stay connected.
    ///
    /// `candidates` must be sorted best first; each score is relative to the
    /// base point.
    fn select_neighbors(&self, candidates: &[Scored], m: usize) -> Vec<Scored> {
        let mut selected: Vec<Scored> = Vec::with_capacity(m);
        let mut pruned: Vec<Scored> = Vec::new();

        for candidate in candidates {
            if selected.len() >= m {
                break;
            }
            let vector = &self.nodes[candidate.id].vector;
            let diverse = selected.iter().all(|chosen| {
                let to_chosen = self
                    .params
                    .metric
                    .similarity(vector, &self.nodes[chosen.id].vector);
                candidate.score > to_chosen
            });
            if diverse {
                selected.push(*candidate);
            } else {
                pruned.push(*candidate);
            }
        }

        for candidate in pruned {
            if selected.len() >= m {
                break;
            }
            selected.push(candidate);
        }
        selected
    }

    /// Add a back-link from `from` to `to`, shrinking `from`'s list if full
    fn connect(&mut self, from: usize, to: usize, layer: usize) {
        let limit = self.params.max_neighbors(layer);
        let links = &self.nodes[from].neighbors[layer];
        if links.contains(&to) {
            return;
        }
        if links.len() < limit {
            self.nodes[from].neighbors[layer].push(to);
            return;
        }

        let base = &self.nodes[from].vector;
        let mut candidates: Vec<Scored> = links
            .iter()
            .chain(std::iter::once(&to))
            .map(|&id| Scored {
                score: self.params.metric.similarity(base, &self.nodes[id].vector),
                id,
            })
            .collect();
        candidates.sort_by(|a, b| b.cmp(a));
        let kept = self.select_neighbors(&candidates, limit);
        self.nodes[from].neighbors[layer] = kept.into_iter().map(|s| s.id).collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_vectors(count: usize, dimension: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| (0..dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    fn small_params(metric: Metric) -> HnswParams {
        HnswParams {
            metric,
            m: 8,
            m_max0: 16,
            ef_construction: 64,
            ef_search: 32,
            seed: 7,
        }
    }

    #[test]
    fn test_search_before_build_is_unbuilt() {
        let index: HnswIndex<u32> = HnswIndex::new(HnswParams::default(), 4).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0, 0.0], 3),
            Err(RouterError::IndexUnbuilt)
        ));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let mut params = HnswParams::default();
        params.ef_search = 0;
        assert!(HnswIndex::<u32>::new(params, 4).is_err());
        assert!(HnswIndex::<u32>::new(HnswParams::default(), 0).is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = HnswIndex::new(HnswParams::default(), 3).unwrap();
        assert!(matches!(
            index.insert(vec![1.0, 2.0], "a"),
            Err(RouterError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        index.insert(vec![1.0, 2.0, 3.0], "a").unwrap();
        assert!(index.search(&[1.0], 1).is_err());
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let vectors = random_vectors(200, 16, 1);
        let index = HnswIndex::build(
            small_params(Metric::Cosine),
            16,
            vectors.iter().cloned().enumerate().map(|(i, v)| (v, i)),
        )
        .unwrap();

        for probe in [0usize, 57, 199] {
            let hits = index.search(&vectors[probe], 5).unwrap();
            assert_eq!(hits[0].payload, probe);
            assert!((hits[0].score - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_ties_broken_by_insertion_order() {
        let items = vec![
            (vec![1.0, 0.0], "first"),
            (vec![1.0, 0.0], "second"),
            (vec![0.0, 1.0], "other"),
        ];
        let index = HnswIndex::build(HnswParams::default(), 2, items).unwrap();

        let hits = index.search(&[1.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].payload, "first");
        assert_eq!(hits[1].payload, "second");
        assert_eq!(hits[0].score, hits[1].score);
    }

    #[test]
    fn test_k_larger_than_corpus_returns_all() {
        let items = (0..5).map(|i| (vec![i as f32, 1.0], i));
        let index = HnswIndex::build(small_params(Metric::L2), 2, items).unwrap();

        let hits = index.search(&[0.0, 1.0], 50).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].payload, 0);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_recall_against_brute_force() {
        let dimension = 24;
        let vectors = random_vectors(600, dimension, 11);
        let index = HnswIndex::build(
            HnswParams::default(),
            dimension,
            vectors.iter().cloned().enumerate().map(|(i, v)| (v, i)),
        )
        .unwrap();

        let queries = random_vectors(40, dimension, 99);
        let k = 10;
        let mut hits_found = 0;
        for query in &queries {
            let approximate: HashSet<usize> = index
                .search(query, k)
                .unwrap()
                .into_iter()
                .map(|n| n.payload)
                .collect();
            let exact: HashSet<usize> = index
                .search(query, vectors.len())
                .unwrap()
                .into_iter()
                .take(k)
                .map(|n| n.payload)
                .collect();
            hits_found += approximate.intersection(&exact).count();
        }

        let recall = hits_found as f64 / (queries.len() * k) as f64;
        assert!(recall >= 0.9, "recall too low: {recall}");
    }

    #[test]
    fn test_build_is_deterministic() {
        let vectors = random_vectors(100, 8, 3);
        let build = || {
            HnswIndex::build(
                small_params(Metric::Dot),
                8,
                vectors.iter().cloned().enumerate().map(|(i, v)| (v, i)),
            )
            .unwrap()
        };
        let a = build();
        let b = build();
        assert_eq!(a.max_level(), b.max_level());

        let query = &random_vectors(1, 8, 5)[0];
        assert_eq!(a.search(query, 7).unwrap(), b.search(query, 7).unwrap());
    }

    #[test]
    fn test_degree_bounds_hold() {
        let vectors = random_vectors(300, 8, 21);
        let params = small_params(Metric::Cosine);
        let index = HnswIndex::build(
            params.clone(),
            8,
            vectors.into_iter().enumerate().map(|(i, v)| (v, i)),
        )
        .unwrap();

        for node in &index.nodes {
            for (layer, links) in node.neighbors.iter().enumerate() {
                assert!(links.len() <= params.max_neighbors(layer));
            }
        }
    }
}
