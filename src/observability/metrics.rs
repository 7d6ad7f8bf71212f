//! Thread-safe routing metrics
//!
//! Atomic counters for the hot paths (every query, every cache lookup) and
//! mutex-protected collections for per-agent counts and latency samples.

use crate::routing::AgentKind;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency samples kept for percentile reporting
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<RoutingMetrics> = Lazy::new(RoutingMetrics::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static RoutingMetrics {
    &METRICS
}

/// Routing stage that can fail independently of the others
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Intent,
    Semantic,
}

/// Thread-safe metrics collector for the router
pub struct RoutingMetrics {
    queries_routed: AtomicU64,
    short_circuits: AtomicU64,
    fallback_decisions: AtomicU64,
    forced_conclusions: AtomicU64,
    intent_failures: AtomicU64,
    semantic_failures: AtomicU64,

    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_calls: AtomicU64,
    fallback_vectors: AtomicU64,

    agent_decisions: Mutex<HashMap<AgentKind, u64>>,
    latencies_ms: Mutex<VecDeque<u64>>,
    started_at: AtomicU64,
}

impl RoutingMetrics {
    pub fn new() -> Self {
        Self {
            queries_routed: AtomicU64::new(0),
            short_circuits: AtomicU64::new(0),
            fallback_decisions: AtomicU64::new(0),
            forced_conclusions: AtomicU64::new(0),
            intent_failures: AtomicU64::new(0),
            semantic_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            provider_calls: AtomicU64::new(0),
            fallback_vectors: AtomicU64::new(0),
            agent_decisions: Mutex::new(HashMap::new()),
            latencies_ms: Mutex::new(VecDeque::new()),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    /// Record one completed routing pass
    pub fn query_routed(&self, agent: AgentKind, duration: Duration) {
        self.queries_routed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut decisions) = self.agent_decisions.lock() {
            *decisions.entry(agent).or_insert(0) += 1;
        }
        if let Ok(mut samples) = self.latencies_ms.lock() {
            samples.push_back(duration.as_millis() as u64);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.pop_front();
            }
        }
    }

    pub fn pattern_short_circuit(&self) {
        self.short_circuits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_decision(&self) {
        self.fallback_decisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forced_conclusion(&self) {
        self.forced_conclusions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_failed(&self, stage: Stage) {
        match stage {
            Stage::Intent => self.intent_failures.fetch_add(1, Ordering::Relaxed),
            Stage::Semantic => self.semantic_failures.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub fn cache_hits(&self, count: u64) {
        self.cache_hits.fetch_add(count, Ordering::Relaxed);
    }

    pub fn cache_misses(&self, count: u64) {
        self.cache_misses.fetch_add(count, Ordering::Relaxed);
    }

    pub fn provider_call(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fallback_vectors(&self, count: u64) {
        self.fallback_vectors.fetch_add(count, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.queries_routed,
            &self.short_circuits,
            &self.fallback_decisions,
            &self.forced_conclusions,
            &self.intent_failures,
            &self.semantic_failures,
            &self.cache_hits,
            &self.cache_misses,
            &self.provider_calls,
            &self.fallback_vectors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut decisions) = self.agent_decisions.lock() {
            decisions.clear();
        }
        if let Ok(mut samples) = self.latencies_ms.lock() {
            samples.clear();
        }
        self.started_at.store(current_timestamp(), Ordering::Relaxed);
    }

    fn latency_statistics(&self) -> LatencyMetrics {
        let Ok(samples) = self.latencies_ms.lock() else {
            return LatencyMetrics::default();
        };
        if samples.is_empty() {
            return LatencyMetrics::default();
        }

        let mut sorted: Vec<u64> = samples.iter().copied().collect();
        sorted.sort_unstable();
        LatencyMetrics {
            samples: sorted.len(),
            avg_ms: sorted.iter().sum::<u64>() as f64 / sorted.len() as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
        }
    }

    /// Get complete metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let per_agent = self
            .agent_decisions
            .lock()
            .map(|decisions| {
                decisions
                    .iter()
                    .map(|(agent, count)| (agent.to_string(), *count))
                    .collect()
            })
            .unwrap_or_default();

        MetricsSnapshot {
            routing: RoutingCounters {
                queries_routed: self.queries_routed.load(Ordering::Relaxed),
                pattern_short_circuits: self.short_circuits.load(Ordering::Relaxed),
                fallback_decisions: self.fallback_decisions.load(Ordering::Relaxed),
                forced_conclusions: self.forced_conclusions.load(Ordering::Relaxed),
                intent_failures: self.intent_failures.load(Ordering::Relaxed),
                semantic_failures: self.semantic_failures.load(Ordering::Relaxed),
                per_agent,
            },
            embedding: EmbeddingCounters {
                cache_hits: self.cache_hits.load(Ordering::Relaxed),
                cache_misses: self.cache_misses.load(Ordering::Relaxed),
                provider_calls: self.provider_calls.load(Ordering::Relaxed),
                fallback_vectors: self.fallback_vectors.load(Ordering::Relaxed),
            },
            latency: self.latency_statistics(),
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for RoutingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub routing: RoutingCounters,
    pub embedding: EmbeddingCounters,
    pub latency: LatencyMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingCounters {
    pub queries_routed: u64,
    pub pattern_short_circuits: u64,
    pub fallback_decisions: u64,
    pub forced_conclusions: u64,
    pub intent_failures: u64,
    pub semantic_failures: u64,
    pub per_agent: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingCounters {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub provider_calls: u64,
    pub fallback_vectors: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LatencyMetrics {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let index = (percentile / 100.0) * (sorted_data.len() - 1) as f64;
    let lower = sorted_data[index.floor() as usize] as f64;
    let upper = sorted_data[index.ceil() as usize] as f64;
    lower + (upper - lower) * index.fract()
}
