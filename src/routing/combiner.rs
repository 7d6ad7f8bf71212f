//! Weighted fusion of the three routing signals
//!
//! `final(a) = w_pattern * pattern(a) + w_intent * intent(a) + w_semantic * semantic(a)`
//!
//! The pattern detector is authoritative above the short-circuit threshold.
//! Identical fused scores resolve by [`AgentKind::PRIORITY`]. When no single
//! signal reaches the low threshold the configured fallback agent is chosen.

use super::agent_kind::AgentKind;
use super::semantic::SemanticScores;
use super::signal::{clamp_unit, Extracted, RoutingDecision, SignalResult};
use crate::config::FusionSection;
use std::collections::BTreeMap;
use tracing::debug;

/// Which signal contributed most to the winning agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dominant {
    Pattern,
    Intent,
    Semantic,
}

impl Dominant {
    fn as_str(&self) -> &'static str {
        match self {
            Dominant::Pattern => "pattern",
            Dominant::Intent => "intent",
            Dominant::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecisionCombiner {
    pattern_weight: f64,
    intent_weight: f64,
    semantic_weight: f64,
    low_threshold: f64,
    short_circuit_threshold: f64,
    fallback_agent: AgentKind,
}

impl Default for DecisionCombiner {
    fn default() -> Self {
        Self::new(&FusionSection::default())
    }
}

impl DecisionCombiner {
    pub fn new(fusion: &FusionSection) -> Self {
        let (pattern_weight, intent_weight, semantic_weight) = fusion.weights();
        Self {
            pattern_weight,
            intent_weight,
            semantic_weight,
            low_threshold: fusion.low_threshold,
            short_circuit_threshold: fusion.short_circuit_threshold,
            fallback_agent: fusion.fallback_agent,
        }
    }

    pub fn fallback_agent(&self) -> AgentKind {
        self.fallback_agent
    }

    /// True when the pattern signal alone decides the route
    pub fn should_short_circuit(&self, pattern: &SignalResult) -> bool {
        pattern.agent.is_some() && pattern.confidence >= self.short_circuit_threshold
    }

    /// Decision taken from the pattern signal alone
    pub fn short_circuit(&self, pattern: &SignalResult) -> Option<RoutingDecision> {
        if !self.should_short_circuit(pattern) {
            return None;
        }
        let agent = pattern.agent?;
        let mut decision = RoutingDecision::new(
            agent,
            pattern.confidence,
            format!(
                "pattern short-circuit ({:.2} >= {:.2}): {}",
                pattern.confidence, self.short_circuit_threshold, pattern.reasoning
            ),
        );
        decision.short_circuit = true;
        decision.extracted = pattern.extracted.clone();
        Some(decision)
    }

    /// Fused score of every agent
    pub fn fused_scores(
        &self,
        pattern: &SignalResult,
        intent: &SignalResult,
        semantic: &SemanticScores,
    ) -> BTreeMap<AgentKind, f64> {
        AgentKind::PRIORITY
            .iter()
            .map(|&agent| {
                let score = self.pattern_weight * pattern.score_for(agent)
                    + self.intent_weight * intent.score_for(agent)
                    + self.semantic_weight * semantic.contribution(agent);
                (agent, clamp_unit(score))
            })
            .collect()
    }

    pub fn combine(
        &self,
        pattern: &SignalResult,
        intent: &SignalResult,
        semantic: &SemanticScores,
    ) -> RoutingDecision {
        if let Some(decision) = self.short_circuit(pattern) {
            return decision;
        }

        let scores = self.fused_scores(pattern, intent, semantic);
        let strongest = pattern
            .confidence
            .max(intent.confidence)
            .max(semantic.confidence);

        // PRIORITY order plus a strict comparison keeps the earlier agent on ties
        let mut winner: Option<(AgentKind, f64)> = None;
        for agent in AgentKind::PRIORITY {
            let score = scores[&agent];
            if score > 0.0 && winner.map_or(true, |(_, best)| score > best) {
                winner = Some((agent, score));
            }
        }

        let extracted = merge_extracted(pattern, intent);

        let mut decision = match winner {
            Some((agent, score)) if strongest >= self.low_threshold => {
                let dominant = self.dominant(agent, pattern, intent, semantic);
                let reasoning = format!(
                    "{}; {} dominated",
                    self.contributions(agent, pattern, intent, semantic),
                    dominant.as_str()
                );
                RoutingDecision::new(agent, score, reasoning)
            }
            _ => {
                let agent = self.fallback_agent;
                let reasoning = format!(
                    "all signals weak (strongest {strongest:.2} < {:.2}), fallback to {agent}",
                    self.low_threshold
                );
                let mut decision = RoutingDecision::new(agent, scores[&agent], reasoning);
                decision.fallback = true;
                decision
            }
        };
        decision.extracted = extracted;
        decision.scores = scores;

        debug!(
            agent = %decision.agent,
            confidence = decision.confidence,
            strongest,
            "Signals combined"
        );
        decision
    }

    fn dominant(
        &self,
        agent: AgentKind,
        pattern: &SignalResult,
        intent: &SignalResult,
        semantic: &SemanticScores,
    ) -> Dominant {
        let parts = [
            (Dominant::Pattern, self.pattern_weight * pattern.score_for(agent)),
            (Dominant::Intent, self.intent_weight * intent.score_for(agent)),
            (
                Dominant::Semantic,
                self.semantic_weight * semantic.contribution(agent),
            ),
        ];
        let mut best = parts[0];
        for part in &parts[1..] {
            if part.1 > best.1 {
                best = *part;
            }
        }
        best.0
    }

    fn contributions(
        &self,
        agent: AgentKind,
        pattern: &SignalResult,
        intent: &SignalResult,
        semantic: &SemanticScores,
    ) -> String {
        format!(
            "{agent}: pattern {:.2}x{:.2}, intent {:.2}x{:.2}, semantic {:.2}x{:.2}",
            pattern.score_for(agent),
            self.pattern_weight,
            intent.score_for(agent),
            self.intent_weight,
            semantic.contribution(agent),
            self.semantic_weight,
        )
    }
}

/// Intent entities first, pattern entities override on conflict
fn merge_extracted(pattern: &SignalResult, intent: &SignalResult) -> Extracted {
    let mut merged = intent.extracted.clone();
    for (key, value) in &pattern.extracted {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Neighbor;
    use crate::routing::semantic::SemanticThresholds;
    use proptest::prelude::*;
    use serde_json::json;

    fn semantic(pairs: &[(AgentKind, f32)]) -> SemanticScores {
        let neighbors: Vec<Neighbor<AgentKind>> = pairs
            .iter()
            .enumerate()
            .map(|(id, (agent, score))| Neighbor {
                id,
                payload: *agent,
                score: *score,
            })
            .collect();
        SemanticScores::from_neighbors(&neighbors, &SemanticThresholds::default())
    }

    #[test]
    fn test_pattern_short_circuit_is_authoritative() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::new(AgentKind::General, 0.95, "ping");
        let intent = SignalResult::new(AgentKind::Comparison, 1.0, "compare");
        let semantic = semantic(&[(AgentKind::Comparison, 0.99)]);

        let decision = combiner.combine(&pattern, &intent, &semantic);
        assert_eq!(decision.agent, AgentKind::General);
        assert!(decision.short_circuit);
        assert!(decision.scores.is_empty());
    }

    #[test]
    fn test_short_circuit_threshold_is_inclusive() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::new(AgentKind::Comparison, 0.85, "comparison_with_brands");
        let intent = SignalResult::new(AgentKind::Other, 1.0, "other");

        assert!(combiner.should_short_circuit(&pattern));
        let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
        assert_eq!(decision.agent, AgentKind::Comparison);
        assert!(decision.short_circuit);
        assert_eq!(decision.confidence, 0.85);
        assert!(decision.scores.is_empty());
    }

    #[test]
    fn test_just_below_short_circuit_is_fused() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::new(AgentKind::Comparison, 0.849, "comparison_with_brands");
        let intent = SignalResult::none("disabled");

        assert!(!combiner.should_short_circuit(&pattern));
        let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
        assert!(!decision.short_circuit);
        assert_eq!(decision.agent, AgentKind::Comparison);
        assert!((decision.scores[&AgentKind::Comparison] - 0.5 * 0.849).abs() < 1e-9);
        assert!(decision.reasoning.ends_with("pattern dominated"));
    }

    #[test]
    fn test_weighted_fusion() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::new(AgentKind::SellerInfo, 0.6, "seller words");
        let intent = SignalResult::new(AgentKind::Exploration, 0.9, "explore");
        let semantic = semantic(&[
            (AgentKind::Exploration, 0.8),
            (AgentKind::Exploration, 0.8),
            (AgentKind::SellerInfo, 0.4),
        ]);

        let decision = combiner.combine(&pattern, &intent, &semantic);
        // seller: 0.5 * 0.6 + 0.2 * 0.45, exploration: 0.3 * 0.9 + 0.2 * 0.9
        assert_eq!(decision.agent, AgentKind::Exploration);
        assert!((decision.scores[&AgentKind::Exploration] - 0.45).abs() < 1e-9);
        assert!((decision.scores[&AgentKind::SellerInfo] - 0.39).abs() < 1e-9);
        assert!(decision.reasoning.ends_with("intent dominated"));
        assert!(!decision.fallback);
        assert!(!decision.short_circuit);
    }

    #[test]
    fn test_agreeing_signals_reach_full_confidence() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::new(AgentKind::Comparison, 0.8, "compare");
        let intent = SignalResult::new(AgentKind::Comparison, 0.8, "compare");
        let semantic = semantic(&[(AgentKind::Comparison, 0.8)]);

        let decision = combiner.combine(&pattern, &intent, &semantic);
        assert_eq!(decision.agent, AgentKind::Comparison);
        assert!((decision.confidence - 0.82).abs() < 1e-9);
        assert!(decision.reasoning.ends_with("pattern dominated"));
    }

    #[test]
    fn test_all_weak_signals_fall_back() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::none("no rule");
        let intent = SignalResult::none("disabled");
        let semantic = semantic(&[
            (AgentKind::SellerInfo, 0.25),
            (AgentKind::Comparison, 0.25),
            (AgentKind::Exploration, 0.25),
        ]);

        let decision = combiner.combine(&pattern, &intent, &semantic);
        assert_eq!(decision.agent, AgentKind::General);
        assert!(decision.fallback);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_weak_but_nonzero_signal_still_falls_back() {
        let combiner = DecisionCombiner::default();
        let pattern = SignalResult::none("no rule");
        let intent = SignalResult::new(AgentKind::Other, 0.2, "unsure");

        let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
        assert_eq!(decision.agent, AgentKind::General);
        assert!(decision.fallback);
    }

    #[test]
    fn test_ties_resolved_by_priority() {
        let fusion = FusionSection {
            pattern_weight: 0.5,
            intent_weight: 0.5,
            semantic_weight: 0.0,
            ..Default::default()
        };
        let combiner = DecisionCombiner::new(&fusion);
        let pattern = SignalResult::new(AgentKind::General, 0.6, "general");
        let intent = SignalResult::new(AgentKind::SpecificItem, 0.6, "find");

        let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
        assert_eq!(decision.agent, AgentKind::SpecificItem);
    }

    #[test]
    fn test_extracted_merge_prefers_pattern() {
        let combiner = DecisionCombiner::default();
        let mut pattern_entities = Extracted::new();
        pattern_entities.insert("brand".to_string(), json!("samsung"));
        let pattern = SignalResult::new(AgentKind::Comparison, 0.7, "compare")
            .with_extracted(pattern_entities);

        let mut intent_entities = Extracted::new();
        intent_entities.insert("brand".to_string(), json!("Samsung Electronics"));
        intent_entities.insert("category".to_string(), json!("phone"));
        let intent = SignalResult::new(AgentKind::Comparison, 0.6, "compare")
            .with_extracted(intent_entities);

        let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
        assert_eq!(decision.extracted["brand"], "samsung");
        assert_eq!(decision.extracted["category"], "phone");
    }

    fn agent_strategy() -> impl Strategy<Value = AgentKind> {
        prop::sample::select(AgentKind::PRIORITY.to_vec())
    }

    proptest! {
        #[test]
        fn prop_fused_scores_stay_in_unit_range(
            raw in (0.0f64..=1.0, 0.0f64..=1.0),
            pattern_agent in agent_strategy(),
            pattern_conf in 0.0f64..0.85,
            intent_agent in agent_strategy(),
            intent_conf in 0.0f64..=1.0,
            neighbors in prop::collection::vec((agent_strategy(), 0.0f32..=1.0), 0..6),
        ) {
            let (a, b) = raw;
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let fusion = FusionSection {
                pattern_weight: lo,
                intent_weight: hi - lo,
                semantic_weight: 1.0 - hi,
                ..Default::default()
            };
            let combiner = DecisionCombiner::new(&fusion);
            let pattern = SignalResult::new(pattern_agent, pattern_conf, "p");
            let intent = SignalResult::new(intent_agent, intent_conf, "i");
            let semantic = semantic(&neighbors);

            let decision = combiner.combine(&pattern, &intent, &semantic);
            prop_assert!((0.0..=1.0).contains(&decision.confidence));
            for score in decision.scores.values() {
                prop_assert!((0.0..=1.0).contains(score));
            }
        }

        #[test]
        fn prop_winner_has_highest_score(
            pattern_agent in agent_strategy(),
            pattern_conf in 0.3f64..0.85,
            intent_agent in agent_strategy(),
            intent_conf in 0.0f64..=1.0,
        ) {
            let combiner = DecisionCombiner::default();
            let pattern = SignalResult::new(pattern_agent, pattern_conf, "p");
            let intent = SignalResult::new(intent_agent, intent_conf, "i");

            let decision = combiner.combine(&pattern, &intent, &SemanticScores::empty());
            let best = decision.scores.values().cloned().fold(0.0, f64::max);
            prop_assert_eq!(decision.scores[&decision.agent], best);
        }
    }
}
