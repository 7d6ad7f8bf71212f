//! Signals produced by each detector and the fused routing decision

use super::agent_kind::AgentKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Entities pulled out of a query (product codes, keys, brand, ...)
pub type Extracted = Map<String, Value>;

/// Output of one detector. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalResult {
    /// `None` when the detector found nothing
    pub agent: Option<AgentKind>,
    /// Always within [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default)]
    pub extracted: Extracted,
}

impl SignalResult {
    /// A signal pointing at `agent`; confidence is clamped to [0, 1]
    pub fn new(agent: AgentKind, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            agent: Some(agent),
            confidence: clamp_unit(confidence),
            reasoning: reasoning.into(),
            extracted: Extracted::new(),
        }
    }

    /// A zero-confidence signal with no agent
    pub fn none(reasoning: impl Into<String>) -> Self {
        Self {
            agent: None,
            confidence: 0.0,
            reasoning: reasoning.into(),
            extracted: Extracted::new(),
        }
    }

    pub fn with_extracted(mut self, extracted: Extracted) -> Self {
        self.extracted = extracted;
        self
    }

    /// Confidence this signal lends to `agent` (zero for any other agent)
    pub fn score_for(&self, agent: AgentKind) -> f64 {
        if self.agent == Some(agent) {
            self.confidence
        } else {
            0.0
        }
    }
}

/// Final output of one routing pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub agent: AgentKind,
    pub confidence: f64,
    pub reasoning: String,
    /// Set when the session turn budget forced a concluding handler
    pub force_conclusion: bool,
    /// True when the pattern detector decided alone
    #[serde(default)]
    pub short_circuit: bool,
    /// True when every signal was too weak and the fallback agent was used
    #[serde(default)]
    pub fallback: bool,
    #[serde(default)]
    pub extracted: Extracted,
    /// Fused score per agent; empty for short-circuited decisions
    #[serde(default)]
    pub scores: BTreeMap<AgentKind, f64>,
}

impl RoutingDecision {
    pub fn new(agent: AgentKind, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            agent,
            confidence: clamp_unit(confidence),
            reasoning: reasoning.into(),
            force_conclusion: false,
            short_circuit: false,
            fallback: false,
            extracted: Extracted::new(),
            scores: BTreeMap::new(),
        }
    }
}

/// Clamp to [0, 1]; NaN becomes 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
