//! Typed per-session state and the turn-budget state machine

use crate::config::SessionSection;
use crate::routing::{AgentKind, RoutingDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of earlier queries handed to the intent extractor
const CONTEXT_QUERIES: usize = 3;

/// Turn-budget state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Routing decisions are taken from the fused signals
    Active,
    /// The next decision is forced onto the concluding handler
    AtLimit,
}

/// Turn limits shared by every session in a store
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionLimits {
    pub max_turns: u32,
    pub force_conclusion_turn: u32,
    pub conclusion_agent: AgentKind,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&SessionSection::default())
    }
}

impl From<&SessionSection> for SessionLimits {
    fn from(section: &SessionSection) -> Self {
        Self {
            max_turns: section.max_turns,
            force_conclusion_turn: section.force_conclusion_turn,
            conclusion_agent: section.conclusion_agent,
        }
    }
}

/// One routed query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based position in the session
    pub number: u32,
    pub query: String,
    pub decision: RoutingDecision,
    pub recorded_at: DateTime<Utc>,
}

/// Conversation facts the intent extractor may use
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    pub turn_count: u32,
    pub turns_remaining: u32,
    pub previous_agents: Vec<AgentKind>,
    /// Most recent queries, oldest first
    pub recent_queries: Vec<String>,
}

/// History of one conversation. `turn_count()` is always the history length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    history: Vec<Turn>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            created_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn turn_count(&self) -> u32 {
        u32::try_from(self.history.len()).unwrap_or(u32::MAX)
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn last_agent(&self) -> Option<AgentKind> {
        self.history.last().map(|turn| turn.decision.agent)
    }

    /// `AtLimit` once `force_conclusion_turn` turns have been recorded
    pub fn status(&self, limits: &SessionLimits) -> SessionStatus {
        status_for(self.turn_count(), limits)
    }

    /// Append one turn and return its number
    pub fn record(&mut self, query: impl Into<String>, decision: RoutingDecision) -> u32 {
        let number = self.turn_count().saturating_add(1);
        self.history.push(Turn {
            number,
            query: query.into(),
            decision,
            recorded_at: Utc::now(),
        });
        number
    }

    pub fn context(&self, limits: &SessionLimits) -> SessionContext {
        let skip = self.history.len().saturating_sub(CONTEXT_QUERIES);
        SessionContext {
            session_id: self.session_id.clone(),
            turn_count: self.turn_count(),
            turns_remaining: limits.max_turns.saturating_sub(self.turn_count()),
            previous_agents: self.history.iter().map(|t| t.decision.agent).collect(),
            recent_queries: self.history[skip..].iter().map(|t| t.query.clone()).collect(),
        }
    }
}

/// Status of a session that has recorded `turn_count` turns
pub fn status_for(turn_count: u32, limits: &SessionLimits) -> SessionStatus {
    if turn_count >= limits.force_conclusion_turn {
        SessionStatus::AtLimit
    } else {
        SessionStatus::Active
    }
}
