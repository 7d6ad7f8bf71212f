//! Keyed session store
//!
//! The store never evicts on its own. The owning service decides when a
//! conversation is over and calls [`SessionStore::remove`] or
//! [`SessionStore::evict_older_than`].

use super::state::{status_for, SessionContext, SessionLimits, SessionState, SessionStatus};
use crate::routing::{AgentKind, RoutingDecision};
use crate::session_span;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{debug, Instrument};

/// Aggregate view over all stored sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub total_turns: u64,
    pub at_limit: usize,
    pub agent_usage: BTreeMap<AgentKind, u64>,
}

#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
    limits: SessionLimits,
}

impl SessionStore {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    /// Status before routing the next query; unknown sessions are `Active`
    pub async fn status(&self, session_id: &str) -> SessionStatus {
        let turns = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, SessionState::turn_count);
        status_for(turns, &self.limits)
    }

    /// Context for the intent extractor; unknown sessions get an empty one
    pub async fn context(&self, session_id: &str) -> SessionContext {
        match self.sessions.read().await.get(session_id) {
            Some(state) => state.context(&self.limits),
            None => SessionState::new(session_id).context(&self.limits),
        }
    }

    /// Append a turn, creating the session on first use. Returns the new turn count.
    pub async fn record_turn(
        &self,
        session_id: &str,
        query: &str,
        decision: RoutingDecision,
    ) -> u32 {
        async {
            let mut sessions = self.sessions.write().await;
            let state = sessions
                .entry(session_id.to_string())
                .or_insert_with(|| SessionState::new(session_id));
            let turn = state.record(query, decision);
            if turn > self.limits.max_turns {
                debug!(turn, max_turns = self.limits.max_turns, "Session past its turn budget");
            }
            debug!(turn, "Recorded turn");
            turn
        }
        .instrument(session_span!(session_id = %session_id))
        .await
    }

    pub async fn get(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn remove(&self, session_id: &str) -> Option<SessionState> {
        self.sessions.write().await.remove(session_id)
    }

    /// Drop sessions created before `now - age`; returns how many were removed
    pub async fn evict_older_than(&self, age: chrono::Duration) -> usize {
        self.evict_created_before(Utc::now() - age).await
    }

    pub async fn evict_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, state| state.created_at >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "Evicted old sessions");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn stats(&self) -> SessionStats {
        let sessions = self.sessions.read().await;
        let mut stats = SessionStats {
            total_sessions: sessions.len(),
            ..Default::default()
        };
        for state in sessions.values() {
            stats.total_turns += u64::from(state.turn_count());
            if state.status(&self.limits) == SessionStatus::AtLimit {
                stats.at_limit += 1;
            }
            for turn in state.history() {
                *stats.agent_usage.entry(turn.decision.agent).or_insert(0) += 1;
            }
        }
        stats
    }
}
