//! Router orchestrator
//!
//! One routing pass:
//!
//! 1. The pattern detector runs first. An authoritative match ends the pass.
//! 2. Otherwise intent extraction and semantic scoring run as two spawned
//!    tasks, each under its own deadline. A stage that fails, panics or
//!    times out contributes a zero signal; the other stage is unaffected.
//! 3. The combiner fuses the signals.
//! 4. The session budget may override the decision.
//! 5. The turn is recorded.
//!
//! [`RouterOrchestrator::route`] never fails: every query gets a decision.

use super::combiner::DecisionCombiner;
use super::exemplars::ExemplarSet;
use super::pattern::PatternDetector;
use super::semantic::{SemanticRouter, SemanticScores};
use super::signal::{RoutingDecision, SignalResult};
use crate::config::{EmbeddingSection, FusionSection, IntentSection, RouterConfig};
use crate::embedding::{create_embedding_provider, CacheSettings, EmbeddingCache};
use crate::error::{RouterError, RouterResult};
use crate::intent::{create_intent_extractor, IntentExtractor};
use crate::observability::{metrics, Stage};
use crate::routing_span;
use crate::session::{SessionLimits, SessionStatus, SessionStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

/// Slack on top of the embedding timeout before the semantic stage is abandoned.
/// The cache's own fallback normally resolves well within it.
const SEMANTIC_GRACE: Duration = Duration::from_millis(250);

pub struct RouterOrchestrator {
    pattern: PatternDetector,
    intent: Arc<dyn IntentExtractor>,
    semantic: Arc<SemanticRouter>,
    combiner: DecisionCombiner,
    sessions: Arc<SessionStore>,
    intent_timeout: Duration,
    semantic_timeout: Duration,
}

impl RouterOrchestrator {
    /// Wire the stages together.
    ///
    /// Stage deadlines start from the default `[intent]` and `[embedding]`
    /// `timeout_ms`; use [`with_stage_timeouts`](Self::with_stage_timeouts)
    /// when the collaborators were built from other settings.
    pub fn new(
        semantic: Arc<SemanticRouter>,
        intent: Arc<dyn IntentExtractor>,
        sessions: Arc<SessionStore>,
        fusion: &FusionSection,
    ) -> Self {
        Self {
            pattern: PatternDetector::new(),
            intent,
            semantic,
            combiner: DecisionCombiner::new(fusion),
            sessions,
            intent_timeout: Duration::from_millis(IntentSection::default().timeout_ms),
            semantic_timeout: Duration::from_millis(EmbeddingSection::default().timeout_ms)
                + SEMANTIC_GRACE,
        }
    }

    /// Deadlines for the intent and semantic stages
    pub fn with_stage_timeouts(mut self, intent: Duration, semantic: Duration) -> Self {
        self.intent_timeout = intent;
        self.semantic_timeout = semantic;
        self
    }

    /// Build every component from configuration.
    ///
    /// Loads the persisted embedding cache, embeds the exemplar corpus and
    /// builds the index. Any failure here is fatal.
    pub async fn from_config(config: &RouterConfig) -> RouterResult<Self> {
        config.validate()?;

        let provider = create_embedding_provider(config)?;
        let cache = Arc::new(EmbeddingCache::new(provider, CacheSettings::from(config)));
        if let Err(e) = cache.load_from_disk().await {
            warn!(error = %e.sanitized(), "Could not load embedding cache, starting empty");
        }

        let exemplars = ExemplarSet::from_config(&config.exemplars)?;
        let semantic =
            SemanticRouter::build(&exemplars, cache, &config.index, &config.fusion).await?;
        let intent = create_intent_extractor(config)?;
        let sessions = Arc::new(SessionStore::new(SessionLimits::from(&config.session)));

        info!(
            exemplars = semantic.exemplar_count(),
            intent = intent.name(),
            max_turns = config.session.max_turns,
            "Router ready"
        );

        Ok(Self::new(Arc::new(semantic), intent, sessions, &config.fusion).with_stage_timeouts(
            Duration::from_millis(config.intent.timeout_ms),
            Duration::from_millis(config.embedding.timeout_ms) + SEMANTIC_GRACE,
        ))
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        self.semantic.cache()
    }

    pub fn semantic(&self) -> &Arc<SemanticRouter> {
        &self.semantic
    }

    /// Route one query for `session_id`.
    ///
    /// Turns of the same session must not be routed concurrently; the turn
    /// count is read before routing and incremented after.
    pub async fn route(&self, query: &str, session_id: &str) -> RoutingDecision {
        let started = Instant::now();
        let span = routing_span!(session_id = %session_id, query_len = query.chars().count());

        async {
            let status = self.sessions.status(session_id).await;
            let pattern = self.pattern.detect(query);

            let decision = match self.combiner.short_circuit(&pattern) {
                Some(decision) => {
                    metrics().pattern_short_circuit();
                    decision
                }
                None => {
                    let (intent, semantic) = self.gather(query, session_id).await;
                    self.combiner.combine(&pattern, &intent, &semantic)
                }
            };
            if decision.fallback {
                metrics().fallback_decision();
            }

            let decision = self.apply_budget(decision, status, &pattern);
            let turn = self
                .sessions
                .record_turn(session_id, query, decision.clone())
                .await;

            let elapsed = started.elapsed();
            metrics().query_routed(decision.agent, elapsed);
            info!(
                agent = %decision.agent,
                confidence = decision.confidence,
                short_circuit = decision.short_circuit,
                force_conclusion = decision.force_conclusion,
                fallback = decision.fallback,
                turn,
                duration_ms = elapsed.as_millis() as u64,
                "Query routed"
            );
            decision
        }
        .instrument(span)
        .await
    }

    /// Run intent extraction and semantic scoring concurrently
    async fn gather(&self, query: &str, session_id: &str) -> (SignalResult, SemanticScores) {
        let intent_task = if self.intent.enabled() {
            let extractor = Arc::clone(&self.intent);
            let context = self.sessions.context(session_id).await;
            let query = query.to_string();
            Some(tokio::spawn(
                async move { extractor.extract(&query, &context).await }.in_current_span(),
            ))
        } else {
            None
        };

        let semantic_task = {
            let semantic = Arc::clone(&self.semantic);
            let query = query.to_string();
            tokio::spawn(async move { semantic.route(&query).await }.in_current_span())
        };

        let intent = async {
            match intent_task {
                Some(task) => join_stage(Stage::Intent, task, self.intent_timeout)
                    .await
                    .map_or_else(
                        |reason| SignalResult::none(format!("intent unavailable: {reason}")),
                        |intent| intent.to_signal(),
                    ),
                None => SignalResult::none("intent extraction disabled"),
            }
        };
        let semantic = async {
            join_stage(Stage::Semantic, semantic_task, self.semantic_timeout)
                .await
                .unwrap_or_else(|_| SemanticScores::empty())
        };

        tokio::join!(intent, semantic)
    }

    /// Force the concluding handler once the session budget is spent.
    ///
    /// Explicit commands keep their handler so they are still answered, but
    /// are flagged like every other decision at the limit.
    fn apply_budget(
        &self,
        mut decision: RoutingDecision,
        status: SessionStatus,
        pattern: &SignalResult,
    ) -> RoutingDecision {
        if status != SessionStatus::AtLimit {
            return decision;
        }
        metrics().forced_conclusion();
        decision.force_conclusion = true;

        if decision.short_circuit && PatternDetector::is_command(pattern) {
            decision.reasoning.push_str("; turn budget reached");
            return decision;
        }

        let limits = self.sessions.limits();
        let concluding = limits.conclusion_agent;
        decision.reasoning = format!(
            "turn budget reached ({} turns), concluding with {concluding} instead of {}: {}",
            limits.force_conclusion_turn, decision.agent, decision.reasoning
        );
        decision.agent = concluding;
        decision
    }
}

/// Await a spawned stage under `limit`.
///
/// Every failure mode is logged, counted and returned as a short reason
/// string; a timed-out task is aborted.
async fn join_stage<T>(
    stage: Stage,
    mut task: JoinHandle<RouterResult<T>>,
    limit: Duration,
) -> Result<T, String> {
    let reason = match tokio::time::timeout(limit, &mut task).await {
        Ok(Ok(Ok(value))) => return Ok(value),
        Ok(Ok(Err(e))) => {
            let message = e.sanitized();
            warn!(stage = ?stage, error = %message, "Routing stage failed, using zero signal");
            message
        }
        Ok(Err(join_error)) => {
            warn!(stage = ?stage, error = %join_error, "Routing stage panicked, using zero signal");
            RouterError::provider_unavailable(format!("{stage:?}"), "stage task panicked")
                .sanitized()
        }
        Err(_) => {
            task.abort();
            let timeout_ms = limit.as_millis() as u64;
            warn!(stage = ?stage, timeout_ms, "Routing stage timed out, using zero signal");
            format!("timed out after {timeout_ms} ms")
        }
    };
    metrics().stage_failed(stage);
    Err(reason)
}
