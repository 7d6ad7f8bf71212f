//! Downstream handlers keyed by [`AgentKind`]
//!
//! The router only decides; handlers answer. The registry is the single
//! place a decision is turned into a handler call, so an unregistered kind
//! is reported instead of silently dropped.

use super::agent_kind::AgentKind;
use super::signal::RoutingDecision;
use crate::error::{RouterError, RouterResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// What a handler sends back to the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    pub message: Option<String>,
    #[serde(default)]
    pub base_random_keys: Vec<String>,
    #[serde(default)]
    pub member_random_keys: Vec<String>,
}

impl HandlerResponse {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

/// A downstream consumer of routing decisions
#[async_trait]
pub trait AgentHandler: Send + Sync {
    fn kind(&self) -> AgentKind;

    async fn handle(&self, query: &str, decision: &RoutingDecision) -> RouterResult<HandlerResponse>;
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<AgentKind, Arc<dyn AgentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own kind, replacing any earlier one
    pub fn register(&mut self, handler: Arc<dyn AgentHandler>) -> Option<Arc<dyn AgentHandler>> {
        let kind = handler.kind();
        debug!(agent = %kind, "Registering handler");
        self.handlers.insert(kind, handler)
    }

    pub fn get(&self, kind: AgentKind) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Kinds with no handler, in priority order
    pub fn missing_kinds(&self) -> Vec<AgentKind> {
        AgentKind::PRIORITY
            .into_iter()
            .filter(|kind| !self.handlers.contains_key(kind))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Hand `query` to the handler the decision names
    pub async fn dispatch(
        &self,
        query: &str,
        decision: &RoutingDecision,
    ) -> RouterResult<HandlerResponse> {
        let handler = self
            .handlers
            .get(&decision.agent)
            .ok_or(RouterError::HandlerMissing {
                agent: decision.agent,
            })?;
        handler.handle(query, decision).await
    }
}

/// Answers the explicit commands the pattern detector recognises.
///
/// Registered under [`AgentKind::General`]; anything that is not a command
/// gets an empty response.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler;

impl CommandHandler {
    fn keys(decision: &RoutingDecision, field: &str) -> Vec<String> {
        match decision.extracted.get(field) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl AgentHandler for CommandHandler {
    fn kind(&self) -> AgentKind {
        AgentKind::General
    }

    async fn handle(&self, _query: &str, decision: &RoutingDecision) -> RouterResult<HandlerResponse> {
        let response = match decision.extracted.get("command").and_then(Value::as_str) {
            Some("ping") => HandlerResponse::message("pong"),
            Some(_) => HandlerResponse {
                message: None,
                base_random_keys: Self::keys(decision, "base_random_keys"),
                member_random_keys: Self::keys(decision, "member_random_keys"),
            },
            None => HandlerResponse::default(),
        };
        Ok(response)
    }
}
