//! Hybrid query routing
//!
//! Three independent signals decide which handler receives a query:
//!
//! - [`pattern`]: deterministic rules and explicit commands
//! - [`crate::intent`]: structured intent from an extractor service
//! - [`semantic`]: nearest exemplars in embedding space
//!
//! [`combiner`] fuses them and [`orchestrator`] sequences a full pass,
//! including the session turn budget. [`registry`] maps the chosen
//! [`AgentKind`] onto a handler.

pub mod agent_kind;
pub mod combiner;
pub mod exemplars;
pub mod orchestrator;
pub mod pattern;
pub mod registry;
pub mod semantic;
pub mod signal;

pub use agent_kind::AgentKind;
pub use combiner::DecisionCombiner;
pub use exemplars::{Exemplar, ExemplarSet};
pub use orchestrator::RouterOrchestrator;
pub use pattern::PatternDetector;
pub use registry::{AgentHandler, CommandHandler, HandlerRegistry, HandlerResponse};
pub use semantic::{SemanticRouter, SemanticScores, SemanticThresholds, Strength};
pub use signal::{Extracted, RoutingDecision, SignalResult};
