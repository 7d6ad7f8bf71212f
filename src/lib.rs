//! Hybrid multi-signal query router
//!
//! Decides which downstream handler should answer a natural-language query by
//! fusing three independent signals:
//!
//! - deterministic pattern rules and explicit commands
//! - a structured-intent extractor
//! - embedding similarity against a labelled exemplar corpus, searched with an
//!   HNSW index
//!
//! Decisions are bounded by a per-session turn budget.
//!
//! # Quick Start
//!
//! ```rust
//! use hybrid_router::routing::{AgentKind, PatternDetector};
//!
//! let signal = PatternDetector::new().detect("return base random key: abc-123");
//! assert_eq!(signal.agent, Some(AgentKind::General));
//! assert_eq!(signal.extracted["base_random_keys"][0], "abc-123");
//! ```
//!
//! A full router is built from configuration:
//!
//! ```rust,no_run
//! use hybrid_router::{RouterConfig, RouterOrchestrator};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RouterConfig::load_from_file("router.toml".as_ref())?;
//! let router = RouterOrchestrator::from_config(&config).await?;
//! let decision = router.route("compare these two phones", "session-1").await;
//! println!("{} ({:.2})", decision.agent, decision.confidence);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod intent;
pub mod llm;
pub mod observability;
pub mod routing;
pub mod session;
pub mod testing;

pub use config::{ConfigError, RouterConfig};
pub use error::{RouterError, RouterResult};
pub use routing::{AgentKind, RouterOrchestrator, RoutingDecision, SignalResult};
