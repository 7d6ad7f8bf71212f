//! Structured logging and routing metrics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, parse_level, LogFormat};
pub use metrics::{metrics, MetricsSnapshot, RoutingMetrics, Stage};

// Span macros for structured logging
pub use logging::{embedding_span, routing_span, session_span};
