//! Structured logging using the tracing crate
//!
//! Log lines go to stderr so the `route` subcommand can print decisions on
//! stdout without interleaving.
//!
//! ## Environment Variables
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty or compact (default json)
//! - `LOG_SPANS`: emit span open/close events when `true` (default false)
//! - `RUST_LOG`: overrides the filter entirely
//!
//! ```bash
//! LOG_FORMAT=pretty LOG_LEVEL=DEBUG hybrid-router route --session s1 "compare these two"
//! ```

use std::env;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Machine-readable JSON lines
    Json,
    /// Multi-line, coloured
    Pretty,
    /// Single-line, coloured
    Compact,
}

impl LogFormat {
    /// Parse log format from string; unknown values fall back to JSON
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

/// Parse a log level name; unknown values fall back to INFO
pub fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

fn span_events(include_spans: bool) -> FmtSpan {
    if include_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if let Ok(rust_log) = env::var("RUST_LOG") {
        return EnvFilter::new(rust_log);
    }

    let mut filter = EnvFilter::new(level.to_string());
    // HTTP client internals are noisy at debug
    for directive in ["hyper=warn", "hyper_util=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Initialize logging with manual configuration.
///
/// Calling this twice is harmless; the second subscriber is discarded.
pub fn init_logging(level: Level, format: LogFormat, include_spans: bool) {
    let subscriber = tracing_subscriber::registry().with(build_filter(level));

    let result = match format {
        LogFormat::Json => subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Pretty => subscriber
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
        LogFormat::Compact => subscriber
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(true)
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_span_events(span_events(include_spans)),
            )
            .try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already installed");
    }
}

/// Initialize logging from environment variables
pub fn init_default_logging() {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()));
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string()));
    let include_spans = env::var("LOG_SPANS")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    init_logging(level, format, include_spans);
}

/// Span covering one routing pass
#[macro_export]
macro_rules! routing_span {
    ($($field:tt)*) => {
        tracing::info_span!("routing", $($field)*)
    };
}

/// Span covering one embedding cache lookup or batch
#[macro_export]
macro_rules! embedding_span {
    ($($field:tt)*) => {
        tracing::debug_span!("embedding", $($field)*)
    };
}

/// Span covering a session store operation
#[macro_export]
macro_rules! session_span {
    ($($field:tt)*) => {
        tracing::debug_span!("session", $($field)*)
    };
}

pub use {embedding_span, routing_span, session_span};
