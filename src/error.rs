//! Error types for the hybrid router
//!
//! Stage-local failures (a provider timing out, a malformed provider response)
//! are absorbed by the router and turned into degraded signals. Startup
//! failures (bad configuration, an index that was never built) are fatal and
//! surface through this type to the binary.

use crate::routing::AgentKind;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("ANN index searched before it was built")]
    IndexUnbuilt,

    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding cache store error: {message}")]
    CacheStore { message: String },

    #[error("No handler registered for agent '{agent}'")]
    HandlerMissing { agent: AgentKind },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl RouterError {
    /// Create provider unavailable error
    pub fn provider_unavailable<P: Into<String>, S: Into<String>>(provider: P, message: S) -> Self {
        Self::ProviderUnavailable {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create invalid configuration error
    pub fn invalid_configuration<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create cache store error
    pub fn cache_store<S: Into<String>>(message: S) -> Self {
        Self::CacheStore {
            message: message.into(),
        }
    }

    /// Create dimension mismatch error
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Whether the failure is local to one routing stage and can be replaced
    /// by a degraded signal instead of aborting
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RouterError::ProviderUnavailable { .. }
                | RouterError::DimensionMismatch { .. }
                | RouterError::CacheStore { .. }
        )
    }

    /// Display form with secrets and credential paths removed, safe for logs
    /// and reasoning strings
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_ASSIGNMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("secret pattern is valid")
});

static CREDENTIAL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("credential path pattern is valid")
});

const MAX_MESSAGE_LEN: usize = 500;
const TRUNCATE_SUFFIX: &str = "...[truncated]";

/// Sanitize error messages before they reach logs or routing decisions
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_ASSIGNMENT.replace_all(message, "${1}=***");
    let mut sanitized = CREDENTIAL_PATH
        .replace_all(&sanitized, "/***REDACTED***/")
        .into_owned();

    // Truncate on a char boundary; queries are frequently non-ASCII
    if sanitized.len() > MAX_MESSAGE_LEN {
        let mut cut = MAX_MESSAGE_LEN - TRUNCATE_SUFFIX.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(TRUNCATE_SUFFIX);
    }

    sanitized
}

/// Result type for router operations
pub type RouterResult<T> = Result<T, RouterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_unavailable_sanitized() {
        let error = RouterError::provider_unavailable(
            "openai",
            "401 Unauthorized: api_key=sk-live-123 rejected",
        );

        let message = error.sanitized();
        assert!(message.starts_with("Provider 'openai' unavailable"));
        assert!(!message.contains("sk-live-123"));
        assert!(message.contains("key=***"));
    }

    #[test]
    fn test_error_message_sanitization() {
        let sanitized =
            sanitize_error_message("Failed to authenticate: password=secret123 token=abc456");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let sanitized = sanitize_error_message(&"x".repeat(600));

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        // Two-byte chars push the cut point into the middle of a character
        let message = format!("x{}", "ک".repeat(400));
        let sanitized = sanitize_error_message(&message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_sanitize_exactly_500_chars() {
        let sanitized = sanitize_error_message(&"x".repeat(500));
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_file_path_redaction() {
        let sanitized =
            sanitize_error_message("Failed to read /home/user/.ssh/id_rsa and /etc/secrets/api.key");

        assert!(sanitized.contains("/***REDACTED***/"));
        assert!(!sanitized.contains("/home/user/.ssh/id_rsa"));
    }

    #[test]
    fn test_sanitize_case_insensitive_with_colons() {
        let sanitized = sanitize_error_message("PASSWORD: secret123 Token=abc");

        assert!(!sanitized.contains("secret123"));
        assert!(!sanitized.contains("abc"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(RouterError::provider_unavailable("openai", "timeout").is_recoverable());
        assert!(RouterError::dimension_mismatch(1536, 3).is_recoverable());
        assert!(!RouterError::IndexUnbuilt.is_recoverable());
        assert!(!RouterError::invalid_configuration("weights").is_recoverable());
        assert!(!RouterError::HandlerMissing {
            agent: AgentKind::Comparison
        }
        .is_recoverable());
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(
            RouterError::dimension_mismatch(8, 4).to_string(),
            "Vector dimension mismatch: expected 8, got 4"
        );
        assert_eq!(
            RouterError::HandlerMissing {
                agent: AgentKind::SellerInfo
            }
            .to_string(),
            "No handler registered for agent 'seller_info'"
        );
    }
}
