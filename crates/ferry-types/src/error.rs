//! Structured error model for migration operations.
//!
//! [`MigrationError`] carries classification and retry metadata. Construct
//! via category-specific factory methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error code: an archive entry or extracted path escapes the scratch directory.
pub const PATH_TRAVERSAL: &str = "PATH_TRAVERSAL";
/// Error code: an extracted artifact is a symbolic link.
pub const SYMLINK: &str = "SYMLINK";
/// Error code: an extracted artifact has more than one hard link.
pub const HARD_LINK: &str = "HARD_LINK";
/// Error code: a URL targets a host on the local network.
pub const BLOCKED_URL: &str = "BLOCKED_URL";
/// Error code: a URL uses a scheme other than http/https.
pub const BLOCKED_SCHEME: &str = "BLOCKED_SCHEME";
/// Error code: a download or decompressed payload exceeded its size cap.
pub const SIZE_LIMIT: &str = "SIZE_LIMIT";

/// Prefix attached to security failures in operator-facing summaries.
pub const SECURITY_PREFIX: &str = "security validation failed";

/// Broad classification of a migration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Page fetch or download failed.
    Transport,
    /// Source asked us to slow down (retryable).
    RateLimit,
    /// A record or artifact could not be processed.
    Data,
    /// Path traversal, link attack, or disallowed URL. Never retryable.
    Security,
    /// Invalid migration configuration.
    Config,
    /// Destination uniqueness conflict.
    Conflict,
    /// Bug or broken invariant inside the engine.
    Internal,
    /// Work stopped because the tracker or entity was canceled.
    Canceled,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::RateLimit => "rate_limit",
            Self::Data => "data",
            Self::Security => "security",
            Self::Config => "config",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
            Self::Canceled => "canceled",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "transport" => Some(Self::Transport),
            "rate_limit" => Some(Self::RateLimit),
            "data" => Some(Self::Data),
            "security" => Some(Self::Security),
            "config" => Some(Self::Config),
            "conflict" => Some(Self::Conflict),
            "internal" => Some(Self::Internal),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry backoff strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffClass {
    /// Millisecond-scale retry.
    Fast,
    /// Second-scale retry.
    Normal,
    /// Multi-second retry for rate limiting.
    Slow,
}

/// Structured error from an extractor, transformer, loader or the stager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("[{category}] {code}: {message}")]
pub struct MigrationError {
    pub category: ErrorCategory,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub backoff_class: BackoffClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl MigrationError {
    fn new(
        category: ErrorCategory,
        retryable: bool,
        backoff_class: BackoffClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retryable,
            retry_after_ms: None,
            backoff_class,
            details: None,
        }
    }

    /// Transport error. Retryability depends on the failure (5xx vs 4xx).
    #[must_use]
    pub fn transport(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        Self::new(ErrorCategory::Transport, retryable, BackoffClass::Normal, code, message)
    }

    /// Rate limit error (retryable, slow backoff).
    #[must_use]
    pub fn rate_limit(
        code: impl Into<String>,
        message: impl Into<String>,
        retry_after_ms: Option<u64>,
    ) -> Self {
        let mut err = Self::new(ErrorCategory::RateLimit, true, BackoffClass::Slow, code, message);
        err.retry_after_ms = retry_after_ms;
        err
    }

    /// Data error (not retryable).
    #[must_use]
    pub fn data(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Data, false, BackoffClass::Normal, code, message)
    }

    /// Security validation error. Never retryable.
    #[must_use]
    pub fn security(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Security, false, BackoffClass::Normal, code, message)
    }

    /// Configuration error (not retryable).
    #[must_use]
    pub fn config(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Config, false, BackoffClass::Normal, code, message)
    }

    /// Destination conflict (not retryable).
    #[must_use]
    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Conflict, false, BackoffClass::Normal, code, message)
    }

    /// Internal error (not retryable).
    #[must_use]
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Internal, false, BackoffClass::Normal, code, message)
    }

    /// Work stopped by cancellation.
    #[must_use]
    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Canceled, false, BackoffClass::Normal, "CANCELED", message)
    }

    /// Attach structured diagnostic details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn is_security(&self) -> bool {
        self.category == ErrorCategory::Security
    }

    /// Whether the error should be retried. Security errors never are, even
    /// if a caller constructed one by hand with `retryable` set.
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.retryable && !self.is_security()
    }

    /// Whether a loader error stops the whole tracker instead of being
    /// recorded against a single record.
    #[must_use]
    pub fn aborts_tracker(&self) -> bool {
        matches!(
            self.category,
            ErrorCategory::Security
                | ErrorCategory::Transport
                | ErrorCategory::RateLimit
                | ErrorCategory::Canceled
        )
    }

    /// Operator-facing message. Security failures carry a distinct prefix
    /// so they are not mistaken for transient network trouble.
    #[must_use]
    pub fn summary_message(&self) -> String {
        summary_message(self.category, &self.code, &self.message)
    }
}

/// Render the operator-facing message for a categorized failure.
#[must_use]
pub fn summary_message(category: ErrorCategory, code: &str, message: &str) -> String {
    if category == ErrorCategory::Security {
        format!("{SECURITY_PREFIX}: [{category}] {code}: {message}")
    } else {
        format!("[{category}] {code}: {message}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_format() {
        let err = MigrationError::data("BAD_RECORD", "missing iid");
        assert_eq!(err.to_string(), "[data] BAD_RECORD: missing iid");
    }

    #[test]
    fn security_is_never_retryable() {
        let mut err = MigrationError::security(SYMLINK, "bundle is a symlink");
        assert!(!err.retryable);
        err.retryable = true;
        assert!(!err.should_retry());
        assert!(err.is_security());
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        let err = MigrationError::rate_limit("HTTP_429", "slow down", Some(2_000));
        assert!(err.should_retry());
        assert_eq!(err.backoff_class, BackoffClass::Slow);
        assert_eq!(err.retry_after_ms, Some(2_000));
    }

    #[test]
    fn transport_retryability_is_explicit() {
        assert!(MigrationError::transport("HTTP_503", "unavailable", true).should_retry());
        assert!(!MigrationError::transport("HTTP_404", "not found", false).should_retry());
    }

    #[test]
    fn record_level_errors_do_not_abort() {
        assert!(!MigrationError::data("BAD", "x").aborts_tracker());
        assert!(!MigrationError::conflict("DUP", "x").aborts_tracker());
        assert!(MigrationError::security(SYMLINK, "x").aborts_tracker());
        assert!(MigrationError::canceled("stop").aborts_tracker());
    }

    #[test]
    fn security_summary_is_prefixed() {
        let err = MigrationError::security(PATH_TRAVERSAL, "escapes scratch dir");
        assert_eq!(
            err.summary_message(),
            "security validation failed: [security] PATH_TRAVERSAL: escapes scratch dir"
        );
        let plain = MigrationError::transport("HTTP_500", "boom", true);
        assert_eq!(plain.summary_message(), "[transport] HTTP_500: boom");
    }

    #[test]
    fn serde_roundtrip_skips_empty_options() {
        let err = MigrationError::config("BAD", "nope");
        let json = serde_json::to_value(&err).unwrap();
        assert!(json.get("retry_after_ms").is_none());
        assert!(json.get("details").is_none());
        let back: MigrationError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn category_parse_matches_as_str() {
        for cat in [
            ErrorCategory::Transport,
            ErrorCategory::RateLimit,
            ErrorCategory::Data,
            ErrorCategory::Security,
            ErrorCategory::Config,
            ErrorCategory::Conflict,
            ErrorCategory::Internal,
            ErrorCategory::Canceled,
        ] {
            assert_eq!(ErrorCategory::parse(cat.as_str()), Some(cat));
        }
    }
}
