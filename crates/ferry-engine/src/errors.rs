//! Engine error model and retry backoff policy helpers.

use std::time::Duration;

use ferry_state::StateError;
use ferry_types::error::{BackoffClass, MigrationError};

const BACKOFF_FAST_BASE_MS: u64 = 100;
const BACKOFF_NORMAL_BASE_MS: u64 = 1_000;
const BACKOFF_SLOW_BASE_MS: u64 = 5_000;
const BACKOFF_MAX_MS: u64 = 60_000;

// ---------------------------------------------------------------------------
// EngineError: categorised errors for retry decisions
// ---------------------------------------------------------------------------

/// Categorized engine error.
///
/// `Migration` wraps a typed [`MigrationError`] with retry metadata.
///
/// `Infrastructure` wraps opaque host-side errors (state database failures,
/// task panics, I/O on scratch space) that are never retried.
#[derive(Debug)]
pub enum EngineError {
    /// Typed migration error with retry metadata.
    Migration(MigrationError),
    /// Infrastructure error (state backend, task join, etc.)
    Infrastructure(anyhow::Error),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Migration(e) => write!(f, "{e}"),
            Self::Infrastructure(e) => write!(f, "{e:#}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<anyhow::Error> for EngineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<MigrationError> for EngineError {
    fn from(e: MigrationError) -> Self {
        Self::Migration(e)
    }
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        Self::Infrastructure(anyhow::Error::new(e))
    }
}

impl EngineError {
    /// Returns `true` if this is a typed migration error marked retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Migration(e) => e.should_retry(),
            Self::Infrastructure(_) => false,
        }
    }

    /// Returns the typed migration error if this is a `Migration` variant.
    pub fn as_migration_error(&self) -> Option<&MigrationError> {
        match self {
            Self::Migration(e) => Some(e),
            Self::Infrastructure(_) => None,
        }
    }

    pub fn is_security(&self) -> bool {
        self.as_migration_error().is_some_and(MigrationError::is_security)
    }

    /// Flatten into a typed error for recording as a failure.
    pub fn into_migration_error(self) -> MigrationError {
        match self {
            Self::Migration(e) => e,
            Self::Infrastructure(e) => MigrationError::internal("INFRASTRUCTURE", format!("{e:#}")),
        }
    }
}

/// Map a destination or state store error into a typed record-level error.
pub(crate) fn store_error(err: &StateError) -> MigrationError {
    MigrationError::internal("STORE", err.to_string())
}

/// Compute retry delay based on error hints and attempt number.
pub(crate) fn compute_backoff(err: &MigrationError, attempt: u32) -> Duration {
    if let Some(ms) = err.retry_after_ms {
        return Duration::from_millis(ms.min(BACKOFF_MAX_MS));
    }

    let base_ms: u64 = match err.backoff_class {
        BackoffClass::Fast => BACKOFF_FAST_BASE_MS,
        BackoffClass::Normal => BACKOFF_NORMAL_BASE_MS,
        BackoffClass::Slow => BACKOFF_SLOW_BASE_MS,
    };

    let exponent = attempt.saturating_sub(1).min(16);
    let delay_ms = base_ms.saturating_mul(2u64.pow(exponent));
    Duration::from_millis(delay_ms.min(BACKOFF_MAX_MS))
}
