//! Error types for cache operations

use thiserror::Error;

use crate::store::StoreError;
use crate::tier::TierKind;

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur during cache operations.
///
/// A cache miss is not an error: it is a successful [`Outcome`](crate::Outcome)
/// carrying the zero value. Variants hold rendered messages so that a single
/// error can be handed to every caller sharing a coalesced execution.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Storage or network failure in one tier (timeouts included)
    #[error("{tier} tier error: {message}")]
    Tier { tier: TierKind, message: String },

    /// Value or key could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A handler panicked; the panic was caught and converted
    #[error("Handler panicked: {message}")]
    Panic { message: String, backtrace: String },

    /// The caller-supplied loader failed
    #[error("Loader error: {0}")]
    Loader(String),

    /// Invalid construction or settings
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Wrap a storage failure for the given tier, tagged with the step that failed.
    pub fn tier(tier: TierKind, step: &str, err: impl std::fmt::Display) -> Self {
        CacheError::Tier {
            tier,
            message: format!("{step}: {err}"),
        }
    }

    /// Build a loader error from anything displayable.
    pub fn loader(err: impl std::fmt::Display) -> Self {
        CacheError::Loader(err.to_string())
    }

    /// Convert a caught panic payload into an error, capturing a backtrace.
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        CacheError::Panic {
            message,
            backtrace: std::backtrace::Backtrace::capture().to_string(),
        }
    }

    /// Whether this error came from a storage tier.
    pub fn is_tier(&self) -> bool {
        matches!(self, CacheError::Tier { .. })
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        CacheError::Tier {
            tier: TierKind::Remote,
            message: err.to_string(),
        }
    }
}

impl From<config::ConfigError> for CacheError {
    fn from(err: config::ConfigError) -> Self {
        CacheError::Config(err.to_string())
    }
}
