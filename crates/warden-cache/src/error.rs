use thiserror::Error;

/// Errors surfaced by cache operations.
///
/// `StoreUnavailable` means "unknown", not "absent": a caller must not
/// treat a failed remote read as a miss, and a write that could not reach
/// the remote store was not durable.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Remote store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Create a new StoreUnavailable error
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            reason: reason.into(),
        }
    }

    /// Whether the error is a remote availability failure.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}
