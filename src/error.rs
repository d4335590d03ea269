// src/error.rs
use thiserror::Error;

use crate::models::Source;

/// Failures of the storage collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    Conflict(String),
    #[error("unknown tenant `{0}`")]
    UnknownTenant(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Error taxonomy of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed source payload. Skips the item, never fatal to the batch.
    #[error("{origin}: cannot normalize payload: {reason}")]
    Normalization { origin: Source, reason: String },

    /// Upstream failure during a pull. Aborts that subscription's cycle only.
    #[error("{origin}: fetch failed: {reason}")]
    Fetch { origin: Source, reason: String },

    /// Pull unit ran past its deadline; handled like a fetch failure.
    #[error("{origin}: pull exceeded its {secs}s deadline")]
    Timeout { origin: Source, secs: u64 },

    /// No adapter registered for the identifier. Configuration bug, not retried.
    #[error("no adapter registered for source `{0}`")]
    UnknownSource(Source),

    /// Storage write failure for a single record.
    #[error("persisting {key} failed: {cause}")]
    Persistence {
        key: String,
        #[source]
        cause: StoreError,
    },

    #[error("invalid ingest configuration: {0}")]
    Config(String),
}

impl IngestError {
    pub fn normalization(origin: Source, reason: impl ToString) -> Self {
        IngestError::Normalization {
            origin,
            reason: reason.to_string(),
        }
    }

    pub fn fetch(origin: Source, reason: impl ToString) -> Self {
        IngestError::Fetch {
            origin,
            reason: reason.to_string(),
        }
    }

    /// Failures that leave the cursor in place and get retried next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::Fetch { .. } | IngestError::Timeout { .. })
    }
}
