// src/ingest/types.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::IngestError;
use crate::models::{NormalizedFeedback, Source, SourceType, Subscription};

/// Query window of one pull: everything created in `[since, until]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullWindow {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl PullWindow {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self {
            since,
            until: until.max(since),
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since && ts <= self.until
    }
}

/// Request-scoped identifiers of an inbound webhook (taken from the query string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushContext {
    pub tenant_id: String,
    #[serde(default)]
    pub sub_source_id: String,
}

/// Output of one pull. Items that failed normalization are reported in
/// `rejected` and do not abort the batch; `truncated` marks a partial result.
#[derive(Debug, Default)]
pub struct PullBatch {
    pub records: Vec<NormalizedFeedback>,
    pub rejected: Vec<IngestError>,
    pub truncated: bool,
}

impl PullBatch {
    pub fn accept(&mut self, item: Result<NormalizedFeedback, IngestError>) {
        match item {
            Ok(rec) => self.records.push(rec),
            Err(e) => {
                tracing::warn!(target: "ingest", error = %e, "skipping item");
                self.rejected.push(e);
            }
        }
    }
}

/// One implementation per external source. Normalization is pure; adapters
/// never write to storage and never touch the subscription cursor.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch content created inside `window` for `sub` and normalize it.
    async fn pull(&self, sub: &Subscription, window: PullWindow) -> Result<PullBatch, IngestError>;

    /// Normalize a single webhook delivery.
    async fn push(
        &self,
        body: &[u8],
        ctx: &PushContext,
    ) -> Result<Vec<NormalizedFeedback>, IngestError>;

    fn source(&self) -> Source;

    fn source_type(&self) -> SourceType;
}
