// src/ingest/dispatcher.rs
//! Single choke point between the drivers (scheduler, webhook intake) and the
//! adapters + feedback store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::ingest::config::IngestConfig;
use crate::ingest::providers::{
    discourse::DiscourseAdapter, intercom::IntercomAdapter, playstore::PlaystoreAdapter,
};
use crate::ingest::types::{PullWindow, PushContext, SourceAdapter};
use crate::models::{FeedbackRecord, NormalizedFeedback, Source, Subscription};
use crate::store::FeedbackStore;

/// Outcome of persisting one batch. Failures are per record.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub stored: Vec<FeedbackRecord>,
    pub failed: Vec<IngestError>,
}

#[derive(Debug, Default)]
pub struct PullReport {
    /// Records persisted, in the order the adapter produced them.
    pub records: Vec<FeedbackRecord>,
    pub rejected: usize,
    pub persist_failures: usize,
    pub truncated: bool,
}

/// Acknowledgement for a webhook delivery. Returned even when nothing was stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PushAck {
    pub stored: usize,
    pub rejected: usize,
    pub persist_failures: usize,
}

pub struct Dispatcher {
    adapters: HashMap<Source, Arc<dyn SourceAdapter>>,
    store: Arc<dyn FeedbackStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn FeedbackStore>) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            adapters: HashMap::new(),
            store,
        }
    }

    /// Register an adapter under its own source identifier (replacing any previous one).
    pub fn with_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.insert(adapter.source(), adapter);
        self
    }

    /// Dispatcher with every built-in adapter, sharing one HTTP client.
    pub fn from_config(cfg: &IngestConfig, store: Arc<dyn FeedbackStore>) -> Result<Self, IngestError> {
        let client = reqwest::Client::builder()
            .timeout(cfg.http_timeout())
            .user_agent(concat!("feedback-ingestion/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::Config(format!("http client: {e}")))?;

        Ok(Self::new(store)
            .with_adapter(Arc::new(DiscourseAdapter::new(
                client.clone(),
                cfg.discourse.clone(),
            )))
            .with_adapter(Arc::new(IntercomAdapter::new(
                client.clone(),
                cfg.intercom.clone(),
            )))
            .with_adapter(Arc::new(PlaystoreAdapter::new(
                client,
                cfg.playstore.clone(),
            ))))
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut v: Vec<Source> = self.adapters.keys().copied().collect();
        v.sort();
        v
    }

    fn adapter(&self, source: Source) -> Result<&Arc<dyn SourceAdapter>, IngestError> {
        self.adapters.get(&source).ok_or_else(|| {
            counter!("ingest_unknown_source_total").increment(1);
            warn!(target: "ingest", source = %source, "no adapter registered");
            IngestError::UnknownSource(source)
        })
    }

    /// Pull one subscription's window and persist the result.
    ///
    /// Errors only for an unregistered source or a failed fetch; per-record
    /// normalization and persistence failures are counted in the report.
    pub async fn dispatch_pull(
        &self,
        sub: &Subscription,
        window: PullWindow,
    ) -> Result<PullReport, IngestError> {
        let adapter = self.adapter(sub.source)?;
        let batch = adapter.pull(sub, window).await?;

        let rejected = batch.rejected.len();
        if rejected > 0 {
            counter!("ingest_normalization_errors_total").increment(rejected as u64);
        }
        if batch.truncated {
            info!(
                target: "ingest",
                subscription_id = %sub.id,
                source = %sub.source,
                kept = batch.records.len(),
                "pull truncated by source limits; keeping partial result"
            );
        }

        let report = self.persist(batch.records).await;
        Ok(PullReport {
            persist_failures: report.failed.len(),
            records: report.stored,
            rejected,
            truncated: batch.truncated,
        })
    }

    /// Normalize and persist one webhook delivery.
    ///
    /// Only `UnknownSource` escapes; a payload that fails normalization is
    /// acknowledged with `rejected = 1` so the source does not retry it.
    pub async fn dispatch_push(
        &self,
        source: Source,
        body: &[u8],
        ctx: &PushContext,
    ) -> Result<PushAck, IngestError> {
        let adapter = self.adapter(source)?;
        counter!("ingest_webhooks_total").increment(1);

        let drafts = match adapter.push(body, ctx).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    target: "ingest",
                    source = %source,
                    tenant_id = %ctx.tenant_id,
                    error = %e,
                    "webhook payload rejected"
                );
                counter!("ingest_normalization_errors_total").increment(1);
                return Ok(PushAck {
                    rejected: 1,
                    ..PushAck::default()
                });
            }
        };

        let report = self.persist(drafts).await;
        Ok(PushAck {
            stored: report.stored.len(),
            rejected: 0,
            persist_failures: report.failed.len(),
        })
    }

    /// Finalize and upsert each record independently, in order.
    pub async fn persist(&self, drafts: Vec<NormalizedFeedback>) -> PersistReport {
        let now = Utc::now();
        let mut report = PersistReport::default();
        for draft in drafts {
            let record = draft.finalize(now);
            match self.store.upsert(record.clone()).await {
                Ok(outcome) => {
                    debug!(target: "ingest", key = %record.key(), ?outcome, "stored");
                    report.stored.push(record);
                }
                Err(cause) => {
                    let key = record.key().to_string();
                    warn!(target: "ingest", key = %key, error = %cause, "persist failed");
                    report.failed.push(IngestError::Persistence { key, cause });
                }
            }
        }
        counter!("ingest_records_stored_total").increment(report.stored.len() as u64);
        if !report.failed.is_empty() {
            counter!("ingest_persistence_errors_total").increment(report.failed.len() as u64);
        }
        report
    }
}
