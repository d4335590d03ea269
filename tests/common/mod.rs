// tests/common/mod.rs
//
// Scripted adapter and store doubles shared by the integration tests.
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::Barrier;

use feedback_ingestion::error::{IngestError, StoreError};
use feedback_ingestion::ingest::{PullBatch, PullWindow, PushContext, SourceAdapter};
use feedback_ingestion::models::{
    FeedbackContent, FeedbackKey, FeedbackRecord, JsonMap, NormalizedFeedback, Source, SourceType,
    Subscription, SubscriptionMode, Tenant,
};
use feedback_ingestion::store::{
    FeedbackEdit, FeedbackStore, MemoryStore, SubscriptionRegistry, TenantStore, UpsertOutcome,
};

/// Adapter whose pull returns a fixed list of raw items. Items need string
/// `id` and `body` fields; anything else is a normalization failure.
pub struct StubAdapter {
    pub source: Source,
    pub items: Vec<Value>,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub barrier: Option<Arc<Barrier>>,
    pub pulls: AtomicUsize,
    pub active: AtomicUsize,
    pub peak: AtomicUsize,
}

/// Counts a pull as running until dropped, including when it is cancelled.
struct Running<'a>(&'a AtomicUsize);

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl StubAdapter {
    pub fn new(source: Source, items: Vec<Value>) -> Self {
        Self {
            source,
            items,
            fail: false,
            delay: None,
            barrier: None,
            pulls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn failing(source: Source) -> Self {
        Self {
            fail: true,
            ..Self::new(source, vec![])
        }
    }

    pub fn slow(source: Source, items: Vec<Value>, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(source, items)
        }
    }

    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Most pulls ever running at the same time.
    pub fn peak_concurrent_pulls(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn normalize(
        &self,
        item: &Value,
        tenant_id: &str,
        sub_source_id: &str,
    ) -> Result<NormalizedFeedback, IngestError> {
        let id = item.get("id").and_then(Value::as_str);
        let body = item.get("body").and_then(Value::as_str);
        match (id, body) {
            (Some(id), Some(body)) => Ok(NormalizedFeedback {
                external_id: Some(id.to_string()),
                tenant_id: tenant_id.to_string(),
                sub_source_id: sub_source_id.to_string(),
                source: self.source,
                source_type: SourceType::Post,
                created_at: None,
                metadata: JsonMap::new(),
                content: FeedbackContent::Text {
                    title: None,
                    body: body.to_string(),
                },
            }),
            _ => Err(IngestError::normalization(self.source, "missing id/body")),
        }
    }
}

#[async_trait]
impl SourceAdapter for StubAdapter {
    async fn pull(&self, sub: &Subscription, _window: PullWindow) -> Result<PullBatch, IngestError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _running = Running(&self.active);
        if let Some(b) = &self.barrier {
            b.wait().await;
        }
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        if self.fail {
            return Err(IngestError::fetch(self.source, "upstream status 503"));
        }
        let mut batch = PullBatch::default();
        for item in &self.items {
            batch.accept(self.normalize(item, &sub.tenant_id, &sub.sub_source_id));
        }
        Ok(batch)
    }

    async fn push(
        &self,
        body: &[u8],
        ctx: &PushContext,
    ) -> Result<Vec<NormalizedFeedback>, IngestError> {
        let v: Value =
            serde_json::from_slice(body).map_err(|e| IngestError::normalization(self.source, e))?;
        Ok(vec![self.normalize(&v, &ctx.tenant_id, &ctx.sub_source_id)?])
    }

    fn source(&self) -> Source {
        self.source
    }

    fn source_type(&self) -> SourceType {
        SourceType::Post
    }
}

/// Feedback store that rejects the listed record ids and delegates the rest.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    pub reject_ids: HashSet<String>,
}

#[async_trait]
impl FeedbackStore for FlakyStore {
    async fn upsert(&self, record: FeedbackRecord) -> Result<UpsertOutcome, StoreError> {
        if self.reject_ids.contains(&record.id) {
            return Err(StoreError::Unavailable("disk full".into()));
        }
        self.inner.upsert(record).await
    }
    async fn save(&self, record: FeedbackRecord) -> Result<(), StoreError> {
        FeedbackStore::save(self.inner.as_ref(), record).await
    }
    async fn get(&self, key: &FeedbackKey) -> Result<FeedbackRecord, StoreError> {
        FeedbackStore::get(self.inner.as_ref(), key).await
    }
    async fn update(
        &self,
        key: &FeedbackKey,
        edit: FeedbackEdit,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, StoreError> {
        FeedbackStore::update(self.inner.as_ref(), key, edit, now).await
    }
    async fn delete(&self, key: &FeedbackKey) -> Result<(), StoreError> {
        FeedbackStore::delete(self.inner.as_ref(), key).await
    }
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<FeedbackRecord>, StoreError> {
        FeedbackStore::list_by_tenant(self.inner.as_ref(), tenant_id).await
    }
}

pub fn item(id: &str, body: &str) -> Value {
    json!({ "id": id, "body": body })
}

/// Store with tenant `t1` registered.
pub async fn store_with_tenant() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    TenantStore::save(
        store.as_ref(),
        Tenant {
            id: "t1".into(),
            name: "Acme".into(),
            configurations: JsonMap::new(),
        },
    )
    .await
    .expect("seed tenant");
    store
}

/// Register an active pull subscription whose cursor sits at `last_pulled`.
pub async fn pull_subscription(
    store: &MemoryStore,
    source: Source,
    sub_source_id: &str,
    last_pulled: DateTime<Utc>,
) -> Subscription {
    let mut sub = Subscription::new(
        "t1",
        sub_source_id,
        source,
        SubscriptionMode::Pull,
        JsonMap::new(),
        last_pulled,
    );
    sub.last_pulled = last_pulled;
    SubscriptionRegistry::create(store, sub.clone())
        .await
        .expect("create subscription");
    sub
}
