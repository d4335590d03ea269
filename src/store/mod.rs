// src/store/mod.rs
//! Contracts of the persistence collaborators consumed by the ingestion core.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{FeedbackContent, FeedbackKey, FeedbackRecord, JsonMap, Subscription, Tenant};

pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Explicit edit of a stored record. Fields left `None` are kept.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedbackEdit {
    #[serde(default)]
    pub content: Option<FeedbackContent>,
    #[serde(default)]
    pub metadata: Option<JsonMap>,
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Insert or replace by (tenant, source, id). A replace keeps the first
    /// `created_at`.
    async fn upsert(&self, record: FeedbackRecord) -> Result<UpsertOutcome, StoreError>;
    /// Insert-only; `Conflict` when the key exists.
    async fn save(&self, record: FeedbackRecord) -> Result<(), StoreError>;
    async fn get(&self, key: &FeedbackKey) -> Result<FeedbackRecord, StoreError>;
    async fn update(
        &self,
        key: &FeedbackKey,
        edit: FeedbackEdit,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, StoreError>;
    async fn delete(&self, key: &FeedbackKey) -> Result<(), StoreError>;
    /// Newest first.
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<FeedbackRecord>, StoreError>;
}

/// Result of a conditional cursor update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorAdvance {
    Advanced,
    /// The stored cursor no longer matches what the caller observed, or the
    /// new value would move it backwards. Nothing was written.
    Stale { current: DateTime<Utc> },
}

#[async_trait]
pub trait SubscriptionRegistry: Send + Sync {
    async fn create(&self, sub: Subscription) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Subscription, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>, StoreError>;
    /// Subscriptions with mode = pull and active = true.
    async fn list_active_pull(&self) -> Result<Vec<Subscription>, StoreError>;
    async fn set_active(&self, id: Uuid, active: bool) -> Result<Subscription, StoreError>;
    /// Row-level compare-and-set of `last_pulled`: writes `new` only when the
    /// stored value still equals `observed` and `new >= observed`.
    async fn advance_cursor(
        &self,
        id: Uuid,
        observed: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> Result<CursorAdvance, StoreError>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn save(&self, tenant: Tenant) -> Result<(), StoreError>;
    async fn get(&self, id: &str) -> Result<Tenant, StoreError>;
    async fn update(&self, tenant: Tenant) -> Result<(), StoreError>;
    /// Cascades to the tenant's subscriptions and feedback.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}
