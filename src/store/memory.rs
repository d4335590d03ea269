// src/store/memory.rs
//! In-process implementation of all three collaborators behind one lock, so
//! tenant cascades and cursor compare-and-set are atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    CursorAdvance, FeedbackEdit, FeedbackStore, SubscriptionRegistry, TenantStore, UpsertOutcome,
};
use crate::error::StoreError;
use crate::models::{FeedbackKey, FeedbackRecord, Subscription, Tenant};

#[derive(Default)]
struct Tables {
    tenants: HashMap<String, Tenant>,
    subscriptions: HashMap<Uuid, Subscription>,
    feedback: HashMap<FeedbackKey, FeedbackRecord>,
}

impl Tables {
    fn require_tenant(&self, tenant_id: &str) -> Result<(), StoreError> {
        if self.tenants.contains_key(tenant_id) {
            Ok(())
        } else {
            Err(StoreError::UnknownTenant(tenant_id.to_string()))
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn feedback_count(&self) -> usize {
        self.tables.read().await.feedback.len()
    }
}

#[async_trait]
impl FeedbackStore for MemoryStore {
    async fn upsert(&self, record: FeedbackRecord) -> Result<UpsertOutcome, StoreError> {
        let mut t = self.tables.write().await;
        t.require_tenant(&record.tenant_id)?;
        let key = record.key();
        match t.feedback.get_mut(&key) {
            Some(existing) => {
                let created_at = existing.created_at;
                *existing = FeedbackRecord {
                    created_at,
                    ..record
                };
                Ok(UpsertOutcome::Updated)
            }
            None => {
                t.feedback.insert(key, record);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn save(&self, record: FeedbackRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.require_tenant(&record.tenant_id)?;
        let key = record.key();
        if t.feedback.contains_key(&key) {
            return Err(StoreError::Conflict(format!("feedback {key}")));
        }
        t.feedback.insert(key, record);
        Ok(())
    }

    async fn get(&self, key: &FeedbackKey) -> Result<FeedbackRecord, StoreError> {
        self.tables
            .read()
            .await
            .feedback
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("feedback {key}")))
    }

    async fn update(
        &self,
        key: &FeedbackKey,
        edit: FeedbackEdit,
        now: DateTime<Utc>,
    ) -> Result<FeedbackRecord, StoreError> {
        let mut t = self.tables.write().await;
        let rec = t
            .feedback
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(format!("feedback {key}")))?;
        if let Some(content) = edit.content {
            rec.content = content;
        }
        if let Some(metadata) = edit.metadata {
            rec.metadata = metadata;
        }
        rec.updated_at = now;
        Ok(rec.clone())
    }

    async fn delete(&self, key: &FeedbackKey) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .feedback
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("feedback {key}")))
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<FeedbackRecord>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<FeedbackRecord> = t
            .feedback
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl SubscriptionRegistry for MemoryStore {
    async fn create(&self, sub: Subscription) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        t.require_tenant(&sub.tenant_id)?;
        if t.subscriptions.contains_key(&sub.id) {
            return Err(StoreError::Conflict(format!("subscription {}", sub.id)));
        }
        t.subscriptions.insert(sub.id, sub);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Subscription, StoreError> {
        self.tables
            .read()
            .await
            .subscriptions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .subscriptions
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))
    }

    async fn list_by_tenant(&self, tenant_id: &str) -> Result<Vec<Subscription>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Subscription> = t
            .subscriptions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn list_active_pull(&self) -> Result<Vec<Subscription>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Subscription> = t
            .subscriptions
            .values()
            .filter(|s| s.is_active_pull())
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<Subscription, StoreError> {
        let mut t = self.tables.write().await;
        let sub = t
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))?;
        sub.active = active;
        Ok(sub.clone())
    }

    async fn advance_cursor(
        &self,
        id: Uuid,
        observed: DateTime<Utc>,
        new: DateTime<Utc>,
    ) -> Result<CursorAdvance, StoreError> {
        let mut t = self.tables.write().await;
        let sub = t
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {id}")))?;
        if sub.last_pulled != observed || new < sub.last_pulled {
            return Ok(CursorAdvance::Stale {
                current: sub.last_pulled,
            });
        }
        sub.last_pulled = new;
        Ok(CursorAdvance::Advanced)
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn save(&self, tenant: Tenant) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.tenants.contains_key(&tenant.id) {
            return Err(StoreError::Conflict(format!("tenant {}", tenant.id)));
        }
        t.tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Tenant, StoreError> {
        self.tables
            .read()
            .await
            .tenants
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("tenant {id}")))
    }

    async fn update(&self, tenant: Tenant) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match t.tenants.get_mut(&tenant.id) {
            Some(existing) => {
                *existing = tenant;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("tenant {}", tenant.id))),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.tenants.remove(id).is_none() {
            return Err(StoreError::NotFound(format!("tenant {id}")));
        }
        t.subscriptions.retain(|_, s| s.tenant_id != id);
        t.feedback.retain(|k, _| k.tenant_id != id);
        Ok(())
    }
}
