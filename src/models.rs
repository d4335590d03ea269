// src/models.rs
//! Canonical data model shared by adapters, the dispatcher, the scheduler and
//! the storage collaborators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Free-form JSON object used for subscription configuration and record metadata.
pub type JsonMap = serde_json::Map<String, serde_json::Value>;

/// External system a subscription is bound to. One adapter per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Intercom,
    Discourse,
    Playstore,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Intercom, Source::Discourse, Source::Playstore];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Intercom => "intercom",
            Source::Discourse => "discourse",
            Source::Playstore => "playstore",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownSourceName(pub String);

impl fmt::Display for UnknownSourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown source `{}`", self.0)
    }
}

impl std::error::Error for UnknownSourceName {}

impl FromStr for Source {
    type Err = UnknownSourceName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Source::ALL
            .into_iter()
            .find(|src| src.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownSourceName(s.to_string()))
    }
}

/// Classification of the content a source produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Conversation,
    Review,
    Post,
    Survey,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Conversation => "conversation",
            SourceType::Review => "review",
            SourceType::Post => "post",
            SourceType::Survey => "survey",
        }
    }
}

/// Which driver invokes the adapter for a subscription. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Push,
    Pull,
}

impl FromStr for SubscriptionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "push" => Ok(SubscriptionMode::Push),
            "pull" => Ok(SubscriptionMode::Pull),
            other => Err(format!("mode must be 'push' or 'pull', got '{other}'")),
        }
    }
}

/// One tenant's binding to one source instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant_id: String,
    pub sub_source_id: String,
    pub source: Source,
    pub mode: SubscriptionMode,
    /// Passed verbatim to the adapter (tokens, filters, app ids).
    #[serde(default)]
    pub configuration: JsonMap,
    pub created_at: DateTime<Utc>,
    /// Pull watermark. Only moves forward, and only after a successful pull.
    pub last_pulled: DateTime<Utc>,
    pub active: bool,
}

impl Subscription {
    /// New active subscription with a generated id; the cursor starts at `now`.
    pub fn new(
        tenant_id: impl Into<String>,
        sub_source_id: impl Into<String>,
        source: Source,
        mode: SubscriptionMode,
        configuration: JsonMap,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            sub_source_id: sub_source_id.into(),
            source,
            mode,
            configuration,
            created_at: now,
            last_pulled: now,
            active: true,
        }
    }

    pub fn is_active_pull(&self) -> bool {
        self.active && self.mode == SubscriptionMode::Pull
    }

    /// String-valued configuration entry, trimmed; empty strings count as missing.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.configuration
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// One message of a conversation, in source order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub author: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyAnswer {
    pub question: String,
    pub answer: serde_json::Value,
}

/// Canonical content. The tag travels with the payload (`{"kind": ..., "data": ...}`)
/// so stored content decodes without guessing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum FeedbackContent {
    Conversation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        messages: Vec<Message>,
    },
    Text {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        body: String,
    },
    Survey {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        survey_id: Option<String>,
        answers: Vec<SurveyAnswer>,
    },
}

/// Natural dedup key of a stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedbackKey {
    pub tenant_id: String,
    pub source: Source,
    pub id: String,
}

impl fmt::Display for FeedbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_id, self.source, self.id)
    }
}

/// One normalized unit of external content, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub tenant_id: String,
    pub sub_source_id: String,
    pub source: Source,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: JsonMap,
    pub content: FeedbackContent,
}

impl FeedbackRecord {
    pub fn key(&self) -> FeedbackKey {
        FeedbackKey {
            tenant_id: self.tenant_id.clone(),
            source: self.source,
            id: self.id.clone(),
        }
    }
}

/// What an adapter produces: a record that has not been stamped with
/// ingestion time yet and may lack a stable external id.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeedback {
    pub external_id: Option<String>,
    pub tenant_id: String,
    pub sub_source_id: String,
    pub source: Source,
    pub source_type: SourceType,
    pub created_at: Option<DateTime<Utc>>,
    pub metadata: JsonMap,
    pub content: FeedbackContent,
}

impl NormalizedFeedback {
    /// Stamp ingestion time and resolve the record id.
    ///
    /// Without an external id the id is a digest of tenant, source, sub-source
    /// and content, so an identical re-delivery lands on the same key.
    pub fn finalize(self, now: DateTime<Utc>) -> FeedbackRecord {
        let id = match self.external_id.as_deref().map(str::trim) {
            Some(ext) if !ext.is_empty() => ext.to_string(),
            _ => content_digest(
                &self.tenant_id,
                self.source,
                &self.sub_source_id,
                &self.content,
            ),
        };
        FeedbackRecord {
            id,
            tenant_id: self.tenant_id,
            sub_source_id: self.sub_source_id,
            source: self.source,
            source_type: self.source_type,
            created_at: self.created_at.unwrap_or(now),
            updated_at: now,
            metadata: self.metadata,
            content: self.content,
        }
    }
}

fn content_digest(
    tenant_id: &str,
    source: Source,
    sub_source_id: &str,
    content: &FeedbackContent,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tenant_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(source.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(sub_source_id.as_bytes());
    hasher.update([0u8]);
    // Serializing derived types to a Vec cannot fail.
    hasher.update(serde_json::to_vec(content).unwrap_or_default());
    format!("gen-{:x}", hasher.finalize())
}

/// Owner of subscriptions and feedback. Opaque to the ingestion core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub configurations: JsonMap,
}
