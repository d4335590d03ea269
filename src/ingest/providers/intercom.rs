// src/ingest/providers/intercom.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::id_string;
use crate::error::IngestError;
use crate::ingest::config::IntercomCfg;
use crate::ingest::types::{PullBatch, PullWindow, PushContext, SourceAdapter};
use crate::ingest::{fetch_json, normalize_text, parse_timestamp};
use crate::models::{
    FeedbackContent, JsonMap, Message, NormalizedFeedback, Source, SourceType, Subscription,
};

const SOURCE: Source = Source::Intercom;
const API_VERSION: &str = "2.10";

#[derive(Debug, Default, Deserialize)]
struct Author {
    #[serde(default)]
    id: Value,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    author: Author,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    created_at: Value,
}

/// Parts come either as a bare list or wrapped as `{"conversation_parts": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Parts {
    List(Vec<Part>),
    Wrapped {
        #[serde(default)]
        conversation_parts: Vec<Part>,
    },
}

impl Parts {
    fn into_vec(self) -> Vec<Part> {
        match self {
            Parts::List(v) => v,
            Parts::Wrapped { conversation_parts } => conversation_parts,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Conversation {
    id: Value,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    created_at: Value,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    state: Option<String>,
    /// Opening message of the conversation.
    #[serde(default)]
    source: Option<Part>,
    #[serde(default)]
    conversation_parts: Option<Parts>,
}

/// Conversation adapter: searches conversations created in the window.
pub struct IntercomAdapter {
    client: reqwest::Client,
    cfg: IntercomCfg,
}

impl IntercomAdapter {
    pub fn new(client: reqwest::Client, cfg: IntercomCfg) -> Self {
        Self { client, cfg }
    }

    fn search_body(&self, window: PullWindow, starting_after: Option<&str>) -> Value {
        let mut pagination = json!({ "per_page": self.cfg.per_page });
        if let Some(cursor) = starting_after {
            pagination["starting_after"] = json!(cursor);
        }
        json!({
            "query": {
                "operator": "AND",
                "value": [
                    { "field": "created_at", "operator": ">", "value": window.since.timestamp() - 1 },
                    { "field": "created_at", "operator": "<", "value": window.until.timestamp() + 1 }
                ]
            },
            "pagination": pagination
        })
    }
}

fn normalize_message(part: Part) -> Option<Message> {
    let body = part.body.as_deref().map(normalize_text).unwrap_or_default();
    if body.is_empty() {
        return None;
    }
    let author = id_string(&part.author.id)
        .or(part.author.name)
        .or(part.author.kind)
        .unwrap_or_else(|| "unknown".into());
    Some(Message {
        id: id_string(&part.id),
        author,
        body,
        timestamp: parse_timestamp(&part.created_at),
    })
}

fn normalize_conversation(
    raw: Value,
    tenant_id: &str,
    sub_source_id: &str,
) -> Result<NormalizedFeedback, IngestError> {
    let conv: Conversation =
        serde_json::from_value(raw).map_err(|e| IngestError::normalization(SOURCE, e))?;
    let id = id_string(&conv.id)
        .ok_or_else(|| IngestError::normalization(SOURCE, "conversation without id"))?;

    let mut messages: Vec<Message> = conv.source.into_iter().filter_map(normalize_message).collect();
    messages.extend(
        conv.conversation_parts
            .map(Parts::into_vec)
            .unwrap_or_default()
            .into_iter()
            .filter_map(normalize_message),
    );
    if messages.is_empty() {
        return Err(IngestError::normalization(
            SOURCE,
            format!("conversation {id} has no messages"),
        ));
    }

    let mut metadata = JsonMap::new();
    if let Some(t) = conv.title {
        metadata.insert("title".into(), json!(t));
    }
    if let Some(s) = conv.state {
        metadata.insert("state".into(), json!(s));
    }
    metadata.insert("message_count".into(), json!(messages.len()));

    Ok(NormalizedFeedback {
        external_id: Some(id.clone()),
        tenant_id: tenant_id.to_string(),
        sub_source_id: sub_source_id.to_string(),
        source: SOURCE,
        source_type: SourceType::Conversation,
        created_at: parse_timestamp(&conv.created_at),
        metadata,
        content: FeedbackContent::Conversation {
            conversation_id: conv.conversation_id.or(Some(id)),
            messages,
        },
    })
}

#[async_trait]
impl SourceAdapter for IntercomAdapter {
    async fn pull(&self, sub: &Subscription, window: PullWindow) -> Result<PullBatch, IngestError> {
        let token = sub
            .config_str("access_token")
            .ok_or_else(|| IngestError::fetch(SOURCE, "subscription has no access_token"))?;
        let base = self.cfg.base_url.trim_end_matches('/');

        let mut batch = PullBatch::default();
        let mut cursor: Option<String> = None;
        let max_pages = self.cfg.max_pages.max(1);
        for page in 1..=max_pages {
            let req = self
                .client
                .post(format!("{base}/conversations/search"))
                .bearer_auth(token)
                .header("Intercom-Version", API_VERSION)
                .header("Accept", "application/json")
                .json(&self.search_body(window, cursor.as_deref()));

            let resp = match fetch_json(req, SOURCE).await {
                Ok(v) => v,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, page, "intercom page failed; truncating");
                    batch.truncated = true;
                    break;
                }
            };

            let items = resp
                .get("conversations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in items {
                batch.accept(normalize_conversation(item, &sub.tenant_id, &sub.sub_source_id));
            }

            cursor = resp
                .pointer("/pages/next/starting_after")
                .and_then(Value::as_str)
                .map(str::to_string);
            if cursor.is_none() {
                break;
            }
            if page == max_pages {
                batch.truncated = true;
            }
        }
        Ok(batch)
    }

    async fn push(
        &self,
        body: &[u8],
        ctx: &PushContext,
    ) -> Result<Vec<NormalizedFeedback>, IngestError> {
        let v: Value =
            serde_json::from_slice(body).map_err(|e| IngestError::normalization(SOURCE, e))?;

        let item = if v.get("type").and_then(Value::as_str) == Some("notification_event") {
            if v.get("topic").and_then(Value::as_str) == Some("ping") {
                return Ok(Vec::new());
            }
            v.pointer("/data/item")
                .cloned()
                .ok_or_else(|| IngestError::normalization(SOURCE, "notification without data.item"))?
        } else {
            v
        };

        Ok(vec![normalize_conversation(item, &ctx.tenant_id, &ctx.sub_source_id)?])
    }

    fn source(&self) -> Source {
        SOURCE
    }

    fn source_type(&self) -> SourceType {
        SourceType::Conversation
    }
}
