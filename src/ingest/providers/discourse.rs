// src/ingest/providers/discourse.rs
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::ingest::config::DiscourseCfg;
use crate::ingest::types::{PullBatch, PullWindow, PushContext, SourceAdapter};
use crate::ingest::{fetch_json, normalize_text, parse_timestamp};
use crate::models::{FeedbackContent, JsonMap, NormalizedFeedback, Source, SourceType, Subscription};

const SOURCE: Source = Source::Discourse;

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: u64,
    topic_id: u64,
}

#[derive(Debug, Deserialize)]
struct Post {
    id: u64,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    cooked: Option<String>,
    #[serde(default)]
    raw: Option<String>,
    #[serde(default)]
    created_at: Value,
    #[serde(default)]
    topic_id: Option<u64>,
    #[serde(default)]
    topic_slug: Option<String>,
    #[serde(default)]
    topic_title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    post: Post,
}

/// Forum adapter: searches posts by date window, then loads each post body.
pub struct DiscourseAdapter {
    client: reqwest::Client,
    cfg: DiscourseCfg,
}

impl DiscourseAdapter {
    pub fn new(client: reqwest::Client, cfg: DiscourseCfg) -> Self {
        Self { client, cfg }
    }

    fn base_url<'a>(&'a self, sub: &'a Subscription) -> &'a str {
        sub.config_str("base_url")
            .unwrap_or(self.cfg.base_url.as_str())
            .trim_end_matches('/')
    }

    fn authed(&self, req: reqwest::RequestBuilder, sub: &Subscription) -> reqwest::RequestBuilder {
        match (sub.config_str("api_key"), sub.config_str("api_username")) {
            (Some(key), Some(user)) => req.header("Api-Key", key).header("Api-Username", user),
            (Some(key), None) => req.header("Api-Key", key),
            _ => req,
        }
    }

    /// Collect search hits page by page until the source runs dry or a cap is hit.
    async fn search(
        &self,
        sub: &Subscription,
        window: PullWindow,
        batch: &mut PullBatch,
    ) -> Result<Vec<SearchHit>, IngestError> {
        let base = self.base_url(sub);
        let q = format!(
            "after:{} before:{}",
            window.since.format("%Y-%m-%d"),
            // `before:` is exclusive in Discourse search
            (window.until + chrono::Duration::days(1)).format("%Y-%m-%d")
        );

        let mut hits = Vec::new();
        let max_pages = self.cfg.max_pages.max(1);
        for page in 1..=max_pages {
            let req = self
                .client
                .get(format!("{base}/search.json"))
                .query(&[("page", page.to_string()), ("q", q.clone())]);
            let resp = match fetch_json(self.authed(req, sub), SOURCE).await {
                Ok(v) => v,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, page, "discourse search page failed; truncating");
                    batch.truncated = true;
                    break;
                }
            };

            let posts = resp
                .get("posts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if posts.is_empty() {
                break;
            }
            for p in posts {
                if hits.len() >= self.cfg.max_posts {
                    batch.truncated = true;
                    return Ok(hits);
                }
                match serde_json::from_value::<SearchHit>(p) {
                    Ok(hit) => hits.push(hit),
                    Err(e) => batch.accept(Err(IngestError::normalization(SOURCE, e))),
                }
            }

            let more = resp
                .pointer("/grouped_search_result/more_posts")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !more {
                break;
            }
            if page == max_pages {
                batch.truncated = true;
            }
        }
        Ok(hits)
    }

    async fn load_post(&self, sub: &Subscription, hit: &SearchHit) -> Result<Post, IngestError> {
        let base = self.base_url(sub);
        let req = self
            .client
            .get(format!("{base}/t/{}/posts.json", hit.topic_id))
            .query(&[("post_ids[]", hit.id)]);
        // a post that cannot be loaded is skipped, not fatal to the cycle
        let resp = fetch_json(self.authed(req, sub), SOURCE)
            .await
            .map_err(|e| IngestError::normalization(SOURCE, format!("post {}: {e}", hit.id)))?;
        let first = resp
            .pointer("/post_stream/posts/0")
            .cloned()
            .ok_or_else(|| IngestError::normalization(SOURCE, format!("post {} missing from stream", hit.id)))?;
        serde_json::from_value(first).map_err(|e| IngestError::normalization(SOURCE, e))
    }
}

fn normalize_post(
    post: Post,
    tenant_id: &str,
    sub_source_id: &str,
) -> Result<NormalizedFeedback, IngestError> {
    let body = post
        .cooked
        .as_deref()
        .map(normalize_text)
        .filter(|s| !s.is_empty())
        .or_else(|| post.raw.as_deref().map(normalize_text))
        .unwrap_or_default();
    if body.is_empty() {
        return Err(IngestError::normalization(SOURCE, format!("post {} has no body", post.id)));
    }

    let mut metadata = JsonMap::new();
    if let Some(u) = post.username {
        metadata.insert("username".into(), json!(u));
    }
    if let Some(t) = post.topic_id {
        metadata.insert("topic_id".into(), json!(t));
    }
    if let Some(s) = post.topic_slug {
        metadata.insert("topic_slug".into(), json!(s));
    }
    if let Some(t) = post.topic_title.clone() {
        metadata.insert("topic_title".into(), json!(t));
    }

    Ok(NormalizedFeedback {
        external_id: Some(post.id.to_string()),
        tenant_id: tenant_id.to_string(),
        sub_source_id: sub_source_id.to_string(),
        source: SOURCE,
        source_type: SourceType::Post,
        created_at: parse_timestamp(&post.created_at),
        metadata,
        content: FeedbackContent::Text {
            title: post.topic_title,
            body,
        },
    })
}

#[async_trait]
impl SourceAdapter for DiscourseAdapter {
    async fn pull(&self, sub: &Subscription, window: PullWindow) -> Result<PullBatch, IngestError> {
        let mut batch = PullBatch::default();
        let hits = self.search(sub, window, &mut batch).await?;
        for hit in &hits {
            let item = self
                .load_post(sub, hit)
                .await
                .and_then(|p| normalize_post(p, &sub.tenant_id, &sub.sub_source_id));
            batch.accept(item);
        }
        tracing::info!(
            target: "ingest",
            subscription_id = %sub.id,
            hits = hits.len(),
            kept = batch.records.len(),
            "discourse pull done"
        );
        Ok(batch)
    }

    async fn push(
        &self,
        body: &[u8],
        ctx: &PushContext,
    ) -> Result<Vec<NormalizedFeedback>, IngestError> {
        let env: WebhookEnvelope =
            serde_json::from_slice(body).map_err(|e| IngestError::normalization(SOURCE, e))?;
        let rec = normalize_post(env.post, &ctx.tenant_id, &ctx.sub_source_id)?;
        Ok(vec![rec])
    }

    fn source(&self) -> Source {
        SOURCE
    }

    fn source_type(&self) -> SourceType {
        SourceType::Post
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> DiscourseAdapter {
        DiscourseAdapter::new(reqwest::Client::new(), DiscourseCfg::default())
    }

    fn ctx() -> PushContext {
        PushContext {
            tenant_id: "t1".into(),
            sub_source_id: "community".into(),
        }
    }

    #[tokio::test]
    async fn push_normalizes_post_created_webhook() {
        let body = br#"{"post": {
            "id": 991, "username": "sam", "topic_id": 12, "topic_slug": "dark-mode",
            "topic_title": "Dark mode please", "created_at": "2024-03-01T10:00:00.000Z",
            "cooked": "<p>Would love a <em>dark</em> theme.</p>"
        }}"#;
        let recs = adapter().push(body, &ctx()).await.unwrap();
        assert_eq!(recs.len(), 1);
        let r = &recs[0];
        assert_eq!(r.external_id.as_deref(), Some("991"));
        assert_eq!(r.tenant_id, "t1");
        assert_eq!(r.sub_source_id, "community");
        assert_eq!(r.source_type, SourceType::Post);
        assert_eq!(r.metadata["username"], json!("sam"));
        assert!(r.created_at.is_some());
        assert_eq!(
            r.content,
            FeedbackContent::Text {
                title: Some("Dark mode please".into()),
                body: "Would love a dark theme.".into()
            }
        );
    }

    #[tokio::test]
    async fn push_with_wrong_shape_is_a_normalization_error() {
        let err = adapter()
            .push(br#"{"topic": {"id": 1}}"#, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Normalization { origin: Source::Discourse, .. }));
    }

    #[tokio::test]
    async fn push_with_empty_body_is_rejected() {
        let err = adapter()
            .push(br#"{"post": {"id": 5, "cooked": "<p> </p>"}}"#, &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Normalization { .. }));
    }
}
