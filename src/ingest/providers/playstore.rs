// src/ingest/providers/playstore.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::IngestError;
use crate::ingest::config::PlaystoreCfg;
use crate::ingest::types::{PullBatch, PullWindow, PushContext, SourceAdapter};
use crate::ingest::{fetch_json, normalize_text, parse_timestamp};
use crate::models::{FeedbackContent, JsonMap, NormalizedFeedback, Source, SourceType, Subscription};

const SOURCE: Source = Source::Playstore;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Review {
    review_id: String,
    #[serde(default)]
    author_name: Option<String>,
    #[serde(default)]
    comments: Vec<Comment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Comment {
    #[serde(default)]
    user_comment: Option<UserComment>,
    #[serde(default)]
    developer_comment: Option<DeveloperComment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserComment {
    #[serde(default)]
    text: String,
    #[serde(default)]
    last_modified: Option<Stamp>,
    #[serde(default)]
    star_rating: Option<u8>,
    #[serde(default)]
    app_version_name: Option<String>,
    #[serde(default)]
    reviewer_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeveloperComment {
    #[serde(default)]
    text: String,
}

/// Google API timestamp: `{"seconds": "1709287200", "nanos": 0}`.
#[derive(Debug, Deserialize)]
struct Stamp {
    seconds: Value,
}

impl Stamp {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.seconds)
    }
}

/// App store adapter: pages through an app's reviews, newest first.
pub struct PlaystoreAdapter {
    client: reqwest::Client,
    cfg: PlaystoreCfg,
}

impl PlaystoreAdapter {
    pub fn new(client: reqwest::Client, cfg: PlaystoreCfg) -> Self {
        Self { client, cfg }
    }
}

enum Placement {
    Inside(NormalizedFeedback),
    /// Older than the window; everything after it is older too.
    Before,
    After,
}

fn normalize_review(
    raw: Value,
    sub: &Subscription,
    window: PullWindow,
) -> Result<Placement, IngestError> {
    let review: Review =
        serde_json::from_value(raw).map_err(|e| IngestError::normalization(SOURCE, e))?;
    let user = review
        .comments
        .iter()
        .find_map(|c| c.user_comment.as_ref())
        .ok_or_else(|| {
            IngestError::normalization(SOURCE, format!("review {} has no user comment", review.review_id))
        })?;

    let created_at = user.last_modified.as_ref().and_then(Stamp::to_utc);
    if let Some(ts) = created_at {
        if ts < window.since {
            return Ok(Placement::Before);
        }
        if ts > window.until {
            return Ok(Placement::After);
        }
    }

    let body = normalize_text(&user.text);
    if body.is_empty() {
        return Err(IngestError::normalization(
            SOURCE,
            format!("review {} has empty text", review.review_id),
        ));
    }

    let mut metadata = JsonMap::new();
    if let Some(a) = &review.author_name {
        metadata.insert("author_name".into(), json!(a));
    }
    if let Some(r) = user.star_rating {
        metadata.insert("star_rating".into(), json!(r));
    }
    if let Some(v) = &user.app_version_name {
        metadata.insert("app_version".into(), json!(v));
    }
    if let Some(l) = &user.reviewer_language {
        metadata.insert("language".into(), json!(l));
    }
    if let Some(reply) = review
        .comments
        .iter()
        .find_map(|c| c.developer_comment.as_ref())
    {
        metadata.insert("developer_reply".into(), json!(reply.text));
    }

    Ok(Placement::Inside(NormalizedFeedback {
        external_id: Some(review.review_id.clone()),
        tenant_id: sub.tenant_id.clone(),
        sub_source_id: sub.sub_source_id.clone(),
        source: SOURCE,
        source_type: SourceType::Review,
        created_at,
        metadata,
        content: FeedbackContent::Text { title: None, body },
    }))
}

#[async_trait]
impl SourceAdapter for PlaystoreAdapter {
    async fn pull(&self, sub: &Subscription, window: PullWindow) -> Result<PullBatch, IngestError> {
        let token = sub
            .config_str("access_token")
            .ok_or_else(|| IngestError::fetch(SOURCE, "subscription has no access_token"))?;
        let package = sub
            .config_str("package_name")
            .unwrap_or(sub.sub_source_id.as_str());
        let url = format!(
            "{}/applications/{package}/reviews",
            self.cfg.base_url.trim_end_matches('/')
        );

        let mut batch = PullBatch::default();
        let mut page_token: Option<String> = None;
        let max_pages = self.cfg.max_pages.max(1);
        'pages: for page in 1..=max_pages {
            let mut req = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(&[("maxResults", "100")]);
            if let Some(t) = &page_token {
                req = req.query(&[("token", t.as_str())]);
            }

            let resp = match fetch_json(req, SOURCE).await {
                Ok(v) => v,
                Err(e) if page == 1 => return Err(e),
                Err(e) => {
                    tracing::warn!(target: "ingest", error = %e, page, "play store page failed; truncating");
                    batch.truncated = true;
                    break;
                }
            };

            let reviews = resp
                .get("reviews")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for raw in reviews {
                match normalize_review(raw, sub, window) {
                    Ok(Placement::Inside(rec)) => batch.records.push(rec),
                    Ok(Placement::After) => {}
                    Ok(Placement::Before) => break 'pages,
                    Err(e) => batch.accept(Err(e)),
                }
            }

            page_token = resp
                .pointer("/tokenPagination/nextPageToken")
                .and_then(Value::as_str)
                .map(str::to_string);
            if page_token.is_none() {
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
        _body: &[u8],
        _ctx: &PushContext,
    ) -> Result<Vec<NormalizedFeedback>, IngestError> {
        Err(IngestError::normalization(
            SOURCE,
            "play store reviews are pull-only",
        ))
    }

    fn source(&self) -> Source {
        SOURCE
    }

    fn source_type(&self) -> SourceType {
        SourceType::Review
    }
}
