// tests/adapters_discourse.rs
//
// Forum adapter against a mocked Discourse API: paging, caps, per-post
// isolation and upstream failures.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedback_ingestion::error::IngestError;
use feedback_ingestion::ingest::config::DiscourseCfg;
use feedback_ingestion::ingest::providers::discourse::DiscourseAdapter;
use feedback_ingestion::ingest::{PullWindow, SourceAdapter};
use feedback_ingestion::models::{
    FeedbackContent, JsonMap, Source, Subscription, SubscriptionMode,
};

const PAGE1: &str = include_str!("fixtures/discourse_search_page1.json");

fn window() -> PullWindow {
    PullWindow::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
    )
}

fn sub(config: Value) -> Subscription {
    let configuration: JsonMap = config.as_object().cloned().unwrap_or_default();
    Subscription::new("t1", "forum", Source::Discourse, SubscriptionMode::Pull, configuration, Utc::now())
}

fn adapter(server: &MockServer, max_posts: usize) -> DiscourseAdapter {
    DiscourseAdapter::new(
        reqwest::Client::new(),
        DiscourseCfg {
            base_url: server.uri(),
            max_posts,
            max_pages: 5,
        },
    )
}

fn post_stream(id: u64, cooked: &str) -> Value {
    json!({"post_stream": {"posts": [{
        "id": id,
        "username": "ana",
        "topic_id": 1,
        "topic_slug": "csv-export-loses-header",
        "topic_title": "CSV export loses header",
        "created_at": "2024-03-01T09:30:00.000Z",
        "cooked": cooked
    }]}})
}

async fn mount_post(server: &MockServer, topic: u64, id: u64, resp: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(format!("/t/{topic}/posts.json")))
        .and(query_param("post_ids[]", id.to_string()))
        .respond_with(resp)
        .mount(server)
        .await;
}

async fn mount_search_page(server: &MockServer, page: u32, resp: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("page", page.to_string()))
        .respond_with(resp)
        .mount(server)
        .await;
}

#[tokio::test]
async fn pages_through_search_and_isolates_broken_posts() {
    let server = MockServer::start().await;
    let page1: Value = serde_json::from_str(PAGE1).unwrap();
    mount_search_page(&server, 1, ResponseTemplate::new(200).set_body_json(page1)).await;
    mount_search_page(
        &server,
        2,
        ResponseTemplate::new(200).set_body_json(json!({
            "posts": [{"id": 21, "topic_id": 2}],
            "grouped_search_result": {"more_posts": false}
        })),
    )
    .await;
    mount_post(&server, 1, 11, ResponseTemplate::new(200).set_body_json(post_stream(11, "<p>Header row <b>missing</b></p>"))).await;
    mount_post(&server, 1, 12, ResponseTemplate::new(500)).await;
    mount_post(&server, 2, 21, ResponseTemplate::new(200).set_body_json(post_stream(21, "<p>Works in 3.3</p>"))).await;

    let batch = adapter(&server, 50).pull(&sub(json!({})), window()).await.unwrap();

    let ids: Vec<_> = batch.records.iter().filter_map(|r| r.external_id.clone()).collect();
    assert_eq!(ids, vec!["11", "21"]);
    assert_eq!(batch.rejected.len(), 1);
    assert!(matches!(batch.rejected[0], IngestError::Normalization { .. }));
    assert!(!batch.truncated);

    let first = &batch.records[0];
    assert_eq!(first.tenant_id, "t1");
    assert_eq!(first.sub_source_id, "forum");
    assert_eq!(first.metadata["topic_slug"], "csv-export-loses-header");
    assert_eq!(
        first.content,
        FeedbackContent::Text {
            title: Some("CSV export loses header".into()),
            body: "Header row missing".into()
        }
    );
}

#[tokio::test]
async fn post_cap_truncates_result() {
    let server = MockServer::start().await;
    mount_search_page(
        &server,
        1,
        ResponseTemplate::new(200).set_body_json(json!({
            "posts": [
                {"id": 1, "topic_id": 9},
                {"id": 2, "topic_id": 9},
                {"id": 3, "topic_id": 9}
            ],
            "grouped_search_result": {"more_posts": false}
        })),
    )
    .await;
    for id in 1..=3 {
        mount_post(&server, 9, id, ResponseTemplate::new(200).set_body_json(post_stream(id, "text"))).await;
    }

    let batch = adapter(&server, 2).pull(&sub(json!({})), window()).await.unwrap();
    assert_eq!(batch.records.len(), 2);
    assert!(batch.truncated);
}

#[tokio::test]
async fn zero_page_limit_still_reads_one_page_and_flags_truncation() {
    let server = MockServer::start().await;
    let page1: Value = serde_json::from_str(PAGE1).unwrap();
    mount_search_page(&server, 1, ResponseTemplate::new(200).set_body_json(page1)).await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": []})))
        .expect(0)
        .mount(&server)
        .await;
    mount_post(&server, 1, 11, ResponseTemplate::new(200).set_body_json(post_stream(11, "a"))).await;
    mount_post(&server, 1, 12, ResponseTemplate::new(200).set_body_json(post_stream(12, "b"))).await;

    let a = DiscourseAdapter::new(
        reqwest::Client::new(),
        DiscourseCfg {
            base_url: server.uri(),
            max_posts: 50,
            max_pages: 0,
        },
    );
    let batch = a.pull(&sub(json!({})), window()).await.unwrap();
    assert_eq!(batch.records.len(), 2);
    assert!(batch.truncated);
}

#[tokio::test]
async fn failing_later_page_keeps_earlier_results() {
    let server = MockServer::start().await;
    let page1: Value = serde_json::from_str(PAGE1).unwrap();
    mount_search_page(&server, 1, ResponseTemplate::new(200).set_body_json(page1)).await;
    mount_search_page(&server, 2, ResponseTemplate::new(502)).await;
    mount_post(&server, 1, 11, ResponseTemplate::new(200).set_body_json(post_stream(11, "a"))).await;
    mount_post(&server, 1, 12, ResponseTemplate::new(200).set_body_json(post_stream(12, "b"))).await;

    let batch = adapter(&server, 50).pull(&sub(json!({})), window()).await.unwrap();
    assert_eq!(batch.records.len(), 2);
    assert!(batch.truncated);
}

#[tokio::test]
async fn first_page_failure_is_a_fetch_error() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, ResponseTemplate::new(500)).await;

    let err = adapter(&server, 50)
        .pull(&sub(json!({})), window())
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Fetch { origin: Source::Discourse, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn subscription_overrides_base_url_and_sends_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search.json"))
        .and(header("Api-Key", "k-123"))
        .and(header("Api-Username", "system"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": []})))
        .expect(1)
        .mount(&server)
        .await;

    let a = DiscourseAdapter::new(
        reqwest::Client::new(),
        DiscourseCfg {
            base_url: "http://127.0.0.1:9".into(),
            ..DiscourseCfg::default()
        },
    );
    let s = sub(json!({"base_url": server.uri(), "api_key": "k-123", "api_username": "system"}));
    let batch = a.pull(&s, window()).await.unwrap();
    assert!(batch.records.is_empty());
    assert!(!batch.truncated);
}
