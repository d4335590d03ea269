// tests/adapters_playstore.rs
//
// Review adapter against a mocked Play Developer API.

use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedback_ingestion::ingest::config::PlaystoreCfg;
use feedback_ingestion::ingest::providers::playstore::PlaystoreAdapter;
use feedback_ingestion::ingest::{PullWindow, PushContext, SourceAdapter};
use feedback_ingestion::models::{JsonMap, Source, Subscription, SubscriptionMode};

const APP: &str = "/applications/com.example.app/reviews";

fn window() -> PullWindow {
    PullWindow::new(
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
    )
}

fn ts(month: u32, day: u32, hour: u32) -> String {
    Utc.with_ymd_and_hms(2024, month, day, hour, 0, 0)
        .unwrap()
        .timestamp()
        .to_string()
}

fn review(id: &str, text: &str, seconds: String) -> Value {
    json!({
        "reviewId": id,
        "authorName": "Robin",
        "comments": [
            {"userComment": {
                "text": text,
                "lastModified": {"seconds": seconds, "nanos": 0},
                "starRating": 4,
                "appVersionName": "2.1.0",
                "reviewerLanguage": "en"
            }},
            {"developerComment": {"text": "Thanks!"}}
        ]
    })
}

fn sub(config: Value) -> Subscription {
    let configuration: JsonMap = config.as_object().cloned().unwrap_or_default();
    Subscription::new(
        "t1",
        "com.example.app",
        Source::Playstore,
        SubscriptionMode::Pull,
        configuration,
        Utc::now(),
    )
}

fn adapter(server: &MockServer) -> PlaystoreAdapter {
    PlaystoreAdapter::new(
        reqwest::Client::new(),
        PlaystoreCfg {
            base_url: server.uri(),
            max_pages: 10,
        },
    )
}

#[tokio::test]
async fn keeps_window_and_stops_at_older_reviews() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APP))
        .and(query_param("token", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reviews": [
                review("r2", "Crashes on login", ts(3, 1, 8)),
                review("r0", "Old news", ts(2, 28, 0)),
            ],
            "tokenPagination": {"nextPageToken": "p3"}
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(APP))
        .and(query_param("token", "p3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"reviews": []})))
        .with_priority(1)
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(APP))
        .and(query_param("maxResults", "100"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reviews": [
                review("r9", "From the future", ts(3, 3, 0)),
                review("r1", "<b>Great</b> app", ts(3, 1, 12)),
            ],
            "tokenPagination": {"nextPageToken": "p2"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = adapter(&server)
        .pull(&sub(json!({"access_token": "tok"})), window())
        .await
        .unwrap();

    let ids: Vec<_> = batch.records.iter().filter_map(|r| r.external_id.clone()).collect();
    assert_eq!(ids, vec!["r1", "r2"]);
    assert!(batch.rejected.is_empty());
    assert!(!batch.truncated);

    let r1 = &batch.records[0];
    assert_eq!(r1.metadata["star_rating"], 4);
    assert_eq!(r1.metadata["app_version"], "2.1.0");
    assert_eq!(r1.metadata["developer_reply"], "Thanks!");
    assert_eq!(r1.created_at, Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
}

#[tokio::test]
async fn package_name_config_overrides_sub_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/applications/com.other.app/reviews"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reviews": [{"reviewId": "bad", "comments": []}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let batch = adapter(&server)
        .pull(
            &sub(json!({"access_token": "tok", "package_name": "com.other.app"})),
            window(),
        )
        .await
        .unwrap();
    assert!(batch.records.is_empty());
    assert_eq!(batch.rejected.len(), 1);
}

#[tokio::test]
async fn upstream_error_fails_pull() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(APP))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = adapter(&server)
        .pull(&sub(json!({"access_token": "tok"})), window())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
}

#[tokio::test]
async fn webhooks_are_not_supported() {
    let server = MockServer::start().await;
    let ctx = PushContext {
        tenant_id: "t1".into(),
        sub_source_id: "com.example.app".into(),
    };
    assert!(adapter(&server).push(b"{}", &ctx).await.is_err());
}
