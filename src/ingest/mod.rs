// src/ingest/mod.rs
pub mod config;
pub mod dispatcher;
pub mod providers;
pub mod scheduler;
pub mod types;

use chrono::{DateTime, TimeZone, Utc};
use metrics::{describe_counter, describe_gauge, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::IngestError;
use crate::models::Source;

pub use dispatcher::{Dispatcher, PersistReport, PullReport, PushAck};
pub use scheduler::{spawn_pull_scheduler, PullScheduler, SchedulerHandle, TickReport};
pub use types::{PullBatch, PullWindow, PushContext, SourceAdapter};

/// Upper bound on normalized body length, in chars.
const MAX_BODY_CHARS: usize = 20_000;

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "ingest_records_stored_total",
            "Feedback records upserted into the store."
        );
        describe_counter!(
            "ingest_normalization_errors_total",
            "Source items or payloads that could not be normalized."
        );
        describe_counter!(
            "ingest_persistence_errors_total",
            "Record writes rejected by the store."
        );
        describe_counter!(
            "ingest_pull_failures_total",
            "Pull units that ended in fetch error, timeout or misconfiguration."
        );
        describe_counter!(
            "ingest_unknown_source_total",
            "Dispatches for a source with no registered adapter."
        );
        describe_counter!("ingest_webhooks_total", "Webhook deliveries accepted.");
        describe_counter!(
            "ingest_cursor_conflicts_total",
            "Cursor advances lost to a concurrent writer."
        );
        describe_histogram!("ingest_pull_ms", "Pull unit wall time in milliseconds.");
        describe_histogram!("ingest_fetch_ms", "Upstream request time in milliseconds.");
        describe_gauge!("ingest_last_tick_ts", "Unix ts when the pull scheduler last ticked.");
    });
}

/// Reduce source markup to plain text: strip tags, decode entities, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    let stripped = re_tags.replace_all(s, " ");

    let mut out = html_escape::decode_html_entities(&stripped).to_string();

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > MAX_BODY_CHARS {
        out = out.chars().take(MAX_BODY_CHARS).collect();
    }
    out
}

/// Source timestamps arrive as RFC 3339 strings or unix seconds.
pub fn parse_timestamp(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(unix_to_utc)),
        Value::Number(n) => n.as_i64().and_then(unix_to_utc),
        _ => None,
    }
}

fn unix_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Send a request and decode its JSON body. Every failure here is a fetch failure.
pub(crate) async fn fetch_json(
    req: reqwest::RequestBuilder,
    origin: Source,
) -> Result<Value, IngestError> {
    let t0 = std::time::Instant::now();
    let resp = req.send().await.map_err(|e| {
        tracing::warn!(target: "ingest", error = ?e, source = %origin, "upstream http error");
        IngestError::fetch(origin, e)
    })?;
    let status = resp.status();
    if !status.is_success() {
        return Err(IngestError::fetch(origin, format!("upstream status {status}")));
    }
    let body = resp
        .text()
        .await
        .map_err(|e| IngestError::fetch(origin, e))?;
    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    serde_json::from_str(&body)
        .map_err(|e| IngestError::fetch(origin, format!("unreadable response body: {e}")))
}
