//! Feedback ingestion service: binary entrypoint.
//! Boots the Axum HTTP server (webhooks + management routes) and the
//! recurring pull scheduler over one shared store.

use feedback_ingestion::ingest::config::load_config_default;
use feedback_ingestion::ingest::spawn_pull_scheduler;
use feedback_ingestion::metrics::Metrics;
use feedback_ingestion::{router, IngestRuntime};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs by default, JSON when LOG_FORMAT=json.
/// A subscriber installed by the runtime takes precedence.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feedback_ingestion=info,ingest=info,warn"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = load_config_default()?;
    // recorder first, so series described while wiring are kept
    let metrics = Metrics::install()?;
    let runtime = IngestRuntime::in_memory(cfg)?;
    metrics.publish(&runtime.cfg, &runtime.state.dispatcher.sources());

    spawn_pull_scheduler(runtime.scheduler.clone()).detach();

    let router = router(runtime.state).merge(metrics.router());
    Ok(router.into())
}
