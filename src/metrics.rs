// src/metrics.rs
use anyhow::Context;
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use metrics::gauge;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::ingest::config::IngestConfig;
use crate::models::Source;

/// Prometheus recorder plus the `/metrics` route that renders it.
#[derive(Clone)]
pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global recorder. Fails if another recorder is already
    /// installed in this process.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        crate::ingest::ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Publish the scheduler settings and the adapters actually registered.
    pub fn publish(&self, cfg: &IngestConfig, sources: &[Source]) {
        gauge!("ingest_pull_interval_secs").set(cfg.pull_interval_secs as f64);
        gauge!("ingest_max_concurrent_pulls").set(cfg.max_concurrent_pulls as f64);
        for source in sources {
            gauge!("ingest_adapter_registered", "source" => source.as_str()).set(1.0);
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/metrics", get(render))
            .with_state(self.handle.clone())
    }
}

async fn render(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
