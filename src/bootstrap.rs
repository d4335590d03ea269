// src/bootstrap.rs
use std::sync::Arc;

use tracing::info;

use crate::api::AppState;
use crate::ingest::config::IngestConfig;
use crate::ingest::scheduler::PullSchedulerCfg;
use crate::ingest::{Dispatcher, PullScheduler};
use crate::store::MemoryStore;

/// Everything the binary wires together: HTTP state plus the pull scheduler,
/// both backed by the same collaborators.
pub struct IngestRuntime {
    pub cfg: IngestConfig,
    pub state: AppState,
    pub scheduler: Arc<PullScheduler>,
}

impl IngestRuntime {
    /// Build with the in-process store as the persistence collaborator.
    pub fn in_memory(cfg: IngestConfig) -> anyhow::Result<Self> {
        cfg.validate()?;
        let store = Arc::new(MemoryStore::new());
        let dispatcher = Arc::new(Dispatcher::from_config(&cfg, store.clone())?);

        info!(
            sources = ?dispatcher.sources(),
            interval_secs = cfg.pull_interval_secs,
            max_concurrent = cfg.max_concurrent_pulls,
            "ingest runtime ready"
        );

        let scheduler = Arc::new(PullScheduler::new(
            store.clone(),
            Arc::clone(&dispatcher),
            PullSchedulerCfg::from_config(&cfg),
        ));
        let state = AppState {
            dispatcher,
            feedback: store.clone(),
            subscriptions: store.clone(),
            tenants: store,
        };
        Ok(Self {
            cfg,
            state,
            scheduler,
        })
    }
}
