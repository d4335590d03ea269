// src/ingest/scheduler.rs
//! Recurring driver for pull subscriptions. Each tick fans out one unit of
//! work per active pull subscription, bounded by a semaphore, and waits for
//! all of them before reporting. A tick never outlives its interval: units
//! still queued or running at that point fail with a timeout.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::error::{IngestError, StoreError};
use crate::ingest::config::IngestConfig;
use crate::ingest::dispatcher::Dispatcher;
use crate::ingest::types::PullWindow;
use crate::models::Subscription;
use crate::store::{CursorAdvance, SubscriptionRegistry};

#[derive(Clone, Copy, Debug)]
pub struct PullSchedulerCfg {
    pub interval: Duration,
    pub max_concurrency: usize,
    /// Deadline of one subscription's pull; never longer than `interval`.
    pub unit_timeout: Duration,
}

impl PullSchedulerCfg {
    pub fn from_config(cfg: &IngestConfig) -> Self {
        Self {
            interval: cfg.pull_interval(),
            max_concurrency: cfg.max_concurrent_pulls.max(1),
            unit_timeout: cfg.pull_timeout(),
        }
    }
}

/// Per-tick summary. `failed` counts fetch errors, timeouts and unknown sources.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub scheduled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_in_flight: usize,
    pub cursor_conflicts: usize,
    pub stored: usize,
    /// (subscription id, error) of every unit that did not advance.
    pub failures: Vec<(Uuid, String)>,
}

#[derive(Debug)]
enum UnitOutcome {
    Advanced { stored: usize },
    Failed(IngestError),
    CursorConflict,
    CursorError(StoreError),
}

pub struct PullScheduler {
    registry: Arc<dyn SubscriptionRegistry>,
    dispatcher: Arc<Dispatcher>,
    cfg: PullSchedulerCfg,
    limiter: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

/// Removes a subscription from the in-flight set when its unit ends, however it ends.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.id);
    }
}

fn lock(set: &Mutex<HashSet<Uuid>>) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
    match set.lock() {
        Ok(g) => g,
        Err(poison) => poison.into_inner(),
    }
}

impl PullScheduler {
    pub fn new(
        registry: Arc<dyn SubscriptionRegistry>,
        dispatcher: Arc<Dispatcher>,
        cfg: PullSchedulerCfg,
    ) -> Self {
        crate::ingest::ensure_metrics_described();
        Self {
            registry,
            dispatcher,
            limiter: Arc::new(Semaphore::new(cfg.max_concurrency.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            cfg,
        }
    }

    pub fn config(&self) -> PullSchedulerCfg {
        self.cfg
    }

    /// Run one tick now.
    pub async fn run_tick(&self) -> Result<TickReport, StoreError> {
        self.run_tick_at(Utc::now()).await
    }

    /// Run one tick whose window ends at `tick_start`. A successful unit
    /// moves its cursor exactly to `tick_start`.
    pub async fn run_tick_at(&self, tick_start: DateTime<Utc>) -> Result<TickReport, StoreError> {
        let subs = self.registry.list_active_pull().await?;
        gauge!("ingest_last_tick_ts").set(tick_start.timestamp() as f64);

        let tick_deadline = Instant::now() + self.cfg.interval;
        let mut report = TickReport::default();
        let mut units = JoinSet::new();
        for sub in subs {
            // a unit from an earlier tick still owns this subscription
            let guard = {
                let mut set = lock(&self.in_flight);
                if !set.insert(sub.id) {
                    report.skipped_in_flight += 1;
                    continue;
                }
                InFlightGuard {
                    set: Arc::clone(&self.in_flight),
                    id: sub.id,
                }
            };
            report.scheduled += 1;

            let registry = Arc::clone(&self.registry);
            let dispatcher = Arc::clone(&self.dispatcher);
            let limiter = Arc::clone(&self.limiter);
            let unit_timeout = self.cfg.unit_timeout;
            let interval = self.cfg.interval;
            units.spawn(async move {
                let _guard = guard;
                let id = sub.id;
                let _permit = match tokio::time::timeout_at(tick_deadline, limiter.acquire_owned()).await {
                    Ok(Ok(p)) => p,
                    Ok(Err(_)) => {
                        let e = IngestError::Config("pull limiter closed".into());
                        return (id, UnitOutcome::Failed(e));
                    }
                    Err(_) => {
                        let e = IngestError::Timeout {
                            origin: sub.source,
                            secs: interval.as_secs(),
                        };
                        return (id, pull_failed(&sub, e));
                    }
                };
                let deadline = tick_deadline.min(Instant::now() + unit_timeout);
                (id, run_unit(registry.as_ref(), dispatcher.as_ref(), sub, tick_start, deadline).await)
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((_, UnitOutcome::Advanced { stored })) => {
                    report.succeeded += 1;
                    report.stored += stored;
                }
                Ok((id, UnitOutcome::CursorConflict)) => {
                    report.cursor_conflicts += 1;
                    report.failures.push((id, "cursor advanced concurrently".into()));
                }
                Ok((id, UnitOutcome::Failed(e))) => {
                    report.failed += 1;
                    report.failures.push((id, e.to_string()));
                }
                Ok((id, UnitOutcome::CursorError(e))) => {
                    report.failed += 1;
                    report.failures.push((id, e.to_string()));
                }
                Err(e) => {
                    tracing::error!(target: "ingest", error = %e, "pull unit panicked");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            target: "ingest",
            scheduled = report.scheduled,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped_in_flight,
            conflicts = report.cursor_conflicts,
            stored = report.stored,
            "pull tick complete"
        );
        Ok(report)
    }
}

async fn run_unit(
    registry: &dyn SubscriptionRegistry,
    dispatcher: &Dispatcher,
    sub: Subscription,
    tick_start: DateTime<Utc>,
    deadline: Instant,
) -> UnitOutcome {
    let t0 = Instant::now();
    let window = PullWindow::new(sub.last_pulled, tick_start);

    let result = match tokio::time::timeout_at(deadline, dispatcher.dispatch_pull(&sub, window)).await {
        Ok(r) => r,
        Err(_) => Err(IngestError::Timeout {
            origin: sub.source,
            secs: deadline.saturating_duration_since(t0).as_secs(),
        }),
    };
    histogram!("ingest_pull_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

    let pulled = match result {
        Ok(r) => r,
        Err(e) => return pull_failed(&sub, e),
    };

    match registry
        .advance_cursor(sub.id, sub.last_pulled, window.until)
        .await
    {
        Ok(CursorAdvance::Advanced) => UnitOutcome::Advanced {
            stored: pulled.records.len(),
        },
        Ok(CursorAdvance::Stale { current }) => {
            counter!("ingest_cursor_conflicts_total").increment(1);
            tracing::warn!(
                target: "ingest",
                subscription_id = %sub.id,
                observed = %sub.last_pulled,
                %current,
                "cursor moved underneath this pull; not advancing"
            );
            UnitOutcome::CursorConflict
        }
        Err(e) => {
            tracing::warn!(target: "ingest", subscription_id = %sub.id, error = %e, "cursor update failed");
            UnitOutcome::CursorError(e)
        }
    }
}

fn pull_failed(sub: &Subscription, e: IngestError) -> UnitOutcome {
    counter!("ingest_pull_failures_total").increment(1);
    tracing::warn!(
        target: "ingest",
        subscription_id = %sub.id,
        tenant_id = %sub.tenant_id,
        source = %sub.source,
        error = %e,
        "pull failed; cursor left in place"
    );
    UnitOutcome::Failed(e)
}

/// Handle of a running scheduler loop.
pub struct SchedulerHandle {
    stop: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Let the loop run until the process exits.
    pub fn detach(self) {}

    /// Stop issuing ticks and wait for ticks already running to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.join.await {
            tracing::warn!(target: "ingest", error = %e, "scheduler loop ended abnormally");
        }
    }
}

/// Spawn the recurring driver. The first tick fires immediately; a slow tick
/// does not delay the next one (overlap is handled per subscription).
pub fn spawn_pull_scheduler(scheduler: Arc<PullScheduler>) -> SchedulerHandle {
    let (stop, mut stopped) = watch::channel(false);
    let join = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(scheduler.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = JoinSet::new();
        let mut detached = false;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let s = Arc::clone(&scheduler);
                    ticks.spawn(async move {
                        if let Err(e) = s.run_tick().await {
                            tracing::error!(target: "ingest", error = %e, "cannot load pull subscriptions");
                        }
                    });
                }
                Some(_) = ticks.join_next(), if !ticks.is_empty() => {}
                changed = stopped.changed(), if !detached => match changed {
                    Ok(()) if *stopped.borrow() => break,
                    Ok(()) => {}
                    // handle dropped without shutdown: run for the process lifetime
                    Err(_) => detached = true,
                },
            }
        }
        while ticks.join_next().await.is_some() {}
        tracing::info!(target: "ingest", "pull scheduler stopped");
    });
    SchedulerHandle { stop, join }
}
