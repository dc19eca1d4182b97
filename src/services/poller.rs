//! Feed poller: the per-tick driving loop
//!
//! Each tick fetches the feed from `now - lookback`, classifies the payload,
//! and runs each event kind through its own dedup window before forwarding.
//! The poller owns both windows and ticks are awaited one after another, so
//! filter, record and evict never interleave across ticks. Forward calls are
//! spawned and may still be running when the next tick starts.

use crate::domain::classify::{classify_payload, ClassifyContext};
use crate::domain::types::{Passing, StatusPing};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::downstream::ForwardError;
use crate::io::feed::{FeedClient, FetchError};
use crate::services::dedup::DedupWindow;
use crate::services::forwarder::{ForwardHandle, Forwarder};
use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Log feed fetch failure (cold path)
#[cold]
fn log_fetch_failed(e: &FetchError, since: DateTime<Utc>) {
    warn!(error = %e, timeout = e.is_timeout(), since = %since, "feed_fetch_failed");
}

/// Log a forward task that panicked or was cancelled (cold path)
#[cold]
fn log_forward_task_failed(e: &JoinError) {
    warn!(error = %e, panicked = e.is_panic(), "forward_task_failed");
}

/// Outcome of a single tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub fetch_failed: bool,
    pub rows: usize,
    pub skipped: usize,
    pub unrecognized: usize,
    pub passings_novel: usize,
    pub statuses_novel: usize,
    /// Downstream calls spawned this tick
    pub dispatched: Vec<ForwardHandle>,
}

impl TickReport {
    /// Wait for every call dispatched this tick. Tasks that panicked are
    /// logged and left out of the results.
    pub async fn join(self) -> Vec<Result<u16, ForwardError>> {
        let mut results = Vec::with_capacity(self.dispatched.len());
        for handle in self.dispatched {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => log_forward_task_failed(&e),
            }
        }
        results
    }
}

pub struct Poller {
    feed: FeedClient,
    forwarder: Forwarder,
    passings: DedupWindow<Passing>,
    statuses: DedupWindow<StatusPing>,
    event_tz: Tz,
    lookback: Duration,
    metrics: Arc<Metrics>,
}

impl Poller {
    pub fn new(
        feed: FeedClient,
        forwarder: Forwarder,
        config: &Config,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            feed,
            forwarder,
            passings: DedupWindow::new("passings", config.passing_window()),
            statuses: DedupWindow::new("status", config.status_window()),
            event_tz: config.event_tz(),
            lookback: config.lookback(),
            metrics,
        }
    }

    pub fn passing_window(&self) -> &DedupWindow<Passing> {
        &self.passings
    }

    pub fn status_window(&self) -> &DedupWindow<StatusPing> {
        &self.statuses
    }

    /// Run one tick as if the wall clock read `wall` and the monotonic clock `now`
    pub async fn tick_at(&mut self, wall: DateTime<Utc>, now: Instant) -> TickReport {
        self.metrics.record_tick();
        let since = wall - TimeDelta::from_std(self.lookback).unwrap_or(TimeDelta::zero());

        let fetch_start = Instant::now();
        let payload = match self.feed.fetch(since).await {
            Ok(payload) => payload,
            Err(e) => {
                log_fetch_failed(&e, since);
                self.metrics.record_fetch_error();
                return TickReport { fetch_failed: true, ..TickReport::default() };
            }
        };
        self.metrics.record_fetch_latency(fetch_start.elapsed().as_millis() as u64);

        let ctx = ClassifyContext {
            event_tz: self.event_tz,
            reference: since,
            received_wall: wall,
            received_at: now,
        };
        let batch = classify_payload(&payload, &ctx);
        self.metrics.record_rows(batch.rows, batch.skipped, batch.unrecognized);

        let mut report = TickReport {
            fetch_failed: false,
            rows: batch.rows,
            skipped: batch.skipped,
            unrecognized: batch.unrecognized,
            ..TickReport::default()
        };

        // Passings: filter -> forward -> record -> evict
        let candidates = batch.passings.len();
        let novel = self.passings.filter_novel(batch.passings, now);
        self.metrics.record_passings_dedup(novel.len(), candidates - novel.len());
        report.passings_novel = novel.len();
        if !novel.is_empty() {
            if let Some(handle) = self.forwarder.forward_passings(novel.clone()).await {
                report.dispatched.push(handle);
            }
            self.passings.record(&novel, now);
        }
        let evicted_passings = self.passings.evict_expired(now);

        // Status pings: same sequence on their own window
        let candidates = batch.statuses.len();
        let novel = self.statuses.filter_novel(batch.statuses, now);
        self.metrics.record_status_dedup(novel.len(), candidates - novel.len());
        report.statuses_novel = novel.len();
        if !novel.is_empty() {
            report.dispatched.extend(self.forwarder.forward_status(novel.clone()).await);
            self.statuses.record(&novel, now);
        }
        let evicted_statuses = self.statuses.evict_expired(now);

        self.metrics.set_window_sizes(self.passings.len(), self.statuses.len());

        debug!(
            rows = report.rows,
            skipped = report.skipped,
            passings_novel = report.passings_novel,
            statuses_novel = report.statuses_novel,
            dispatched = report.dispatched.len(),
            evicted_passings = evicted_passings,
            evicted_statuses = evicted_statuses,
            "tick_complete"
        );

        report
    }

    /// Tick every `interval` until shutdown. Late ticks are skipped, never stacked.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval_ms = interval.as_millis() as u64,
            lookback_secs = self.lookback.as_secs(),
            passing_window_secs = self.passings.span().as_secs(),
            status_window_secs = self.statuses.span().as_secs(),
            "poller_started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    // Forward handles are detached; outcomes are logged by each task
                    let _report = self.tick_at(Utc::now(), Instant::now()).await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("poller_shutdown");
                        return;
                    }
                }
            }
        }
    }
}
