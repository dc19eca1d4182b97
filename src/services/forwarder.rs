//! Forwarding of novel events to the downstream API
//!
//! Each downstream call runs as its own task so a slow API never holds up
//! the poll loop. Dispatch waits for a semaphore permit first, which caps the
//! number of outstanding calls; every call is also bounded by a timeout.
//!
//! Delivery policy: one attempt per event. Failures are logged and counted
//! but not retried. The event is already recorded in its dedup window, so it
//! is only sent again if the feed re-sends it after the window expires.

use crate::domain::types::{DeviceId, Passing, StatusPing};
use crate::infra::metrics::Metrics;
use crate::io::downstream::{DownstreamClient, ForwardError};
use crate::services::allow_list::AllowList;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result channel of one downstream call: the HTTP status on success
pub type ForwardHandle = JoinHandle<Result<u16, ForwardError>>;

/// Log forward failure (cold path)
#[cold]
fn log_forward_failed(kind: &str, device_id: Option<&DeviceId>, e: &ForwardError) {
    match device_id {
        Some(id) => warn!(kind = kind, device_id = %id, error = %e, "forward_failed"),
        None => warn!(kind = kind, error = %e, "forward_failed"),
    }
}

pub struct Forwarder {
    client: DownstreamClient,
    allow_list: Arc<AllowList>,
    metrics: Arc<Metrics>,
    in_flight: Arc<Semaphore>,
    call_timeout: Duration,
}

impl Forwarder {
    pub fn new(
        client: DownstreamClient,
        allow_list: Arc<AllowList>,
        metrics: Arc<Metrics>,
        max_in_flight: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            client,
            allow_list,
            metrics,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            call_timeout,
        }
    }

    /// Keep events whose device is in the current allow-list snapshot
    fn allowed<E>(&self, events: Vec<E>, device_id: impl Fn(&E) -> &DeviceId) -> Vec<E> {
        let snapshot: Arc<HashSet<DeviceId>> = self.allow_list.current();
        let before = events.len();
        let allowed: Vec<E> =
            events.into_iter().filter(|e| snapshot.contains(device_id(e))).collect();

        let dropped = before - allowed.len();
        if dropped > 0 {
            debug!(dropped = dropped, "forward_not_allowed");
            self.metrics.record_not_allowed(dropped);
        }
        allowed
    }

    /// Send all allow-listed passings as one batch. `None` if nothing is left.
    pub async fn forward_passings(&self, passings: Vec<Passing>) -> Option<ForwardHandle> {
        let passings = self.allowed(passings, |p| &p.device_id);
        if passings.is_empty() {
            return None;
        }

        let permit = self.in_flight.clone().acquire_owned().await.ok()?;
        let client = self.client.clone();
        let metrics = self.metrics.clone();
        let call_timeout = self.call_timeout;

        Some(tokio::spawn(async move {
            let _permit = permit;
            let start = Instant::now();
            let count = passings.len();

            let result = with_timeout(call_timeout, client.post_passings(&passings)).await;
            match &result {
                Ok(status) => {
                    metrics.record_passings_forwarded(count);
                    info!(
                        count = count,
                        status = status,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "passings_forwarded"
                    );
                }
                Err(e) => {
                    metrics.record_forward_error();
                    log_forward_failed("passings", None, e);
                }
            }
            result
        }))
    }

    /// Send one ping per allow-listed status event; calls are independent
    pub async fn forward_status(&self, pings: Vec<StatusPing>) -> Vec<ForwardHandle> {
        let pings = self.allowed(pings, |s| &s.device_id);
        let mut handles = Vec::with_capacity(pings.len());

        for ping in pings {
            let Ok(permit) = self.in_flight.clone().acquire_owned().await else {
                break;
            };
            let client = self.client.clone();
            let metrics = self.metrics.clone();
            let call_timeout = self.call_timeout;

            handles.push(tokio::spawn(async move {
                let _permit = permit;

                let result = with_timeout(call_timeout, client.post_status(&ping)).await;
                match &result {
                    Ok(status) => {
                        metrics.record_status_forwarded();
                        debug!(
                            device_id = %ping.device_id,
                            battery = %ping.battery_level,
                            status = status,
                            "status_ping_forwarded"
                        );
                    }
                    Err(e) => {
                        metrics.record_forward_error();
                        log_forward_failed("status", Some(&ping.device_id), e);
                    }
                }
                result
            }));
        }

        handles
    }

    /// Permits currently available (for tests and diagnostics)
    pub fn available_permits(&self) -> usize {
        self.in_flight.available_permits()
    }
}

async fn with_timeout<F>(limit: Duration, call: F) -> Result<u16, ForwardError>
where
    F: std::future::Future<Output = Result<u16, ForwardError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout(limit)),
    }
}
