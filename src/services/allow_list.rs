//! Device allow-list snapshot and its refresher
//!
//! The snapshot is replaced wholesale on each successful refresh; readers
//! clone the `Arc` and never observe a partially updated set. A failed
//! refresh keeps the previous snapshot in effect.

use crate::domain::types::DeviceId;
use crate::infra::metrics::Metrics;
use crate::io::directory::{DirectoryClient, DirectoryError};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

/// Log refresh failure (cold path)
#[cold]
fn log_refresh_failed(e: &DirectoryError) {
    error!(error = %e, "allow_list_refresh_failed");
}

/// Read-mostly set of device ids eligible for forwarding
#[derive(Default)]
pub struct AllowList {
    devices: RwLock<Arc<HashSet<DeviceId>>>,
}

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices<I: IntoIterator<Item = DeviceId>>(devices: I) -> Self {
        let list = Self::new();
        list.replace(devices.into_iter().collect());
        list
    }

    /// Current snapshot
    pub fn current(&self) -> Arc<HashSet<DeviceId>> {
        self.devices.read().clone()
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.read().contains(device_id)
    }

    /// Swap in a new snapshot, discarding the old one entirely
    pub fn replace(&self, devices: HashSet<DeviceId>) {
        *self.devices.write() = Arc::new(devices);
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }
}

/// Keeps an [`AllowList`] in sync with the device directory
pub struct AllowListRefresher {
    directory: DirectoryClient,
    allow_list: Arc<AllowList>,
    metrics: Arc<Metrics>,
}

impl AllowListRefresher {
    pub fn new(
        directory: DirectoryClient,
        allow_list: Arc<AllowList>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { directory, allow_list, metrics }
    }

    pub fn allow_list(&self) -> &Arc<AllowList> {
        &self.allow_list
    }

    /// Fetch the directory and replace the snapshot. Returns the new size.
    ///
    /// Also called directly by the status server's update endpoint.
    pub async fn refresh_now(&self) -> Result<usize, DirectoryError> {
        match self.directory.fetch_allowed().await {
            Ok(devices) => {
                let previous = self.allow_list.len();
                let size = devices.len();
                self.allow_list.replace(devices);
                self.metrics.record_allow_list_refresh(size);
                info!(previous = previous, size = size, "allow_list_refreshed");
                Ok(size)
            }
            Err(e) => {
                log_refresh_failed(&e);
                self.metrics.record_allow_list_refresh_error();
                Err(e)
            }
        }
    }

    /// Refresh immediately, then on every interval until shutdown
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("allow_list_refresher_shutdown");
                        return;
                    }
                    continue;
                }
            }

            // Errors are logged inside; the previous snapshot stays in effect
            let _ = self.refresh_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;
    use httpmock::prelude::*;

    fn ids(list: &AllowList) -> Vec<String> {
        let mut ids: Vec<String> = list.current().iter().map(|d| d.0.clone()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_replace_discards_previous() {
        let list = AllowList::with_devices([DeviceId::from("1"), DeviceId::from("2")]);

        list.replace(HashSet::from([DeviceId::from("2"), DeviceId::from("3")]));

        assert_eq!(ids(&list), vec!["2", "3"]);
        assert!(!list.contains(&DeviceId::from("1")));
    }

    #[test]
    fn test_snapshot_unaffected_by_later_replace() {
        let list = AllowList::with_devices([DeviceId::from("1")]);
        let snapshot = list.current();

        list.replace(HashSet::new());

        assert!(snapshot.contains(&DeviceId::from("1")));
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_snapshot() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/devices");
                then.status(502);
            })
            .await;

        let config =
            Config::default().with_endpoints(&server.url("/feed"), &server.url("/devices"));
        let allow_list = Arc::new(AllowList::with_devices([DeviceId::from("5")]));
        let metrics = Arc::new(Metrics::new());
        let refresher = AllowListRefresher::new(
            DirectoryClient::new(&config).unwrap(),
            allow_list.clone(),
            metrics.clone(),
        );

        assert!(matches!(refresher.refresh_now().await, Err(DirectoryError::Status(502))));
        assert!(allow_list.contains(&DeviceId::from("5")));
        assert_eq!(metrics.report().allow_list_refresh_errors_total, 1);
    }

    #[tokio::test]
    async fn test_run_refreshes_on_start_and_stops() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/devices");
                then.status(200).json_body(serde_json::json!([
                    {"id": "9", "deviceType": "RASPBERRY", "organisationId": 3}
                ]));
            })
            .await;

        let config =
            Config::default().with_endpoints(&server.url("/feed"), &server.url("/devices"));
        let allow_list = Arc::new(AllowList::new());
        let refresher = AllowListRefresher::new(
            DirectoryClient::new(&config).unwrap(),
            allow_list.clone(),
            Arc::new(Metrics::new()),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            refresher.run(Duration::from_secs(3600), shutdown_rx).await;
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while !allow_list.contains(&DeviceId::from("9")) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        mock.assert_hits_async(1).await;

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    }
}
