//! Downstream device API client
//!
//! - Passings: `POST {base_url}/data` with a JSON array, one call per batch
//! - Status pings: `POST {base_url}/{device_id}/ping` with a JSON body
//!
//! Calls are made once. Failures are returned to the caller to log; nothing
//! here retries.

use crate::domain::types::{Passing, PassingPayload, StatusPayload, StatusPing};
use crate::infra::config::Config;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("downstream request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("downstream returned status {0}")]
    Status(u16),
    #[error("downstream call timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
pub struct DownstreamClient {
    client: reqwest::Client,
    base_url: Arc<str>,
}

impl DownstreamClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.downstream_timeout()).build()?;

        Ok(Self { client, base_url: Arc::from(config.downstream_url()) })
    }

    pub fn passings_url(&self) -> String {
        format!("{}/data", self.base_url)
    }

    pub fn ping_url(&self, ping: &StatusPing) -> String {
        format!("{}/{}/ping", self.base_url, ping.device_id)
    }

    /// Post a batch of passings as one JSON array
    pub async fn post_passings(&self, passings: &[Passing]) -> Result<u16, ForwardError> {
        let body: Vec<PassingPayload<'_>> = passings.iter().map(PassingPayload::from).collect();
        self.post_json(self.passings_url(), &body).await
    }

    /// Post a single device status ping
    pub async fn post_status(&self, ping: &StatusPing) -> Result<u16, ForwardError> {
        self.post_json(self.ping_url(ping), &StatusPayload::from(ping)).await
    }

    async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: String,
        body: &T,
    ) -> Result<u16, ForwardError> {
        let response =
            self.client.post(url).json(body).send().await.map_err(ForwardError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status.as_u16()));
        }
        Ok(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ChipId, DeviceId};
    use chrono::{TimeZone, Utc};
    use httpmock::prelude::*;
    use std::time::Instant;

    fn client_for(server: &MockServer) -> DownstreamClient {
        let config =
            Config::default().with_endpoints(&server.url("/feed"), &server.url("/api/devices"));
        DownstreamClient::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_post_passings_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/devices/data").json_body(serde_json::json!([
                    {"deviceId": "5", "chip": "123", "code": "001", "timestamp": "2024-05-01T09:30:00Z"}
                ]));
                then.status(200);
            })
            .await;

        let passing = Passing {
            device_id: DeviceId::from("5"),
            chip: ChipId::from("123"),
            code: Some("001".to_string()),
            event_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
            received_at: Instant::now(),
        };

        let status = client_for(&server).post_passings(&[passing]).await.unwrap();

        assert_eq!(status, 200);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_status_body() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/devices/7/ping").json_body(serde_json::json!({
                    "deviceId": "7",
                    "code": "002",
                    "batteryLevel": "45",
                    "updated": "2024-05-01T09:30:00Z"
                }));
                then.status(204);
            })
            .await;

        let ping = StatusPing {
            device_id: DeviceId::from("7"),
            code: Some("002".to_string()),
            battery_level: "45".to_string(),
            received_at: Instant::now(),
            updated: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
        };

        assert_eq!(client_for(&server).post_status(&ping).await.unwrap(), 204);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_error_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/devices/data");
                then.status(500);
            })
            .await;

        let err = client_for(&server).post_passings(&[]).await.unwrap_err();
        assert!(matches!(err, ForwardError::Status(500)));
    }
}
