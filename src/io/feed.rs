//! Timing feed client
//!
//! The feed is polled with `GET {url}?time=yyyy-MM-dd HH:mm:ss`, the time
//! being the start of the lookback window in the feed's query timezone.
//! The response body is the raw row payload.

use crate::infra::config::Config;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::debug;

const QUERY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("feed request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("feed returned status {0}")]
    Status(u16),
    #[error("feed body unreadable: {0}")]
    Body(#[source] reqwest::Error),
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        match self {
            FetchError::Request(e) | FetchError::Body(e) => e.is_timeout(),
            FetchError::Status(_) => false,
        }
    }
}

pub struct FeedClient {
    client: reqwest::Client,
    url: String,
    query_tz: Tz,
}

impl FeedClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder().timeout(config.feed_timeout()).build()?;

        Ok(Self { client, url: config.feed_url().to_string(), query_tz: config.query_tz() })
    }

    /// Format the window start the way the feed expects it
    pub fn query_time(&self, since: DateTime<Utc>) -> String {
        since.with_timezone(&self.query_tz).format(QUERY_TIME_FORMAT).to_string()
    }

    /// Fetch every row the feed has recorded since `since`
    pub async fn fetch(&self, since: DateTime<Utc>) -> Result<String, FetchError> {
        let time = self.query_time(since);

        let response = self
            .client
            .get(&self.url)
            .query(&[("time", time.as_str())])
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(FetchError::Body)?;
        debug!(time = %time, bytes = body.len(), "feed_fetched");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use httpmock::prelude::*;

    #[test]
    fn test_query_time_in_feed_timezone() {
        let client = FeedClient::new(&Config::default()).unwrap();
        // Oslo is UTC+2 in summer
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 30).unwrap();
        assert_eq!(client.query_time(since), "2024-05-01 11:59:30");
    }

    #[test]
    fn test_query_time_winter_offset() {
        let client = FeedClient::new(&Config::default()).unwrap();
        // Oslo is UTC+1 in winter
        let since = Utc.with_ymd_and_hms(2024, 1, 15, 23, 30, 0).unwrap();
        assert_eq!(client.query_time(since), "2024-01-16 00:30:00");
    }

    #[tokio::test]
    async fn test_fetch_sends_time_parameter() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/get_stream.php").query_param_exists("time");
                then.status(200).body("BS\tY7\tA1-2\n");
            })
            .await;

        let config = Config::default()
            .with_endpoints(&server.url("/get_stream.php"), &server.url("/devices"));
        let client = FeedClient::new(&config).unwrap();
        let since = Utc.with_ymd_and_hms(2024, 5, 1, 9, 59, 30).unwrap();

        let body = client.fetch(since).await.unwrap();

        assert_eq!(body, "BS\tY7\tA1-2\n");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/get_stream.php");
                then.status(503);
            })
            .await;

        let config = Config::default()
            .with_endpoints(&server.url("/get_stream.php"), &server.url("/devices"));
        let client = FeedClient::new(&config).unwrap();

        let err = client.fetch(Utc::now()).await.unwrap_err();
        assert!(matches!(err, FetchError::Status(503)));
        assert!(!err.is_timeout());
    }
}
