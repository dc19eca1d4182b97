//! Downstream device directory client
//!
//! `GET {base_url}` returns every registered device. Only devices of the
//! monitored type that belong to an organisation are eligible for forwarding.

use crate::domain::types::{DeviceId, DeviceRecord};
use crate::infra::config::Config;
use std::collections::HashSet;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("device directory request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("device directory returned status {0}")]
    Status(u16),
    #[error("device directory body invalid: {0}")]
    Decode(#[source] reqwest::Error),
}

pub struct DirectoryClient {
    client: reqwest::Client,
    url: String,
    device_type: String,
}

impl DirectoryClient {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(config.downstream_timeout()).build()?;

        Ok(Self {
            client,
            url: config.downstream_url().to_string(),
            device_type: config.device_type().to_string(),
        })
    }

    pub async fn fetch_devices(&self) -> Result<Vec<DeviceRecord>, DirectoryError> {
        let response = self
            .client
            .get(&self.url)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(DirectoryError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        response.json::<Vec<DeviceRecord>>().await.map_err(DirectoryError::Decode)
    }

    /// Fetch the directory and reduce it to the allow-listed device ids
    pub async fn fetch_allowed(&self) -> Result<HashSet<DeviceId>, DirectoryError> {
        let records = self.fetch_devices().await?;
        Ok(allowed_devices(&records, &self.device_type))
    }
}

/// Devices of `device_type` with a non-null organisation
pub fn allowed_devices(records: &[DeviceRecord], device_type: &str) -> HashSet<DeviceId> {
    records
        .iter()
        .filter(|r| r.device_type.as_deref() == Some(device_type) && r.organisation_id.is_some())
        .map(|r| r.id.clone())
        .collect()
}
