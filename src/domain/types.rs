//! Shared types for the feed relay

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Instant;

/// Newtype wrapper for timing device IDs (feed column `Y`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        DeviceId(s.to_string())
    }
}

/// Newtype wrapper for chip IDs (feed column `N`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChipId(pub String);

impl std::fmt::Display for ChipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChipId {
    fn from(s: &str) -> Self {
        ChipId(s.to_string())
    }
}

/// Feed column tags. Each token is the tag character followed by its value.
pub mod column {
    pub const ROW_MODE: char = 'B';
    pub const CHIP: char = 'N';
    pub const DEVICE_ID: char = 'Y';
    pub const CODE: char = 'C';
    pub const BATTERY_LEVEL: char = 'A';
    pub const TIME_OF_DAY: char = 'E';
}

/// Row mode (column `B`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowMode {
    Passing,
    Status,
    Other(String),
}

impl std::str::FromStr for RowMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "M" => RowMode::Passing,
            "S" => RowMode::Status,
            other => RowMode::Other(other.to_string()),
        })
    }
}

/// A chip crossing reported by a timing device
#[derive(Debug, Clone, PartialEq)]
pub struct Passing {
    pub device_id: DeviceId,
    pub chip: ChipId,
    pub code: Option<String>,
    pub event_timestamp: DateTime<Utc>,
    pub received_at: Instant,
}

/// A device health report
#[derive(Debug, Clone, PartialEq)]
pub struct StatusPing {
    pub device_id: DeviceId,
    pub code: Option<String>,
    pub battery_level: String,
    pub received_at: Instant,
    /// Wall-clock receive time, sent downstream as `updated`
    pub updated: DateTime<Utc>,
}

/// Classified feed row
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Passing(Passing),
    Status(StatusPing),
    /// Row mode was neither passing nor status
    Unrecognized(String),
}

/// Body item for the downstream passing ingestion endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassingPayload<'a> {
    pub device_id: &'a DeviceId,
    pub chip: &'a ChipId,
    pub code: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

impl<'a> From<&'a Passing> for PassingPayload<'a> {
    fn from(p: &'a Passing) -> Self {
        Self {
            device_id: &p.device_id,
            chip: &p.chip,
            code: p.code.as_deref(),
            timestamp: p.event_timestamp,
        }
    }
}

/// Body for the per-device status ping endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload<'a> {
    pub device_id: &'a DeviceId,
    pub code: Option<&'a str>,
    pub battery_level: &'a str,
    pub updated: DateTime<Utc>,
}

impl<'a> From<&'a StatusPing> for StatusPayload<'a> {
    fn from(s: &'a StatusPing) -> Self {
        Self {
            device_id: &s.device_id,
            code: s.code.as_deref(),
            battery_level: &s.battery_level,
            updated: s.updated,
        }
    }
}

/// Device record from the downstream device directory
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    #[serde(deserialize_with = "deserialize_device_id")]
    pub id: DeviceId,
    #[serde(default)]
    pub device_type: Option<String>,
    #[serde(default)]
    pub organisation_id: Option<serde_json::Value>,
}

/// Device IDs arrive as strings from the feed but may be numbers in the directory
fn deserialize_device_id<'de, D>(deserializer: D) -> Result<DeviceId, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::{self, Visitor};

    struct DeviceIdVisitor;

    impl<'de> Visitor<'de> for DeviceIdVisitor {
        type Value = DeviceId;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer device id")
        }

        fn visit_str<E>(self, value: &str) -> Result<DeviceId, E>
        where
            E: de::Error,
        {
            Ok(DeviceId(value.to_string()))
        }

        fn visit_string<E>(self, value: String) -> Result<DeviceId, E>
        where
            E: de::Error,
        {
            Ok(DeviceId(value))
        }

        fn visit_u64<E>(self, value: u64) -> Result<DeviceId, E>
        where
            E: de::Error,
        {
            Ok(DeviceId(value.to_string()))
        }

        fn visit_i64<E>(self, value: i64) -> Result<DeviceId, E>
        where
            E: de::Error,
        {
            Ok(DeviceId(value.to_string()))
        }
    }

    deserializer.deserialize_any(DeviceIdVisitor)
}
