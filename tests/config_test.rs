//! Integration tests for configuration loading

use feed_relay::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[feed]
url = "http://feed.test/get_stream.php"
query_timezone = "Europe/Stockholm"
event_timezone = "UTC"
poll_interval_ms = 500

[downstream]
base_url = "http://api.test/devices/"
max_in_flight = 4

[dedup]
passing_window_secs = 20
status_window_secs = 40

[allow_list]
device_type = "EMIT"

[server]
port = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.feed_url(), "http://feed.test/get_stream.php");
    assert_eq!(config.query_tz(), chrono_tz::Europe::Stockholm);
    assert_eq!(config.event_tz(), chrono_tz::UTC);
    assert_eq!(config.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.downstream_url(), "http://api.test/devices");
    assert_eq!(config.max_in_flight(), 4);
    assert_eq!(config.device_type(), "EMIT");
    assert_eq!(config.server_port(), 0);
    // Lookback follows whichever span is larger
    assert_eq!(config.lookback(), Duration::from_secs(40));
    // Unset sections keep their defaults
    assert_eq!(config.metrics_interval_secs(), 60);
    assert_eq!(config.allow_list_refresh_interval(), Duration::from_secs(300));
}

#[test]
fn test_invalid_timezone_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[feed]
url = "http://feed.test/get_stream.php"
event_timezone = "Nowhere/Special"

[downstream]
base_url = "http://api.test/devices"
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.passing_window(), Duration::from_secs(30));
    assert_eq!(config.query_tz(), chrono_tz::Europe::Oslo);
}

#[test]
fn test_dev_config_parses() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml");
    let config = Config::from_file(path).unwrap();

    assert_eq!(config.event_tz(), chrono_tz::Europe::Helsinki);
    assert_eq!(config.downstream_url(), "https://navisport.fi/api/devices");
    assert_eq!(config.status_window(), Duration::from_secs(15));
}

#[test]
fn test_zero_intervals_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[feed]
url = "http://feed.test/get_stream.php"
poll_interval_ms = 0

[downstream]
base_url = "http://api.test/devices"

[allow_list]
refresh_interval_secs = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("feed.poll_interval_ms"));

    // Fallback keeps every timer period usable
    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.allow_list_refresh_interval(), Duration::from_secs(300));
}

#[test]
fn test_zero_refresh_interval_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[feed]
url = "http://feed.test/get_stream.php"

[downstream]
base_url = "http://api.test/devices"

[allow_list]
refresh_interval_secs = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("allow_list.refresh_interval_secs"));
}
