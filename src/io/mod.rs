//! IO modules - external system interfaces
//!
//! - `feed` - HTTP client for the timing feed
//! - `directory` - Device directory client (allow-list source)
//! - `downstream` - Passing and status ping submission
//! - `status_server` - Health, Prometheus metrics and manual refresh endpoint

pub mod directory;
pub mod downstream;
pub mod feed;
pub mod status_server;

// Re-export commonly used types
pub use directory::{DirectoryClient, DirectoryError};
pub use downstream::{DownstreamClient, ForwardError};
pub use feed::{FeedClient, FetchError};
