//! Services - business logic and state management
//!
//! - `poller` - Per-tick fetch, classify, dedup and forward loop
//! - `dedup` - Time-bounded windows of already forwarded identities
//! - `forwarder` - Bounded dispatch of novel events to the downstream API
//! - `allow_list` - Device allow-list snapshot and periodic refresh

pub mod allow_list;
pub mod dedup;
pub mod forwarder;
pub mod poller;

// Re-export commonly used types
pub use allow_list::{AllowList, AllowListRefresher};
pub use dedup::{DedupWindow, Identified};
pub use forwarder::{ForwardHandle, Forwarder};
pub use poller::{Poller, TickReport};
