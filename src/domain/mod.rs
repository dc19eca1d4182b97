//! Domain models - feed rows and the events classified from them
//!
//! - `row` - tab-separated, tag-prefixed feed rows
//! - `classify` - row mode dispatch into `Passing` / `StatusPing`
//! - `types` - identifiers, events and downstream payload shapes

pub mod classify;
pub mod row;
pub mod types;

// Re-export commonly used types at module level
pub use classify::{classify_payload, Batch, ClassifyContext, RowParseError};
pub use types::{ChipId, DeviceId, Event, Passing, StatusPing};
