//! Time-windowed suppression of already-forwarded events
//!
//! The feed re-sends its recent history on every poll. Each event kind gets
//! its own window mapping identity -> last forward time:
//! - Passings: keyed by chip id, 30s span
//! - Status pings: keyed by device id, 15s span
//!
//! An entry whose age reaches the span no longer suppresses and is removed by
//! the next eviction, so an identity can be forwarded again after the span.

use crate::domain::types::{ChipId, DeviceId, Passing, StatusPing};
use rustc_hash::{FxHashMap, FxHashSet};
use std::hash::Hash;
use std::time::{Duration, Instant};
use tracing::debug;

/// Events that carry a dedup identity
pub trait Identified {
    type Id: Eq + Hash + Clone + std::fmt::Debug;

    fn identity(&self) -> Self::Id;
}

impl Identified for Passing {
    type Id = ChipId;

    /// A chip read by two devices within the span is forwarded once
    fn identity(&self) -> ChipId {
        self.chip.clone()
    }
}

impl Identified for StatusPing {
    type Id = DeviceId;

    fn identity(&self) -> DeviceId {
        self.device_id.clone()
    }
}

/// Identity -> last forward time, for one event kind
pub struct DedupWindow<E: Identified> {
    name: &'static str,
    span: Duration,
    forwarded: FxHashMap<E::Id, Instant>,
}

impl<E: Identified> DedupWindow<E> {
    pub fn new(name: &'static str, span: Duration) -> Self {
        Self { name, span, forwarded: FxHashMap::default() }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    #[inline]
    fn is_live(&self, recorded_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(recorded_at) < self.span
    }

    /// Events whose identity is not currently tracked.
    ///
    /// Within one batch only the first occurrence of an identity survives.
    pub fn filter_novel(&self, events: Vec<E>, now: Instant) -> Vec<E> {
        let mut seen_in_batch = FxHashSet::default();
        let before = events.len();

        let novel: Vec<E> = events
            .into_iter()
            .filter(|event| {
                let id = event.identity();
                let tracked = self.forwarded.get(&id).is_some_and(|&at| self.is_live(at, now));
                !tracked && seen_in_batch.insert(id)
            })
            .collect();

        if novel.len() < before {
            debug!(
                window = self.name,
                suppressed = before - novel.len(),
                novel = novel.len(),
                "dedup_suppressed"
            );
        }

        novel
    }

    /// Mark events as forwarded at `now`
    pub fn record(&mut self, events: &[E], now: Instant) {
        for event in events {
            self.forwarded.insert(event.identity(), now);
        }
    }

    /// Drop entries whose age has reached the span
    pub fn evict_expired(&mut self, now: Instant) -> usize {
        let before = self.forwarded.len();
        let span = self.span;
        self.forwarded.retain(|_, &mut at| now.saturating_duration_since(at) < span);

        let evicted = before - self.forwarded.len();
        if evicted > 0 {
            debug!(window = self.name, evicted, remaining = self.forwarded.len(), "dedup_evicted");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.forwarded.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forwarded.is_empty()
    }

    #[cfg(test)]
    pub fn contains(&self, id: &E::Id) -> bool {
        self.forwarded.contains_key(id)
    }
}
