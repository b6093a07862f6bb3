use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    clock::UtcDT,
    sample::{LocationSample, LocationSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, specta::Type)]
pub struct LocationCacheEntry {
    pub sample: LocationSample,
    pub source: LocationSource,
    /// When this entry was stored, by the acquirer's clock
    pub captured_at: UtcDT,
}

impl LocationCacheEntry {
    /// Age of the entry at `now`, entries from the future count as brand new
    pub fn age(&self, now: UtcDT) -> Duration {
        (now - self.captured_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Holds the single most recent fix, checked against two freshness windows
#[derive(Debug, Clone)]
pub struct LocationCache {
    entry: Option<LocationCacheEntry>,
    fresh_ttl: Duration,
    stale_ttl: Duration,
}

impl LocationCache {
    pub fn new(fresh_ttl: Duration, stale_ttl: Duration) -> Self {
        Self {
            entry: None,
            fresh_ttl,
            stale_ttl: stale_ttl.max(fresh_ttl),
        }
    }

    pub fn get(&self) -> Option<LocationCacheEntry> {
        self.entry
    }

    pub fn set(&mut self, entry: LocationCacheEntry) {
        self.entry = Some(entry);
    }

    pub fn clear(&mut self) {
        self.entry = None;
    }

    /// The entry if it's recent enough to be trusted without asking the device
    pub fn fresh(&self, now: UtcDT) -> Option<LocationCacheEntry> {
        self.entry.filter(|e| e.age(now) <= self.fresh_ttl)
    }

    /// The entry if it's old but still good enough as a fallback
    pub fn usable(&self, now: UtcDT) -> Option<LocationCacheEntry> {
        self.entry.filter(|e| e.age(now) <= self.stale_ttl)
    }

    pub fn set_ttls(&mut self, fresh_ttl: Duration, stale_ttl: Duration) {
        self.fresh_ttl = fresh_ttl;
        self.stale_ttl = stale_ttl.max(fresh_ttl);
    }
}
