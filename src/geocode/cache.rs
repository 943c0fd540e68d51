//! Injected cache capability for geocoding lookups.
//!
//! Storage-agnostic on purpose: the in-memory adapter below is the only one
//! the core needs, but anything with `get`/`put` and bounded eviction fits.
//! Entries are immutable once written and only successful lookups are stored,
//! so a key is resolved over the network at most once per process lifetime.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde::Serialize;

/// Precision of a resolved location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoPrecision {
    /// Exact address, from a registry record matching the queried SIRET.
    Address,
    /// Commune centroid, or the siège of the same legal entity.
    Municipality,
}

/// A cached location, keyed by SIRET (tier 1) or INSEE code (tier 2).
#[derive(Debug, Clone, Serialize)]
pub struct CachedLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub precision: GeoPrecision,
    /// Geocoded address (tier 1) or commune name (tier 2).
    pub label: Option<String>,
    /// Legal-category code of the owning entity, from the registry lookup.
    pub legal_category: Option<String>,
}

pub trait GeoCache: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedLocation>;
    /// Writes to an existing key are ignored: entries are immutable.
    fn put(&self, key: &str, value: CachedLocation);
}

/// Bounded in-memory cache evicting oldest entries first.
pub struct MemoryGeoCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

struct CacheInner {
    entries: HashMap<String, CachedLocation>,
    order: VecDeque<String>,
}

impl MemoryGeoCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryGeoCache {
    fn default() -> Self {
        // Mirrors the sessionStorage budget of the original deployment.
        Self::new(5_000)
    }
}

impl GeoCache for MemoryGeoCache {
    fn get(&self, key: &str) -> Option<CachedLocation> {
        let inner = self.inner.lock().ok()?;
        inner.entries.get(key).cloned()
    }

    fn put(&self, key: &str, value: CachedLocation) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.entries.contains_key(key) {
            return;
        }
        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }
        inner.entries.insert(key.to_string(), value);
        inner.order.push_back(key.to_string());
    }
}
