//! Two-tier geocoding of establishments.
//!
//! Tier 1 resolves a well-formed SIRET to an exact address through the
//! business registry; anything left over falls back to the commune centroid
//! by INSEE code. Lookups are batched with a small inter-batch delay,
//! cached through the injected cache capability, and rate-limited keys get
//! exactly one retry pass after a fixed backoff.

mod cache;
mod communes;
mod registry;

pub use cache::{CachedLocation, GeoCache, GeoPrecision, MemoryGeoCache};
pub use communes::{CommunesClient, HttpCommunesClient};
pub use registry::{HttpRegistryClient, RegistryClient, RegistryOutcome};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, SpeError};
use crate::models::Establishment;

/// Cumulative resolution counters for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct GeoStats {
    pub by_address: usize,
    pub by_municipality: usize,
    pub unresolved: usize,
}

/// Progress signal emitted after each sub-batch.
#[derive(Debug, Clone, Copy)]
pub struct GeoProgress {
    pub tier: GeoTier,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoTier {
    Registry,
    Communes,
}

/// Result of resolving one establishment set.
#[derive(Debug, Default)]
pub struct GeoOutcome {
    /// Establishment id to resolved location.
    pub located: HashMap<String, CachedLocation>,
    /// SIRET to legal-category code, harvested from the registry lookups.
    pub legal_categories: HashMap<String, String>,
    pub stats: GeoStats,
}

#[derive(Debug, Clone)]
pub struct GeoResolverConfig {
    /// The registry API is the more rate-limit-sensitive of the two.
    pub registry_batch: usize,
    pub communes_batch: usize,
    pub registry_batch_delay: Duration,
    pub communes_batch_delay: Duration,
    /// Backoff before the single retry pass over rate-limited SIRETs.
    pub retry_backoff: Duration,
}

impl Default for GeoResolverConfig {
    fn default() -> Self {
        Self {
            registry_batch: 10,
            communes_batch: 50,
            registry_batch_delay: Duration::from_millis(200),
            communes_batch_delay: Duration::from_millis(100),
            retry_backoff: Duration::from_secs(2),
        }
    }
}

pub struct GeoResolver {
    registry: Arc<dyn RegistryClient>,
    communes: Arc<dyn CommunesClient>,
    cache: Arc<dyn GeoCache>,
    config: GeoResolverConfig,
}

impl GeoResolver {
    pub fn new(
        registry: Arc<dyn RegistryClient>,
        communes: Arc<dyn CommunesClient>,
        cache: Arc<dyn GeoCache>,
        config: GeoResolverConfig,
    ) -> Self {
        Self {
            registry,
            communes,
            cache,
            config,
        }
    }

    /// Resolve a whole establishment set. Cancellable between batches; a
    /// cancelled run returns `Err(Cancelled)` so late results are discarded
    /// rather than merged.
    pub async fn resolve_batch(
        &self,
        establishments: &[Establishment],
        cancel: &CancelToken,
        mut progress: impl FnMut(GeoProgress),
    ) -> Result<GeoOutcome> {
        // Tier-1 queue: unique well-formed SIRETs not yet cached.
        let mut seen = HashSet::new();
        let siret_queue: Vec<String> = establishments
            .iter()
            .filter_map(|e| e.well_formed_siret())
            .filter(|s| seen.insert(s.to_string()))
            .filter(|s| self.cache.get(s).is_none())
            .map(str::to_string)
            .collect();

        let leftover = self
            .registry_pass(&siret_queue, cancel, &mut progress)
            .await?;
        if !leftover.is_empty() {
            debug!(
                count = leftover.len(),
                "retrying unresolved SIRETs after backoff"
            );
            tokio::time::sleep(self.config.retry_backoff).await;
            let still_missing = self.registry_pass(&leftover, cancel, &mut progress).await?;
            if !still_missing.is_empty() {
                debug!(count = still_missing.len(), "SIRETs fall back to tier 2");
            }
        }

        // Tier-2 queue: INSEE codes of establishments whose SIRET stayed
        // unresolved, or which never had one.
        let mut seen_insee = HashSet::new();
        let insee_queue: Vec<String> = establishments
            .iter()
            .filter(|e| match e.well_formed_siret() {
                Some(siret) => self.cache.get(siret).is_none(),
                None => true,
            })
            .filter_map(|e| e.city_insee_code.as_deref())
            .filter(|code| seen_insee.insert(code.to_string()))
            .filter(|code| self.cache.get(code).is_none())
            .map(str::to_string)
            .collect();
        self.communes_pass(&insee_queue, cancel, &mut progress)
            .await?;

        Ok(self.assemble(establishments))
    }

    /// One pass over `sirets`, in concurrent sub-batches. Returns the keys
    /// still unresolved (misses and rate limits alike); negative results are
    /// never written to the cache.
    async fn registry_pass(
        &self,
        sirets: &[String],
        cancel: &CancelToken,
        progress: &mut impl FnMut(GeoProgress),
    ) -> Result<Vec<String>> {
        let mut unresolved = Vec::new();
        let mut done = 0usize;
        for batch in sirets.chunks(self.config.registry_batch.max(1)) {
            if cancel.is_cancelled() {
                return Err(SpeError::Cancelled);
            }
            let lookups = join_all(batch.iter().map(|s| self.registry.lookup_siret(s))).await;
            for (siret, outcome) in batch.iter().zip(lookups) {
                match outcome? {
                    RegistryOutcome::Found(location) => {
                        self.cache.put(siret, location);
                    }
                    RegistryOutcome::Miss => unresolved.push(siret.clone()),
                    RegistryOutcome::RateLimited => {
                        warn!(siret, "registry rate-limited the lookup");
                        unresolved.push(siret.clone());
                    }
                }
            }
            done += batch.len();
            progress(GeoProgress {
                tier: GeoTier::Registry,
                done,
                total: sirets.len(),
            });
            if done < sirets.len() {
                tokio::time::sleep(self.config.registry_batch_delay).await;
            }
        }
        Ok(unresolved)
    }

    async fn communes_pass(
        &self,
        codes: &[String],
        cancel: &CancelToken,
        progress: &mut impl FnMut(GeoProgress),
    ) -> Result<()> {
        let mut done = 0usize;
        for batch in codes.chunks(self.config.communes_batch.max(1)) {
            if cancel.is_cancelled() {
                return Err(SpeError::Cancelled);
            }
            let lookups = join_all(batch.iter().map(|c| self.communes.lookup_insee(c))).await;
            for (code, outcome) in batch.iter().zip(lookups) {
                if let Some(location) = outcome? {
                    self.cache.put(code, location);
                }
            }
            done += batch.len();
            progress(GeoProgress {
                tier: GeoTier::Communes,
                done,
                total: codes.len(),
            });
            if done < codes.len() {
                tokio::time::sleep(self.config.communes_batch_delay).await;
            }
        }
        Ok(())
    }

    /// Assemble per-establishment results from the cache, address precision
    /// strictly preferred over commune centroids.
    fn assemble(&self, establishments: &[Establishment]) -> GeoOutcome {
        let mut outcome = GeoOutcome::default();
        for establishment in establishments {
            let siret_hit = establishment
                .well_formed_siret()
                .and_then(|siret| self.cache.get(siret).map(|loc| (siret.to_string(), loc)));

            let location = match siret_hit {
                Some((siret, location)) => {
                    if let Some(category) = &location.legal_category {
                        outcome.legal_categories.insert(siret, category.clone());
                    }
                    Some(location)
                }
                None => establishment
                    .city_insee_code
                    .as_deref()
                    .and_then(|code| self.cache.get(code)),
            };

            match location {
                Some(location) => {
                    match location.precision {
                        GeoPrecision::Address => outcome.stats.by_address += 1,
                        GeoPrecision::Municipality => outcome.stats.by_municipality += 1,
                    }
                    outcome
                        .located
                        .insert(establishment.id.clone(), location);
                }
                None => outcome.stats.unresolved += 1,
            }
        }
        info!(
            by_address = outcome.stats.by_address,
            by_municipality = outcome.stats.by_municipality,
            unresolved = outcome.stats.unresolved,
            "geocoding resolved"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct FakeRegistry {
        requests: AtomicUsize,
        /// SIRETs answering 429 on their first lookup only.
        limited_once: Mutex<HashSet<String>>,
        known: HashMap<String, (f64, f64, Option<String>)>,
    }

    impl FakeRegistry {
        fn new(known: &[(&str, f64, f64, Option<&str>)]) -> Self {
            Self {
                requests: AtomicUsize::new(0),
                limited_once: Mutex::new(HashSet::new()),
                known: known
                    .iter()
                    .map(|&(s, lat, lon, cj)| {
                        (s.to_string(), (lat, lon, cj.map(str::to_string)))
                    })
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl RegistryClient for FakeRegistry {
        async fn lookup_siret(&self, siret: &str) -> Result<RegistryOutcome> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.limited_once.lock().unwrap().remove(siret) {
                return Ok(RegistryOutcome::RateLimited);
            }
            Ok(match self.known.get(siret) {
                Some((lat, lon, category)) => RegistryOutcome::Found(CachedLocation {
                    latitude: *lat,
                    longitude: *lon,
                    precision: GeoPrecision::Address,
                    label: None,
                    legal_category: category.clone(),
                }),
                None => RegistryOutcome::Miss,
            })
        }
    }

    struct FakeCommunes {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl CommunesClient for FakeCommunes {
        async fn lookup_insee(&self, insee: &str) -> Result<Option<CachedLocation>> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            Ok(Some(
                communes::parse_commune(&json!({
                    "nom": format!("Commune {insee}"),
                    "centre": {"coordinates": [2.0, 47.0]}
                }))
                .unwrap(),
            ))
        }
    }

    fn establishment(id: &str, siret: Option<&str>, insee: Option<&str>) -> Establishment {
        let mut row = serde_json::Map::new();
        row.insert("id".into(), json!(id));
        if let Some(s) = siret {
            row.insert("siret".into(), json!(s));
        }
        if let Some(i) = insee {
            row.insert("city_insee_code".into(), json!(i));
        }
        Establishment::from_row(&row, 0)
    }

    fn resolver(
        registry: Arc<FakeRegistry>,
        communes: Arc<FakeCommunes>,
    ) -> GeoResolver {
        let config = GeoResolverConfig {
            registry_batch_delay: Duration::ZERO,
            communes_batch_delay: Duration::ZERO,
            retry_backoff: Duration::ZERO,
            ..Default::default()
        };
        GeoResolver::new(registry, communes, Arc::new(MemoryGeoCache::default()), config)
    }

    #[tokio::test]
    async fn test_tier1_preferred_even_with_insee_present() {
        let registry = Arc::new(FakeRegistry::new(&[(
            "11000000000001",
            48.0,
            2.0,
            Some("7120"),
        )]));
        let communes = Arc::new(FakeCommunes {
            requests: AtomicUsize::new(0),
        });
        let resolver = resolver(registry.clone(), communes.clone());
        let ests = vec![establishment("a", Some("11000000000001"), Some("75101"))];

        let outcome = resolver
            .resolve_batch(&ests, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.stats.by_address, 1);
        assert_eq!(communes.requests.load(Ordering::SeqCst), 0);
        assert_eq!(
            outcome.legal_categories.get("11000000000001").unwrap(),
            "7120"
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_network_on_second_run() {
        let registry = Arc::new(FakeRegistry::new(&[("11000000000001", 48.0, 2.0, None)]));
        let communes = Arc::new(FakeCommunes {
            requests: AtomicUsize::new(0),
        });
        let resolver = resolver(registry.clone(), communes.clone());
        let ests = vec![
            establishment("a", Some("11000000000001"), None),
            establishment("b", None, Some("75101")),
        ];

        resolver
            .resolve_batch(&ests, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        let after_first = registry.requests.load(Ordering::SeqCst)
            + communes.requests.load(Ordering::SeqCst);

        let outcome = resolver
            .resolve_batch(&ests, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        let after_second = registry.requests.load(Ordering::SeqCst)
            + communes.requests.load(Ordering::SeqCst);
        assert_eq!(after_first, after_second);
        assert_eq!(outcome.stats.by_address, 1);
        assert_eq!(outcome.stats.by_municipality, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_siret_retried_once() {
        let registry = Arc::new(FakeRegistry::new(&[("11000000000001", 48.0, 2.0, None)]));
        registry
            .limited_once
            .lock()
            .unwrap()
            .insert("11000000000001".to_string());
        let communes = Arc::new(FakeCommunes {
            requests: AtomicUsize::new(0),
        });
        let resolver = resolver(registry.clone(), communes.clone());
        let ests = vec![establishment("a", Some("11000000000001"), None)];

        let outcome = resolver
            .resolve_batch(&ests, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.stats.by_address, 1);
        assert_eq!(registry.requests.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unresolved_counts_establishments_without_keys() {
        let registry = Arc::new(FakeRegistry::new(&[]));
        let communes = Arc::new(FakeCommunes {
            requests: AtomicUsize::new(0),
        });
        let resolver = resolver(registry, communes);
        let ests = vec![establishment("a", None, None)];
        let outcome = resolver
            .resolve_batch(&ests, &CancelToken::new(), |_| {})
            .await
            .unwrap();
        assert_eq!(outcome.stats.unresolved, 1);
        assert!(outcome.located.is_empty());
    }
}
