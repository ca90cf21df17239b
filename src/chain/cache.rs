//! Caching decorator for UTXO providers
//!
//! Listings are cached per address with a short TTL. When the upstream
//! backend fails in a way that looks like an outage or a ban, the last
//! known listing is served instead, however old, and a degraded-mode
//! warning is logged. An empty listing is returned only when nothing was
//! ever cached for the address; callers treat that as "no data", not as
//! "no funds".

use super::provider::{ProviderError, UtxoProvider};
use crate::core::transaction::Utxo;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// =============================================================================
// Constants
// =============================================================================

/// Default time a listing is served without asking the backend again
pub const DEFAULT_TTL: Duration = Duration::from_secs(20);

// =============================================================================
// Listing
// =============================================================================

/// Where a listing came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    /// Fetched from the backend just now
    Fresh,
    /// Served from a cache entry still inside its TTL
    Cached,
    /// Served from an expired entry because the backend failed
    Stale,
    /// Backend failed and nothing was cached
    Unavailable,
}

impl Freshness {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Freshness::Stale | Freshness::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct UtxoListing {
    pub utxos: Vec<Utxo>,
    pub freshness: Freshness,
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    utxos: Vec<Utxo>,
    fetched_at: Instant,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub stale_served: u64,
    pub unavailable: u64,
}

impl CacheStats {
    /// Share of lookups answered without calling the backend
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// TTL cache in front of any [`UtxoProvider`]
pub struct CachedProvider {
    inner: Arc<dyn UtxoProvider>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl CachedProvider {
    pub fn new(inner: Arc<dyn UtxoProvider>) -> Self {
        Self::with_ttl(inner, DEFAULT_TTL)
    }

    pub fn with_ttl(inner: Arc<dyn UtxoProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// List outputs at `address`, reporting where the answer came from
    pub async fn fetch(&self, address: &str) -> Result<UtxoListing, ProviderError> {
        {
            let mut state = self.state.write().await;
            let fresh = state
                .entries
                .get(address)
                .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
                .map(|entry| entry.utxos.clone());
            if let Some(utxos) = fresh {
                state.stats.hits += 1;
                return Ok(UtxoListing {
                    utxos,
                    freshness: Freshness::Cached,
                });
            }
            state.stats.misses += 1;
        }

        // No lock is held across the backend call
        match self.inner.list(address).await {
            Ok(utxos) => {
                let mut state = self.state.write().await;
                state.entries.insert(
                    address.to_string(),
                    CacheEntry {
                        utxos: utxos.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                state.stats.refreshes += 1;
                debug!(
                    "Fetched {} UTXOs for {} from {}",
                    utxos.len(),
                    address,
                    self.inner.name()
                );
                Ok(UtxoListing {
                    utxos,
                    freshness: Freshness::Fresh,
                })
            }
            Err(err) if err.is_degraded() => {
                let mut state = self.state.write().await;
                let stale = state.entries.get(address).cloned();
                match stale {
                    Some(entry) => {
                        state.stats.stale_served += 1;
                        warn!(
                            "Degraded mode: {} failed for {} ({}); serving listing {}s old",
                            self.inner.name(),
                            address,
                            err,
                            entry.fetched_at.elapsed().as_secs()
                        );
                        Ok(UtxoListing {
                            utxos: entry.utxos,
                            freshness: Freshness::Stale,
                        })
                    }
                    None => {
                        state.stats.unavailable += 1;
                        warn!(
                            "Degraded mode: {} failed for {} ({}); no cached listing",
                            self.inner.name(),
                            address,
                            err
                        );
                        Ok(UtxoListing {
                            utxos: Vec::new(),
                            freshness: Freshness::Unavailable,
                        })
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Drop the cached listing for `address`, e.g. after a submit moved funds
    pub async fn invalidate(&self, address: &str) {
        self.state.write().await.entries.remove(address);
    }

    pub async fn stats(&self) -> CacheStats {
        self.state.read().await.stats.clone()
    }
}

#[async_trait]
impl UtxoProvider for CachedProvider {
    fn name(&self) -> &'static str {
        "cached"
    }

    async fn list(&self, address: &str) -> Result<Vec<Utxo>, ProviderError> {
        self.fetch(address).await.map(|listing| listing.utxos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockProvider;
    use crate::core::value::Value;

    const ADDR: &str = "addr_test1wallet";

    #[tokio::test]
    async fn test_hit_within_ttl() {
        let mock = Arc::new(MockProvider::new());
        mock.credit(ADDR, Value::lovelace(1_000_000)).await;
        let cache = CachedProvider::with_ttl(mock.clone(), Duration::from_secs(60));

        assert_eq!(cache.fetch(ADDR).await.unwrap().freshness, Freshness::Fresh);
        mock.credit(ADDR, Value::lovelace(2_000_000)).await;

        let second = cache.fetch(ADDR).await.unwrap();
        assert_eq!(second.freshness, Freshness::Cached);
        assert_eq!(second.utxos.len(), 1);

        cache.invalidate(ADDR).await;
        assert_eq!(cache.fetch(ADDR).await.unwrap().utxos.len(), 2);

        let stats = cache.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert!(stats.hit_rate() > 0.3);
    }

    #[tokio::test]
    async fn test_stale_fallback_on_ban() {
        let mock = Arc::new(MockProvider::new());
        mock.credit(ADDR, Value::lovelace(1_000_000)).await;
        let cache = CachedProvider::with_ttl(mock.clone(), Duration::ZERO);

        cache.fetch(ADDR).await.unwrap();
        mock.set_failure(Some(ProviderError::RateLimited { status: 418 }))
            .await;

        let listing = cache.fetch(ADDR).await.unwrap();
        assert_eq!(listing.freshness, Freshness::Stale);
        assert_eq!(listing.utxos.len(), 1);
        assert_eq!(cache.stats().await.stale_served, 1);
    }

    #[tokio::test]
    async fn test_empty_only_without_cache() {
        let mock = Arc::new(MockProvider::new());
        mock.set_failure(Some(ProviderError::Unreachable("refused".into())))
            .await;
        let cache = CachedProvider::new(mock);

        let listing = cache.fetch(ADDR).await.unwrap();
        assert_eq!(listing.freshness, Freshness::Unavailable);
        assert!(listing.utxos.is_empty());
        assert!(cache.list(ADDR).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_client_errors_propagate() {
        let mock = Arc::new(MockProvider::new());
        mock.credit(ADDR, Value::lovelace(1)).await;
        let cache = CachedProvider::with_ttl(mock.clone(), Duration::ZERO);
        cache.fetch(ADDR).await.unwrap();

        mock.set_failure(Some(ProviderError::Http {
            status: 400,
            body: "invalid address".into(),
        }))
        .await;
        assert!(cache.fetch(ADDR).await.is_err());
    }
}
