//! Cache-aside decorator over a [`GoodStore`].
//!
//! `CacheAsideStore` keeps a key/value cache coherent with the relational
//! store while exposing the same `GoodStore` contract.
//!
//! # Key Design
//!
//! - Good: `good:{id}` -> JSON serialized `Good`
//!
//! # Cache Scope
//!
//! - **Cached**: `get` (single entity retrieval)
//! - **Bypassed**: `list` (listing always reflects committed store state)
//!
//! # Write Protocol
//!
//! Cache writes never describe uncommitted state. Inside a transaction,
//! `update` and `soft_delete` evict the entry eagerly; eviction failures are
//! surfaced so that the enclosing transaction rolls back. Populates and
//! priority patches are deferred on the [`TxContext`] and applied by
//! [`GoodStore::after_commit`]. Outside a transaction they run immediately.
//!
//! Post-commit refresh failures are logged and followed by a best-effort
//! eviction. A concurrent reader may still see a pre-reorder priority until
//! the writer's refresh lands; that window is bounded by the entry TTL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, PriorityChange, Removal, Reordering,
};
use crate::infrastructure::{DeferredRefresh, GoodStore, RepositoryError, TxContext};

// =============================================================================
// Cache contract
// =============================================================================

/// Prefix for good keys.
const GOOD_KEY_PREFIX: &str = "good:";

/// Time-to-live of populated entries.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Generates the cache key for a good.
#[must_use]
pub fn good_cache_key(id: GoodId) -> String {
    format!("{GOOD_KEY_PREFIX}{id}")
}

/// A cache failure. A miss is not an error; see [`Cache::get`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("cache connection failed: {0}")]
    Connection(String),

    #[error("cache command failed: {0}")]
    Command(String),
}

impl From<CacheError> for RepositoryError {
    fn from(error: CacheError) -> Self {
        Self::Cache(error.to_string())
    }
}

/// Key/value cache with per-entry TTL.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns `Ok(None)` on a miss.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    /// Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

// =============================================================================
// Cache-aside store
// =============================================================================

/// `GoodStore` decorator that serves `get` from a cache.
#[derive(Debug)]
pub struct CacheAsideStore<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    ttl: Duration,
}

impl<S, C> Clone for CacheAsideStore<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            ttl: self.ttl,
        }
    }
}

impl<S, C> CacheAsideStore<S, C>
where
    S: GoodStore,
    C: Cache,
{
    #[must_use]
    pub const fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self {
            store,
            cache,
            ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Overrides the entry TTL. Redis rejects `SET EX 0`, so zero becomes one second.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl.max(Duration::from_secs(1));
        self
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn inner(&self) -> &Arc<S> {
        &self.store
    }

    async fn populate(&self, good: &Good) {
        let key = good_cache_key(good.id);
        let payload = match serde_json::to_string(good) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::warn!(
                    good_id = %good.id,
                    error = %error,
                    "Failed to serialize good for cache"
                );
                return;
            }
        };
        if let Err(error) = self.cache.set(&key, payload, self.ttl).await {
            self.refresh_failed(&key, good.id, &error).await;
        }
    }

    /// Rewrites the priority of entries that are already cached.
    async fn patch_priorities(&self, changes: &[PriorityChange]) {
        for change in changes {
            let key = good_cache_key(change.id);
            let cached = match self.cache.get(&key).await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(error) => {
                    self.refresh_failed(&key, change.id, &error).await;
                    continue;
                }
            };

            let Ok(mut good) = serde_json::from_str::<Good>(&cached) else {
                self.evict_quietly(&key, change.id).await;
                continue;
            };
            good.priority = change.priority;

            let result = match serde_json::to_string(&good) {
                Ok(payload) => self.cache.set(&key, payload, self.ttl).await,
                Err(error) => Err(CacheError::Command(error.to_string())),
            };
            if let Err(error) = result {
                self.refresh_failed(&key, change.id, &error).await;
            }
        }
    }

    async fn refresh_failed(&self, key: &str, id: GoodId, error: &CacheError) {
        tracing::warn!(good_id = %id, error = %error, "Cache refresh failed");
        self.evict_quietly(key, id).await;
    }

    async fn evict_quietly(&self, key: &str, id: GoodId) {
        if let Err(error) = self.cache.remove(key).await {
            tracing::warn!(good_id = %id, error = %error, "Cache eviction failed");
        }
    }

    async fn populate_or_defer(&self, context: &mut TxContext<S::Transaction>, good: &Good) {
        if context.is_transactional() {
            context.defer(DeferredRefresh::Populate(good.clone()));
        } else {
            self.populate(good).await;
        }
    }

    async fn patch_or_defer(
        &self,
        context: &mut TxContext<S::Transaction>,
        changes: Vec<PriorityChange>,
    ) {
        if changes.is_empty() {
            return;
        }
        if context.is_transactional() {
            context.defer(DeferredRefresh::Priorities(changes));
        } else {
            self.patch_priorities(&changes).await;
        }
    }

    /// Reads a cached good. A corrupt payload is evicted and reported as a miss.
    async fn cached(&self, id: GoodId) -> Result<Option<Good>, RepositoryError> {
        let key = good_cache_key(id);
        let Some(payload) = self.cache.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Good>(&payload) {
            Ok(good) => Ok(Some(good)),
            Err(error) => {
                tracing::warn!(good_id = %id, error = %error, "Discarding corrupt cache entry");
                self.cache.remove(&key).await?;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl<S, C> GoodStore for CacheAsideStore<S, C>
where
    S: GoodStore,
    C: Cache,
{
    type Transaction = S::Transaction;

    async fn create(
        &self,
        context: &mut TxContext<S::Transaction>,
        good: &NewGood,
    ) -> Result<Good, RepositoryError> {
        let created = self.store.create(context, good).await?;
        self.populate_or_defer(context, &created).await;
        Ok(created)
    }

    async fn get(
        &self,
        context: &mut TxContext<S::Transaction>,
        id: GoodId,
    ) -> Result<Good, RepositoryError> {
        if let Some(good) = self.cached(id).await? {
            return Ok(good);
        }
        let good = self.store.get(context, id).await?;
        self.populate_or_defer(context, &good).await;
        Ok(good)
    }

    async fn update(
        &self,
        context: &mut TxContext<S::Transaction>,
        changes: &GoodChanges,
    ) -> Result<Good, RepositoryError> {
        let updated = self.store.update(context, changes).await?;
        self.cache.remove(&good_cache_key(updated.id)).await?;
        self.populate_or_defer(context, &updated).await;
        Ok(updated)
    }

    async fn soft_delete(
        &self,
        context: &mut TxContext<S::Transaction>,
        group_id: GroupId,
        id: GoodId,
    ) -> Result<Removal, RepositoryError> {
        let removal = self.store.soft_delete(context, group_id, id).await?;
        self.cache.remove(&good_cache_key(id)).await?;
        self.patch_or_defer(context, removal.shifted.clone()).await;
        Ok(removal)
    }

    async fn list(
        &self,
        context: &mut TxContext<S::Transaction>,
        pagination: Pagination,
    ) -> Result<Vec<Good>, RepositoryError> {
        self.store.list(context, pagination).await
    }

    async fn reprioritize(
        &self,
        context: &mut TxContext<S::Transaction>,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, RepositoryError> {
        let reordering = self
            .store
            .reprioritize(context, group_id, id, new_priority)
            .await?;

        let mut changes = Vec::with_capacity(reordering.shifted.len() + 1);
        changes.push(PriorityChange::new(reordering.id, reordering.priority));
        changes.extend(reordering.shifted.iter().copied());
        self.patch_or_defer(context, changes).await;

        Ok(reordering)
    }

    async fn after_commit(&self, refreshes: Vec<DeferredRefresh>) {
        for refresh in refreshes {
            match refresh {
                DeferredRefresh::Populate(good) => self.populate(&good).await,
                DeferredRefresh::Priorities(changes) => self.patch_priorities(&changes).await,
            }
        }
    }
}
