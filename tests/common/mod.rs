//! Common test helpers for integration tests.
//!
//! Fakes for every collaborator of the service and the batcher, plus a
//! harness wiring the service over in-memory backends.
//!
//! # Note
//!
//! Each integration test file is compiled as its own crate, so helpers used
//! by only some files would otherwise trigger dead code warnings.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use goods_manager::application::{GoodService, ServiceConfig};
use goods_manager::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, Removal, Reordering,
};
use goods_manager::infrastructure::{
    AnalyticsSink, Cache, CacheAsideStore, CacheError, DeferredRefresh, EventPublisher,
    GoodStore, InMemoryCache, InMemoryGoodStore, PublishError, RepositoryError, SinkError,
    TxContext,
};

// =============================================================================
// Fixtures
// =============================================================================

pub fn good(id: i64) -> Good {
    Good {
        id: GoodId::new(id),
        group_id: GroupId::new(1),
        name: format!("good-{id}"),
        description: None,
        priority: 1,
        removed: false,
        created_at: Utc::now(),
    }
}

/// Creates goods directly in the store, bypassing any cache.
pub async fn seed(store: &InMemoryGoodStore, group_id: GroupId, names: &[&str]) -> Vec<Good> {
    let mut context = TxContext::detached();
    let mut goods = Vec::with_capacity(names.len());
    for name in names {
        goods.push(
            store
                .create(&mut context, &NewGood::new(group_id, *name))
                .await
                .unwrap(),
        );
    }
    goods
}

/// Active goods of a group as `(name, priority)`, ordered by priority.
pub async fn ordering_of(store: &InMemoryGoodStore, group_id: GroupId) -> Vec<(String, i32)> {
    let goods = store
        .list(&mut TxContext::detached(), Pagination::new(1000, 0).unwrap())
        .await
        .unwrap();
    let mut active: Vec<(String, i32)> = goods
        .into_iter()
        .filter(|good| good.group_id == group_id && !good.removed)
        .map(|good| (good.name, good.priority))
        .collect();
    active.sort_by_key(|(_, priority)| *priority);
    active
}

// =============================================================================
// Counting Store
// =============================================================================

/// Store wrapper counting reads that reach the underlying store.
pub struct CountingStore<S> {
    inner: Arc<S>,
    gets: AtomicUsize,
    lists: AtomicUsize,
}

impl<S> CountingStore<S> {
    pub fn new(inner: Arc<S>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: GoodStore> GoodStore for CountingStore<S> {
    type Transaction = S::Transaction;

    async fn create(
        &self,
        context: &mut TxContext<S::Transaction>,
        good: &NewGood,
    ) -> Result<Good, RepositoryError> {
        self.inner.create(context, good).await
    }

    async fn get(
        &self,
        context: &mut TxContext<S::Transaction>,
        id: GoodId,
    ) -> Result<Good, RepositoryError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(context, id).await
    }

    async fn update(
        &self,
        context: &mut TxContext<S::Transaction>,
        changes: &GoodChanges,
    ) -> Result<Good, RepositoryError> {
        self.inner.update(context, changes).await
    }

    async fn soft_delete(
        &self,
        context: &mut TxContext<S::Transaction>,
        group_id: GroupId,
        id: GoodId,
    ) -> Result<Removal, RepositoryError> {
        self.inner.soft_delete(context, group_id, id).await
    }

    async fn list(
        &self,
        context: &mut TxContext<S::Transaction>,
        pagination: Pagination,
    ) -> Result<Vec<Good>, RepositoryError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.inner.list(context, pagination).await
    }

    async fn reprioritize(
        &self,
        context: &mut TxContext<S::Transaction>,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, RepositoryError> {
        self.inner
            .reprioritize(context, group_id, id, new_priority)
            .await
    }

    async fn after_commit(&self, refreshes: Vec<DeferredRefresh>) {
        self.inner.after_commit(refreshes).await;
    }
}

// =============================================================================
// Flaky Cache
// =============================================================================

/// In-memory cache whose operations can be switched to fail.
#[derive(Default)]
pub struct FlakyCache {
    inner: InMemoryCache,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_remove: AtomicBool,
}

impl FlakyCache {
    pub fn fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Reads the raw entry, bypassing failure switches.
    pub async fn peek(&self, key: &str) -> Option<String> {
        self.inner.peek(key).await
    }

    pub async fn peek_good(&self, key: &str) -> Option<Good> {
        self.peek(key)
            .await
            .map(|payload| serde_json::from_str(&payload).unwrap())
    }

    fn refused() -> CacheError {
        CacheError::Connection("connection refused".to_string())
    }
}

#[async_trait]
impl Cache for FlakyCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Self::refused());
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(Self::refused());
        }
        self.inner.set(key, value, ttl).await
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Self::refused());
        }
        self.inner.remove(key).await
    }
}

// =============================================================================
// Publishers
// =============================================================================

/// Publisher remembering every accepted event.
#[derive(Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Good>>,
}

impl RecordingPublisher {
    pub async fn events(&self) -> Vec<Good> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn send(&self, good: &Good) -> Result<(), PublishError> {
        self.events.lock().await.push(good.clone());
        Ok(())
    }
}

/// Publisher whose channel is always down.
#[derive(Default)]
pub struct FailingPublisher {
    attempts: AtomicUsize,
}

impl FailingPublisher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn send(&self, _good: &Good) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Channel("broker unreachable".to_string()))
    }
}

/// Publisher that takes `delay` to accept an event.
pub struct StalledPublisher {
    pub delay: Duration,
}

#[async_trait]
impl EventPublisher for StalledPublisher {
    async fn send(&self, _good: &Good) -> Result<(), PublishError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// How a `RecordingSink` answers inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkBehaviour {
    Accept,
    Fail,
    Stall(Duration),
}

/// Sink remembering the size and content of every batch it accepted.
pub struct RecordingSink {
    behaviour: SinkBehaviour,
    batches: Mutex<Vec<Vec<Good>>>,
    calls: AtomicUsize,
}

impl RecordingSink {
    pub fn new(behaviour: SinkBehaviour) -> Self {
        Self {
            behaviour,
            batches: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn accepting() -> Self {
        Self::new(SinkBehaviour::Accept)
    }

    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.lock().await.iter().map(Vec::len).collect()
    }

    pub async fn events(&self) -> Vec<Good> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsSink for RecordingSink {
    async fn insert_batch(&self, goods: &[Good]) -> Result<(), SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            SinkBehaviour::Accept => {
                self.batches.lock().await.push(goods.to_vec());
                Ok(())
            }
            SinkBehaviour::Fail => Err(SinkError::Insert("analytics store down".to_string())),
            SinkBehaviour::Stall(delay) => {
                tokio::time::sleep(delay).await;
                self.batches.lock().await.push(goods.to_vec());
                Ok(())
            }
        }
    }
}

// =============================================================================
// Service Harness
// =============================================================================

pub type TestStore = CacheAsideStore<CountingStore<InMemoryGoodStore>, FlakyCache>;
pub type TestService<P> = GoodService<TestStore, InMemoryGoodStore, P>;

/// A service over in-memory backends, with handles on every collaborator.
pub struct Harness<P> {
    pub service: TestService<P>,
    pub store: Arc<InMemoryGoodStore>,
    pub counting: Arc<CountingStore<InMemoryGoodStore>>,
    pub cache: Arc<FlakyCache>,
    pub publisher: Arc<P>,
}

pub fn harness<P: EventPublisher>(publisher: P, config: ServiceConfig) -> Harness<P> {
    let store = Arc::new(InMemoryGoodStore::new());
    let counting = Arc::new(CountingStore::new(Arc::clone(&store)));
    let cache = Arc::new(FlakyCache::default());
    let publisher = Arc::new(publisher);

    let service = GoodService::new(
        Arc::new(CacheAsideStore::new(Arc::clone(&counting), Arc::clone(&cache))),
        Arc::clone(&store),
        Arc::clone(&publisher),
        config,
    );

    Harness {
        service,
        store,
        counting,
        cache,
        publisher,
    }
}

pub fn recording_harness() -> Harness<RecordingPublisher> {
    harness(RecordingPublisher::default(), ServiceConfig::default())
}
