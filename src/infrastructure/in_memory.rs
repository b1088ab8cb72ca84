//! In-memory store and cache implementations.
//!
//! These implementations back the test suite and local runs without Postgres
//! or Redis. They follow the same contracts as the real backends:
//!
//! - `InMemoryGoodStore` serializes transactions on a single lock and restores
//!   a snapshot on rollback (including when an uncommitted transaction is dropped).
//!   Outside a transaction, a reorder reads and writes in two steps, and a
//!   per-group lock keeps other writers of the group out between them.
//! - `InMemoryCache` honours TTLs using tokio's clock, so paused-time tests can
//!   exercise expiry.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;

use crate::domain::ordering::{clamp_target, compacted_priority, shifted_priority, window_start};
use crate::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, PriorityChange, Removal, Reordering,
};
use crate::infrastructure::{
    Cache, CacheError, GoodStore, RepositoryError, TransactionHandle, Transactor, TxContext,
};

// =============================================================================
// Good table
// =============================================================================

#[derive(Debug, Clone, Default)]
struct GoodTable {
    rows: BTreeMap<GoodId, Good>,
    last_id: i64,
}

impl GoodTable {
    fn active_in(&self, group_id: GroupId) -> impl Iterator<Item = &Good> {
        self.rows
            .values()
            .filter(move |good| good.group_id == group_id && good.is_active())
    }

    fn active_mut_in(&mut self, group_id: GroupId) -> impl Iterator<Item = &mut Good> {
        self.rows
            .values_mut()
            .filter(move |good| good.group_id == group_id && good.is_active())
    }

    fn active(&self, group_id: GroupId, id: GoodId) -> Result<&Good, RepositoryError> {
        self.rows
            .get(&id)
            .filter(|good| good.group_id == group_id && good.is_active())
            .ok_or(RepositoryError::NotFound(id))
    }

    fn insert(&mut self, draft: &NewGood) -> Good {
        let priority = self
            .active_in(draft.group_id)
            .map(|good| good.priority)
            .max()
            .unwrap_or(0)
            + 1;
        self.last_id += 1;
        let good = Good {
            id: GoodId::new(self.last_id),
            group_id: draft.group_id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            priority,
            removed: false,
            created_at: Utc::now(),
        };
        self.rows.insert(good.id, good.clone());
        good
    }

    fn update(&mut self, changes: &GoodChanges) -> Result<Good, RepositoryError> {
        let good = self
            .rows
            .get_mut(&changes.id)
            .filter(|good| good.group_id == changes.group_id && good.is_active())
            .ok_or(RepositoryError::NotFound(changes.id))?;
        good.name.clone_from(&changes.name);
        if let Some(description) = &changes.description {
            good.description = Some(description.clone());
        }
        Ok(good.clone())
    }

    fn soft_delete(&mut self, group_id: GroupId, id: GoodId) -> Result<Removal, RepositoryError> {
        let removed_at = self.active(group_id, id)?.priority;

        let mut shifted = Vec::new();
        for good in self.active_mut_in(group_id) {
            if good.id == id {
                good.removed = true;
                continue;
            }
            let priority = compacted_priority(good.priority, removed_at);
            if priority != good.priority {
                good.priority = priority;
                shifted.push(PriorityChange::new(good.id, priority));
            }
        }
        shifted.sort_by_key(|change| change.priority);

        let good = self.rows[&id].clone();
        Ok(Removal { good, shifted })
    }

    fn reprioritize(
        &mut self,
        group_id: GroupId,
        id: GoodId,
        requested: i32,
    ) -> Result<Reordering, RepositoryError> {
        let plan = self.plan_reorder(group_id, id, requested)?;
        Ok(self.apply_reorder(&plan))
    }

    /// Read step of a reorder.
    fn plan_reorder(
        &self,
        group_id: GroupId,
        id: GoodId,
        requested: i32,
    ) -> Result<ReorderPlan, RepositoryError> {
        let from = self.active(group_id, id)?.priority;
        let to = clamp_target(requested, self.active_in(group_id).count());
        Ok(ReorderPlan {
            group_id,
            id,
            from,
            to,
        })
    }

    /// Write step of a reorder. Trusts `plan` to still describe the table.
    fn apply_reorder(&mut self, plan: &ReorderPlan) -> Reordering {
        let ReorderPlan {
            group_id,
            id,
            from,
            to,
        } = *plan;

        let mut shifted = Vec::new();
        for good in self.active_mut_in(group_id) {
            if good.id == id {
                good.priority = to;
                continue;
            }
            let original = good.priority;
            good.priority = shifted_priority(original, from, to);
            if original >= window_start(from, to) {
                shifted.push(PriorityChange::new(good.id, good.priority));
            }
        }
        shifted.sort_by_key(|change| change.priority);

        Reordering {
            id,
            priority: to,
            shifted,
        }
    }

    fn list(&self, pagination: Pagination) -> Vec<Good> {
        let offset = usize::try_from(pagination.offset()).unwrap_or(usize::MAX);
        self.rows
            .values()
            .skip(offset)
            .take(pagination.limit() as usize)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
struct ReorderPlan {
    group_id: GroupId,
    id: GoodId,
    from: i32,
    to: i32,
}

// =============================================================================
// In-Memory Transaction
// =============================================================================

/// Exclusive handle on the in-memory table for the duration of a transaction.
///
/// Holding the table lock serializes transactions. Until committed, the
/// snapshot taken at `begin` is restored when the handle is rolled back or
/// dropped.
#[derive(Debug)]
pub struct InMemoryTransaction {
    table: OwnedMutexGuard<GoodTable>,
    snapshot: Option<GoodTable>,
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.table = snapshot;
        }
    }
}

#[async_trait]
impl TransactionHandle for InMemoryTransaction {
    async fn commit(mut self) -> Result<(), RepositoryError> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        // Drop restores the snapshot.
        Ok(())
    }
}

// =============================================================================
// In-Memory Good Store
// =============================================================================

/// In-memory implementation of `GoodStore` and `Transactor`.
#[derive(Debug, Clone)]
pub struct InMemoryGoodStore {
    table: Arc<Mutex<GoodTable>>,
    group_locks: Arc<Mutex<HashMap<GroupId, Arc<Mutex<()>>>>>,
    lock_groups: bool,
}

impl Default for InMemoryGoodStore {
    fn default() -> Self {
        Self {
            table: Arc::default(),
            group_locks: Arc::default(),
            lock_groups: true,
        }
    }
}

impl InMemoryGoodStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose detached writers skip the per-group lock, so concurrent
    /// reorders of one group can interleave between their read and write
    /// steps and lose updates.
    #[must_use]
    pub fn without_group_locks() -> Self {
        Self {
            lock_groups: false,
            ..Self::default()
        }
    }

    /// Takes the group lock for a detached write. A transaction already owns
    /// the whole table, so it needs none.
    async fn lock_group(
        &self,
        context: &TxContext<InMemoryTransaction>,
        group_id: GroupId,
    ) -> Option<OwnedMutexGuard<()>> {
        if !self.lock_groups || context.is_transactional() {
            return None;
        }
        let lock = Arc::clone(self.group_locks.lock().await.entry(group_id).or_default());
        Some(lock.lock_owned().await)
    }

    /// Runs `operation` on the transaction's table, or under the lock when
    /// the context is detached.
    ///
    /// Calling with a detached context while a transaction on the same store
    /// is open from the same task deadlocks, as it would on a single-connection
    /// database.
    async fn with_table<R, F>(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        operation: F,
    ) -> Result<R, RepositoryError>
    where
        F: FnOnce(&mut GoodTable) -> Result<R, RepositoryError> + Send,
    {
        if let Some(transaction) = context.transaction_mut() {
            return operation(&mut *transaction.table);
        }
        let mut table = self.table.lock().await;
        operation(&mut *table)
    }

    /// Number of stored goods, removed ones included.
    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl Transactor for InMemoryGoodStore {
    type Transaction = InMemoryTransaction;

    async fn begin(&self) -> Result<TxContext<InMemoryTransaction>, RepositoryError> {
        let table = Arc::clone(&self.table).lock_owned().await;
        let snapshot = Some(table.clone());
        Ok(TxContext::with_transaction(InMemoryTransaction { table, snapshot }))
    }
}

#[async_trait]
impl GoodStore for InMemoryGoodStore {
    type Transaction = InMemoryTransaction;

    async fn create(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        good: &NewGood,
    ) -> Result<Good, RepositoryError> {
        let _group = self.lock_group(context, good.group_id).await;
        self.with_table(context, |table| Ok(table.insert(good))).await
    }

    async fn get(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        id: GoodId,
    ) -> Result<Good, RepositoryError> {
        self.with_table(context, |table| {
            table
                .rows
                .get(&id)
                .cloned()
                .ok_or(RepositoryError::NotFound(id))
        })
        .await
    }

    async fn update(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        changes: &GoodChanges,
    ) -> Result<Good, RepositoryError> {
        self.with_table(context, |table| table.update(changes)).await
    }

    async fn soft_delete(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        group_id: GroupId,
        id: GoodId,
    ) -> Result<Removal, RepositoryError> {
        let _group = self.lock_group(context, group_id).await;
        self.with_table(context, |table| table.soft_delete(group_id, id)).await
    }

    async fn list(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        pagination: Pagination,
    ) -> Result<Vec<Good>, RepositoryError> {
        self.with_table(context, |table| Ok(table.list(pagination))).await
    }

    async fn reprioritize(
        &self,
        context: &mut TxContext<InMemoryTransaction>,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return transaction.table.reprioritize(group_id, id, new_priority);
        }

        let _group = self.lock_group(context, group_id).await;
        let plan = self
            .table
            .lock()
            .await
            .plan_reorder(group_id, id, new_priority)?;
        // Other tasks run here; without the group lock they may reorder too.
        tokio::task::yield_now().await;
        Ok(self.table.lock().await.apply_reorder(&plan))
    }
}

// =============================================================================
// In-Memory Cache
// =============================================================================

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory implementation of `Cache` with per-entry expiry.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl InMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks at `key` again under the write lock and drops it only if it is
    /// still expired. A `set` may have replaced it since the read.
    async fn fresh_or_evict(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Returns the raw cached value without touching expiry bookkeeping.
    pub async fn peek(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        Ok(self.fresh_or_evict(key).await)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
