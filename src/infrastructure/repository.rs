//! Store contract for goods.
//!
//! [`GoodStore`] is implemented by the relational store itself
//! ([`PgGoodStore`](super::PgGoodStore), [`InMemoryGoodStore`](super::InMemoryGoodStore))
//! and by the cache-aside decorator ([`CacheAsideStore`](super::CacheAsideStore)),
//! which makes the decorator a drop-in substitute wherever a store is expected.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, Removal, Reordering,
};
use crate::infrastructure::{DeferredRefresh, TransactionHandle, TxContext};

// =============================================================================
// Repository Error
// =============================================================================

/// Errors that can occur during store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// No good matches the id (or it is outside the mutable, active set).
    #[error("Good not found: {0}")]
    NotFound(GoodId),

    /// Relational store failure (connectivity, constraint, serialization conflict).
    #[error("Database error: {0}")]
    Database(String),

    /// Cache failure other than a miss.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RepositoryError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(error: sqlx::Error) -> Self {
        Self::Database(error.to_string())
    }
}

// =============================================================================
// Good Store
// =============================================================================

/// CRUD and reordering over goods.
///
/// Every method takes the caller's [`TxContext`]: when it carries a
/// transaction the call joins it, otherwise the call runs directly against
/// the store.
///
/// Mutations of an existing good are scoped to the group that owns it. A
/// good that exists but belongs to another group is `NotFound`.
#[async_trait]
pub trait GoodStore: Send + Sync {
    type Transaction: TransactionHandle;

    /// Inserts a good at the end of its group's ordering.
    async fn create(
        &self,
        context: &mut TxContext<Self::Transaction>,
        good: &NewGood,
    ) -> Result<Good, RepositoryError>;

    /// Returns `RepositoryError::NotFound` when no row matches.
    async fn get(
        &self,
        context: &mut TxContext<Self::Transaction>,
        id: GoodId,
    ) -> Result<Good, RepositoryError>;

    /// Rewrites the name of an active good in `changes.group_id`, and its
    /// description when one is given.
    async fn update(
        &self,
        context: &mut TxContext<Self::Transaction>,
        changes: &GoodChanges,
    ) -> Result<Good, RepositoryError>;

    /// Flags an active good as removed and compacts the priorities above it.
    async fn soft_delete(
        &self,
        context: &mut TxContext<Self::Transaction>,
        group_id: GroupId,
        id: GoodId,
    ) -> Result<Removal, RepositoryError>;

    /// Lists goods, removed ones included, ordered by id.
    async fn list(
        &self,
        context: &mut TxContext<Self::Transaction>,
        pagination: Pagination,
    ) -> Result<Vec<Good>, RepositoryError>;

    /// Moves an active good to `new_priority` within its group.
    async fn reprioritize(
        &self,
        context: &mut TxContext<Self::Transaction>,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, RepositoryError>;

    /// Called by the transaction owner once the transaction has committed,
    /// with the refreshes deferred during it. Stores without a cache ignore it.
    async fn after_commit(&self, refreshes: Vec<DeferredRefresh>) {
        let _ = refreshes;
    }
}
