//! Ambient transaction plumbing.
//!
//! A [`TxContext`] is the request-scoped value every store call receives. It
//! carries the active transaction, if any, so that several store calls can be
//! composed atomically without each method managing its own transaction.
//! It also collects cache refreshes that must not become visible before the
//! transaction commits.
//!
//! A context is owned by the request that began it and is never shared
//! between tasks. Dropping an uncommitted context rolls the transaction back.

use async_trait::async_trait;

use crate::domain::{Good, PriorityChange};
use crate::infrastructure::RepositoryError;

// =============================================================================
// Deferred cache refreshes
// =============================================================================

/// Cache work that describes committed state and therefore runs after commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredRefresh {
    /// Write the full entity to the cache.
    Populate(Good),
    /// Patch priorities of entries already present in the cache.
    Priorities(Vec<PriorityChange>),
}

// =============================================================================
// Transaction handle
// =============================================================================

/// A live transaction that can be finished explicitly.
#[async_trait]
pub trait TransactionHandle: Send + 'static {
    /// Makes every write of the transaction durable.
    async fn commit(self) -> Result<(), RepositoryError>;

    /// Discards every write of the transaction.
    async fn rollback(self) -> Result<(), RepositoryError>;
}

// =============================================================================
// TxContext
// =============================================================================

/// Request-scoped carrier of an optional transaction.
#[derive(Debug)]
pub struct TxContext<T> {
    transaction: Option<T>,
    deferred: Vec<DeferredRefresh>,
}

impl<T> TxContext<T> {
    /// A context with no ambient transaction: store calls run directly.
    #[must_use]
    pub const fn detached() -> Self {
        Self {
            transaction: None,
            deferred: Vec::new(),
        }
    }

    /// A context bound to an already-begun transaction.
    #[must_use]
    pub const fn with_transaction(transaction: T) -> Self {
        Self {
            transaction: Some(transaction),
            deferred: Vec::new(),
        }
    }

    #[must_use]
    pub const fn is_transactional(&self) -> bool {
        self.transaction.is_some()
    }

    pub const fn transaction_mut(&mut self) -> Option<&mut T> {
        self.transaction.as_mut()
    }

    /// Queues cache work until the enclosing transaction commits.
    pub fn defer(&mut self, refresh: DeferredRefresh) {
        self.deferred.push(refresh);
    }

    #[must_use]
    pub fn deferred(&self) -> &[DeferredRefresh] {
        &self.deferred
    }
}

impl<T: TransactionHandle> TxContext<T> {
    /// Commits the transaction and hands back the refreshes it deferred.
    ///
    /// # Errors
    ///
    /// Returns the store error if the commit fails; deferred work is discarded.
    pub async fn commit(self) -> Result<Vec<DeferredRefresh>, RepositoryError> {
        if let Some(transaction) = self.transaction {
            transaction.commit().await?;
        }
        Ok(self.deferred)
    }

    /// Rolls the transaction back and discards deferred work.
    ///
    /// # Errors
    ///
    /// Returns the store error if the rollback itself fails.
    pub async fn rollback(self) -> Result<(), RepositoryError> {
        match self.transaction {
            Some(transaction) => transaction.rollback().await,
            None => Ok(()),
        }
    }
}

impl<T> Default for TxContext<T> {
    fn default() -> Self {
        Self::detached()
    }
}

// =============================================================================
// Transactor
// =============================================================================

/// Begins transactions against a relational store.
#[async_trait]
pub trait Transactor: Send + Sync {
    type Transaction: TransactionHandle;

    /// Opens a new transaction wrapped in a fresh context.
    async fn begin(&self) -> Result<TxContext<Self::Transaction>, RepositoryError>;
}
