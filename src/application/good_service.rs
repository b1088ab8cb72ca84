//! Orchestration of store writes and change events.
//!
//! `GoodService` owns the transaction boundary of every mutating call:
//!
//! - `create`, `update` and `delete` run the store mutation and publish a
//!   change event inside one transaction.
//! - `reprioritize` runs its own transaction around the store call alone and
//!   emits no event.
//! - `get` and `list` run without a transaction.
//!
//! Every call is bounded by [`ServiceConfig::operation_timeout`]. When the
//! deadline passes the in-flight future is dropped, which drops its
//! transaction and rolls it back. The deadline ends at the commit: cache
//! refreshes and after-commit publishing run afterwards with their own
//! timeout, and their failures are logged without failing the call.
//!
//! `update`, `delete` and `reprioritize` name the group the caller expects
//! the good to belong to. A good of another group is reported as
//! [`GoodError::NotFound`].

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, Reordering, ValidationError,
    validate_priority,
};
use crate::infrastructure::{
    DeferredRefresh, EventPublisher, GoodStore, PublishError, RepositoryError, Transactor,
    TxContext,
};

// =============================================================================
// Configuration
// =============================================================================

/// When change events are published relative to the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishPolicy {
    /// Publish before committing; a publish failure rolls the write back.
    /// The audit trail never misses a committed write, but writes depend on
    /// the event channel being reachable.
    #[default]
    WithinTransaction,
    /// Publish after committing; a publish failure or timeout is logged only.
    /// Writes stay available when the channel is down, at the cost of gaps
    /// in the audit trail.
    AfterCommit,
}

impl FromStr for PublishPolicy {
    type Err = String;

    /// Accepts both hyphen and underscore separators.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().replace('_', "-").as_str() {
            "within-transaction" => Ok(Self::WithinTransaction),
            "after-commit" => Ok(Self::AfterCommit),
            _ => Err(format!("unknown publish policy: {value}")),
        }
    }
}

impl std::fmt::Display for PublishPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WithinTransaction => write!(formatter, "within-transaction"),
            Self::AfterCommit => write!(formatter, "after-commit"),
        }
    }
}

/// Runtime knobs of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub operation_timeout: Duration,
    pub publish_policy: PublishPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(5),
            publish_policy: PublishPolicy::default(),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failures reported to callers of the service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GoodError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Good not found: {0}")]
    NotFound(GoodId),

    #[error("Store failure: {0}")]
    Store(String),

    #[error("Cache failure: {0}")]
    Cache(String),

    #[error("Publish failure: {0}")]
    Publish(#[from] PublishError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<RepositoryError> for GoodError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(id) => Self::NotFound(id),
            RepositoryError::Cache(message) => Self::Cache(message),
            RepositoryError::Database(message) | RepositoryError::Serialization(message) => {
                Self::Store(message)
            }
        }
    }
}

// =============================================================================
// Good Service
// =============================================================================

/// Transactional facade over a good store and an event publisher.
pub struct GoodService<S, T, P> {
    store: Arc<S>,
    transactor: Arc<T>,
    publisher: Arc<P>,
    config: ServiceConfig,
}

impl<S, T, P> Clone for GoodService<S, T, P> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            transactor: Arc::clone(&self.transactor),
            publisher: Arc::clone(&self.publisher),
            config: self.config,
        }
    }
}

impl<S, T, P> std::fmt::Debug for GoodService<S, T, P> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("GoodService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, T, P> GoodService<S, T, P>
where
    T: Transactor,
    S: GoodStore<Transaction = T::Transaction>,
    P: EventPublisher,
{
    #[must_use]
    pub const fn new(
        store: Arc<S>,
        transactor: Arc<T>,
        publisher: Arc<P>,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            transactor,
            publisher,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Creates a good at the end of its group and announces it.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank name; otherwise any store, cache or publish
    /// failure, after which nothing was written.
    pub async fn create(&self, good: &NewGood) -> Result<Good, GoodError> {
        good.validate()?;
        let (created, refreshes) = self
            .within_deadline("create", async {
                let mut context = self.transactor.begin().await?;
                let created = self.store.create(&mut context, good).await?;
                let refreshes = self.publish_and_commit(context, &created).await?;
                Ok((created, refreshes))
            })
            .await?;
        tracing::info!(good_id = %created.id, group_id = %created.group_id, "Good created");
        self.after_commit(refreshes, Some(&created)).await;
        Ok(created)
    }

    /// # Errors
    ///
    /// `NotFound` when no good has this id.
    pub async fn get(&self, id: GoodId) -> Result<Good, GoodError> {
        self.within_deadline("get", async {
            let mut context = TxContext::detached();
            Ok(self.store.get(&mut context, id).await?)
        })
        .await
    }

    /// Renames an active good, replaces its description when one is given,
    /// and announces it.
    ///
    /// # Errors
    ///
    /// `Validation` for a blank name, `NotFound` for a missing or removed good
    /// or one outside `changes.group_id`.
    pub async fn update(&self, changes: &GoodChanges) -> Result<Good, GoodError> {
        changes.validate()?;
        let (updated, refreshes) = self
            .within_deadline("update", async {
                let mut context = self.transactor.begin().await?;
                let updated = self.store.update(&mut context, changes).await?;
                let refreshes = self.publish_and_commit(context, &updated).await?;
                Ok((updated, refreshes))
            })
            .await?;
        tracing::info!(good_id = %updated.id, "Good updated");
        self.after_commit(refreshes, Some(&updated)).await;
        Ok(updated)
    }

    /// Soft-deletes a good of `group_id` and announces the removed record.
    ///
    /// # Errors
    ///
    /// `NotFound` for a missing or already removed good, or one of another group.
    pub async fn delete(&self, group_id: GroupId, id: GoodId) -> Result<Good, GoodError> {
        let (removal, refreshes) = self
            .within_deadline("delete", async {
                let mut context = self.transactor.begin().await?;
                let removal = self.store.soft_delete(&mut context, group_id, id).await?;
                let refreshes = self.publish_and_commit(context, &removal.good).await?;
                Ok((removal, refreshes))
            })
            .await?;
        tracing::info!(
            good_id = %id,
            shifted = removal.shifted.len(),
            "Good removed"
        );
        self.after_commit(refreshes, Some(&removal.good)).await;
        Ok(removal.good)
    }

    /// Lists goods ordered by id, removed ones included.
    ///
    /// # Errors
    ///
    /// Any store failure.
    pub async fn list(&self, pagination: Pagination) -> Result<Vec<Good>, GoodError> {
        self.within_deadline("list", async {
            let mut context = TxContext::detached();
            Ok(self.store.list(&mut context, pagination).await?)
        })
        .await
    }

    /// Moves a good to `new_priority` within `group_id`. No event is published.
    ///
    /// # Errors
    ///
    /// `Validation` when `new_priority < 1`, `NotFound` for a missing or
    /// removed good, or one of another group.
    pub async fn reprioritize(
        &self,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, GoodError> {
        let new_priority = validate_priority(new_priority)?;
        let (reordering, refreshes) = self
            .within_deadline("reprioritize", async {
                let mut context = self.transactor.begin().await?;
                let reordering = self
                    .store
                    .reprioritize(&mut context, group_id, id, new_priority)
                    .await?;
                let refreshes = context.commit().await?;
                Ok((reordering, refreshes))
            })
            .await?;
        tracing::info!(
            good_id = %id,
            priority = reordering.priority,
            shifted = reordering.shifted.len(),
            "Good reprioritized"
        );
        self.after_commit(refreshes, None).await;
        Ok(reordering)
    }

    async fn within_deadline<R, F>(
        &self,
        operation: &'static str,
        future: F,
    ) -> Result<R, GoodError>
    where
        F: Future<Output = Result<R, GoodError>>,
    {
        let timeout = self.config.operation_timeout;
        tokio::time::timeout(timeout, future).await.unwrap_or_else(|_| {
            tracing::warn!(operation, timeout_ms = timeout.as_millis(), "Operation timed out");
            Err(GoodError::Timeout(timeout))
        })
    }

    /// Commits `context`, publishing first under `WithinTransaction`.
    /// Returns the cache refreshes deferred during the transaction.
    async fn publish_and_commit(
        &self,
        context: TxContext<T::Transaction>,
        good: &Good,
    ) -> Result<Vec<DeferredRefresh>, GoodError> {
        if self.config.publish_policy == PublishPolicy::WithinTransaction
            && let Err(error) = self.publisher.send(good).await
        {
            tracing::warn!(good_id = %good.id, error = %error, "Publish failed, rolling back");
            if let Err(rollback_error) = context.rollback().await {
                tracing::error!(good_id = %good.id, error = %rollback_error, "Rollback failed");
            }
            return Err(error.into());
        }
        Ok(context.commit().await?)
    }

    /// Runs once the write is committed. Each step gets its own
    /// `operation_timeout`; failures are logged and never reach the caller.
    async fn after_commit(&self, refreshes: Vec<DeferredRefresh>, event: Option<&Good>) {
        let timeout = self.config.operation_timeout;
        if tokio::time::timeout(timeout, self.store.after_commit(refreshes))
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_ms = timeout.as_millis(),
                "Cache refresh after commit timed out"
            );
        }

        let Some(good) = event else {
            return;
        };
        if self.config.publish_policy != PublishPolicy::AfterCommit {
            return;
        }
        match tokio::time::timeout(timeout, self.publisher.send(good)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::warn!(good_id = %good.id, error = %error, "Publish after commit failed");
            }
            Err(_) => {
                tracing::warn!(
                    good_id = %good.id,
                    timeout_ms = timeout.as_millis(),
                    "Publish after commit timed out"
                );
            }
        }
    }
}
