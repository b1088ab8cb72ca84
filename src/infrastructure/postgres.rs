//! `PostgreSQL` store implementation.
//!
//! This module provides the relational `GoodStore` backed by `sqlx::PgPool`.
//!
//! # Features
//!
//! - Joins the caller's ambient transaction when the `TxContext` carries one
//! - Opens a local transaction for multi-statement operations otherwise
//! - Serializes writers of one group with `pg_advisory_xact_lock(group_id)`
//!   on top of READ COMMITTED, so overlapping reorders never lose an update
//! - Scopes every mutation of an existing good to its owning group
//!
//! # Table Structure
//!
//! ```sql
//! CREATE TABLE goods (
//!     id BIGSERIAL PRIMARY KEY,
//!     group_id BIGINT NOT NULL,
//!     name TEXT NOT NULL,
//!     description TEXT,
//!     priority INTEGER NOT NULL,
//!     removed BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::domain::ordering::{clamp_target, window_start};
use crate::domain::{
    Good, GoodChanges, GoodId, GroupId, NewGood, Pagination, PriorityChange, Removal, Reordering,
};
use crate::infrastructure::{GoodStore, RepositoryError, TransactionHandle, Transactor, TxContext};

/// Transaction type used by the Postgres store.
pub type PgTransaction = Transaction<'static, Postgres>;

// =============================================================================
// Row mapping
// =============================================================================

#[derive(Debug, sqlx::FromRow)]
struct GoodRow {
    id: i64,
    group_id: i64,
    name: String,
    description: Option<String>,
    priority: i32,
    removed: bool,
    created_at: DateTime<Utc>,
}

impl From<GoodRow> for Good {
    fn from(row: GoodRow) -> Self {
        Self {
            id: GoodId::new(row.id),
            group_id: GroupId::new(row.group_id),
            name: row.name,
            description: row.description,
            priority: row.priority,
            removed: row.removed,
            created_at: row.created_at,
        }
    }
}

fn priority_changes(rows: Vec<(i64, i32)>) -> Vec<PriorityChange> {
    let mut changes: Vec<PriorityChange> = rows
        .into_iter()
        .map(|(id, priority)| PriorityChange::new(GoodId::new(id), priority))
        .collect();
    changes.sort_by_key(|change| change.priority);
    changes
}

// =============================================================================
// Transactions
// =============================================================================

#[async_trait]
impl TransactionHandle for PgTransaction {
    async fn commit(self) -> Result<(), RepositoryError> {
        Transaction::commit(self).await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), RepositoryError> {
        Transaction::rollback(self).await?;
        Ok(())
    }
}

/// Begins READ COMMITTED transactions on a shared pool.
#[derive(Debug, Clone)]
pub struct PgTransactor {
    pool: PgPool,
}

impl PgTransactor {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Transactor for PgTransactor {
    type Transaction = PgTransaction;

    async fn begin(&self) -> Result<TxContext<PgTransaction>, RepositoryError> {
        let mut transaction = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *transaction)
            .await?;
        Ok(TxContext::with_transaction(transaction))
    }
}

// =============================================================================
// Statements
// =============================================================================

async fn lock_group(
    connection: &mut PgConnection,
    group_id: GroupId,
) -> Result<(), RepositoryError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(group_id.get())
        .execute(connection)
        .await?;
    Ok(())
}

async fn insert_good(
    connection: &mut PgConnection,
    good: &NewGood,
) -> Result<Good, RepositoryError> {
    lock_group(connection, good.group_id).await?;
    let row: GoodRow = sqlx::query_as(
        r"
        INSERT INTO goods (group_id, name, description, priority)
        SELECT $1, $2, $3, COALESCE(MAX(priority), 0) + 1
        FROM goods
        WHERE group_id = $1 AND NOT removed
        RETURNING id, group_id, name, description, priority, removed, created_at
        ",
    )
    .bind(good.group_id.get())
    .bind(&good.name)
    .bind(good.description.as_deref())
    .fetch_one(connection)
    .await?;
    Ok(row.into())
}

async fn select_good(connection: &mut PgConnection, id: GoodId) -> Result<Good, RepositoryError> {
    let row: Option<GoodRow> = sqlx::query_as(
        r"
        SELECT id, group_id, name, description, priority, removed, created_at
        FROM goods WHERE id = $1
        ",
    )
    .bind(id.get())
    .fetch_optional(connection)
    .await?;
    row.map(Good::from).ok_or(RepositoryError::NotFound(id))
}

async fn update_good(
    connection: &mut PgConnection,
    changes: &GoodChanges,
) -> Result<Good, RepositoryError> {
    let row: Option<GoodRow> = sqlx::query_as(
        r"
        UPDATE goods SET name = $3, description = COALESCE($4, description)
        WHERE id = $1 AND group_id = $2 AND NOT removed
        RETURNING id, group_id, name, description, priority, removed, created_at
        ",
    )
    .bind(changes.id.get())
    .bind(changes.group_id.get())
    .bind(&changes.name)
    .bind(changes.description.as_deref())
    .fetch_optional(connection)
    .await?;
    row.map(Good::from).ok_or(RepositoryError::NotFound(changes.id))
}

async fn remove_good(
    connection: &mut PgConnection,
    group_id: GroupId,
    id: GoodId,
) -> Result<Removal, RepositoryError> {
    lock_group(connection, group_id).await?;

    let row: Option<GoodRow> = sqlx::query_as(
        r"
        UPDATE goods SET removed = TRUE
        WHERE id = $1 AND group_id = $2 AND NOT removed
        RETURNING id, group_id, name, description, priority, removed, created_at
        ",
    )
    .bind(id.get())
    .bind(group_id.get())
    .fetch_optional(&mut *connection)
    .await?;
    let good = row.map(Good::from).ok_or(RepositoryError::NotFound(id))?;

    let rows: Vec<(i64, i32)> = sqlx::query_as(
        r"
        UPDATE goods SET priority = priority - 1
        WHERE group_id = $1 AND NOT removed AND priority > $2
        RETURNING id, priority
        ",
    )
    .bind(group_id.get())
    .bind(good.priority)
    .fetch_all(connection)
    .await?;

    Ok(Removal {
        good,
        shifted: priority_changes(rows),
    })
}

async fn reorder_good(
    connection: &mut PgConnection,
    group_id: GroupId,
    id: GoodId,
    requested: i32,
) -> Result<Reordering, RepositoryError> {
    lock_group(connection, group_id).await?;

    let current: Option<(i32,)> = sqlx::query_as(
        "SELECT priority FROM goods WHERE id = $1 AND group_id = $2 AND NOT removed",
    )
    .bind(id.get())
    .bind(group_id.get())
    .fetch_optional(&mut *connection)
    .await?;
    let (from,) = current.ok_or(RepositoryError::NotFound(id))?;

    let (active,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM goods WHERE group_id = $1 AND NOT removed")
            .bind(group_id.get())
            .fetch_one(&mut *connection)
            .await?;
    let to = clamp_target(requested, usize::try_from(active).unwrap_or(0));

    if to < from {
        sqlx::query(
            r"
            UPDATE goods SET priority = priority + 1
            WHERE group_id = $1 AND NOT removed AND id <> $2
              AND priority >= $3 AND priority < $4
            ",
        )
        .bind(group_id.get())
        .bind(id.get())
        .bind(to)
        .bind(from)
        .execute(&mut *connection)
        .await?;
    } else if to > from {
        sqlx::query(
            r"
            UPDATE goods SET priority = priority - 1
            WHERE group_id = $1 AND NOT removed AND id <> $2
              AND priority > $3 AND priority <= $4
            ",
        )
        .bind(group_id.get())
        .bind(id.get())
        .bind(from)
        .bind(to)
        .execute(&mut *connection)
        .await?;
    }

    sqlx::query("UPDATE goods SET priority = $2 WHERE id = $1")
        .bind(id.get())
        .bind(to)
        .execute(&mut *connection)
        .await?;

    let rows: Vec<(i64, i32)> = sqlx::query_as(
        r"
        SELECT id, priority FROM goods
        WHERE group_id = $1 AND NOT removed AND id <> $2 AND priority >= $3
        ORDER BY priority
        ",
    )
    .bind(group_id.get())
    .bind(id.get())
    .bind(window_start(from, to))
    .fetch_all(connection)
    .await?;

    Ok(Reordering {
        id,
        priority: to,
        shifted: priority_changes(rows),
    })
}

async fn select_page(
    connection: &mut PgConnection,
    pagination: Pagination,
) -> Result<Vec<Good>, RepositoryError> {
    let rows: Vec<GoodRow> = sqlx::query_as(
        r"
        SELECT id, group_id, name, description, priority, removed, created_at
        FROM goods ORDER BY id LIMIT $1 OFFSET $2
        ",
    )
    .bind(i64::from(pagination.limit()))
    .bind(i64::try_from(pagination.offset()).unwrap_or(i64::MAX))
    .fetch_all(connection)
    .await?;
    Ok(rows.into_iter().map(Good::from).collect())
}

// =============================================================================
// PostgreSQL Good Store
// =============================================================================

/// `PostgreSQL` implementation of `GoodStore`.
///
/// Single-statement operations run on a pooled connection when no ambient
/// transaction is present. `create`, `soft_delete` and `reprioritize` take
/// the group lock, so they always run in a transaction: the caller's, or a
/// local one committed before returning.
#[derive(Debug, Clone)]
pub struct PgGoodStore {
    pool: PgPool,
}

impl PgGoodStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl GoodStore for PgGoodStore {
    type Transaction = PgTransaction;

    async fn create(
        &self,
        context: &mut TxContext<PgTransaction>,
        good: &NewGood,
    ) -> Result<Good, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return insert_good(transaction, good).await;
        }
        let mut transaction = self.pool.begin().await?;
        let created = insert_good(&mut transaction, good).await?;
        transaction.commit().await?;
        Ok(created)
    }

    async fn get(
        &self,
        context: &mut TxContext<PgTransaction>,
        id: GoodId,
    ) -> Result<Good, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return select_good(transaction, id).await;
        }
        let mut connection = self.pool.acquire().await?;
        select_good(&mut connection, id).await
    }

    async fn update(
        &self,
        context: &mut TxContext<PgTransaction>,
        changes: &GoodChanges,
    ) -> Result<Good, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return update_good(transaction, changes).await;
        }
        let mut connection = self.pool.acquire().await?;
        update_good(&mut connection, changes).await
    }

    async fn soft_delete(
        &self,
        context: &mut TxContext<PgTransaction>,
        group_id: GroupId,
        id: GoodId,
    ) -> Result<Removal, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return remove_good(transaction, group_id, id).await;
        }
        let mut transaction = self.pool.begin().await?;
        let removal = remove_good(&mut transaction, group_id, id).await?;
        transaction.commit().await?;
        Ok(removal)
    }

    async fn list(
        &self,
        context: &mut TxContext<PgTransaction>,
        pagination: Pagination,
    ) -> Result<Vec<Good>, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return select_page(transaction, pagination).await;
        }
        let mut connection = self.pool.acquire().await?;
        select_page(&mut connection, pagination).await
    }

    async fn reprioritize(
        &self,
        context: &mut TxContext<PgTransaction>,
        group_id: GroupId,
        id: GoodId,
        new_priority: i32,
    ) -> Result<Reordering, RepositoryError> {
        if let Some(transaction) = context.transaction_mut() {
            return reorder_good(transaction, group_id, id, new_priority).await;
        }
        let mut transaction = self.pool.begin().await?;
        let reordering = reorder_good(&mut transaction, group_id, id, new_priority).await?;
        transaction.commit().await?;
        Ok(reordering)
    }
}

/// Applies the SQL migrations under `migrations/`.
///
/// # Errors
///
/// Returns `RepositoryError::Database` if a migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), RepositoryError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|error| RepositoryError::Database(error.to_string()))
}
