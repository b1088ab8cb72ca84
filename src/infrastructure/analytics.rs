//! Analytical sink for the audit pipeline.
//!
//! The sink receives batches of observed goods and appends them to an
//! append-only log table with a single multi-row insert. It is not a source
//! of truth: callers absorb its failures.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;

use crate::domain::Good;

/// Errors raised by an analytical sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("analytics insert failed: {0}")]
    Insert(String),
}

impl From<sqlx::Error> for SinkError {
    fn from(error: sqlx::Error) -> Self {
        Self::Insert(error.to_string())
    }
}

/// Accepts batches of goods for analytical storage.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    /// Stores every good of the batch. An empty batch is a no-op.
    async fn insert_batch(&self, goods: &[Good]) -> Result<(), SinkError>;
}

/// Appends batches to the `goods_log` table.
#[derive(Debug, Clone)]
pub struct PgAnalyticsSink {
    pool: PgPool,
}

impl PgAnalyticsSink {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn batch_insert(goods: &[Good]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(
        "INSERT INTO goods_log (good_id, group_id, name, description, priority, removed, created_at) ",
    );
    builder.push_values(goods, |mut row, good| {
        row.push_bind(good.id.get())
            .push_bind(good.group_id.get())
            .push_bind(&good.name)
            .push_bind(good.description.as_deref())
            .push_bind(good.priority)
            .push_bind(good.removed)
            .push_bind(good.created_at);
    });
    builder
}

#[async_trait]
impl AnalyticsSink for PgAnalyticsSink {
    async fn insert_batch(&self, goods: &[Good]) -> Result<(), SinkError> {
        if goods.is_empty() {
            return Ok(());
        }
        batch_insert(goods).build().execute(&self.pool).await?;
        Ok(())
    }
}
