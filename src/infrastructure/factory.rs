//! Wiring of the production backends.
//!
//! The factory turns an [`AppConfig`] into connected components: the goods
//! service over Postgres, Redis cache and Redis pub/sub, and the pieces of
//! the audit worker.
//!
//! # Example
//!
//! ```ignore
//! let factory = ServiceFactory::from_env()?;
//! let service = factory.create_service().await?;
//! let good = service.create(&NewGood::new(GroupId::new(1), "Widget")).await?;
//! ```

use std::sync::Arc;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::application::GoodService;
use crate::infrastructure::{
    AppConfig, CacheAsideStore, ConfigError, PgAnalyticsSink, PgGoodStore, PgTransactor,
    RedisCache, RedisEventPublisher, RedisEventSubscriber, create_redis_pool, run_migrations,
};

/// Store stack used in production: cache-aside over Postgres.
pub type PostgresGoodStore = CacheAsideStore<PgGoodStore, RedisCache>;

/// Service stack used in production.
pub type PostgresGoodService = GoodService<PostgresGoodStore, PgTransactor, RedisEventPublisher>;

/// Errors that can occur during factory initialization.
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Database connection error: {0}")]
    DatabaseConnection(String),

    #[error("Database migration error: {0}")]
    Migration(String),

    #[error("Redis connection error: {0}")]
    RedisConnection(String),
}

/// Connects a Postgres pool.
///
/// # Errors
///
/// Returns `FactoryError::DatabaseConnection` if the pool cannot connect.
pub async fn connect_postgres(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, FactoryError> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect(database_url)
        .await
        .map_err(|error| FactoryError::DatabaseConnection(error.to_string()))
}

/// Builds connected components from configuration.
#[derive(Debug, Clone)]
pub struct ServiceFactory {
    config: AppConfig,
}

impl ServiceFactory {
    #[must_use]
    pub const fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// # Errors
    ///
    /// Returns `FactoryError::Configuration` if environment configuration is invalid.
    pub fn from_env() -> Result<Self, FactoryError> {
        Ok(Self::new(AppConfig::from_env()?))
    }

    #[must_use]
    pub const fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Connects Postgres and Redis, applies migrations and assembles the service.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError` if a backend cannot be reached or a migration fails.
    pub async fn create_service(&self) -> Result<PostgresGoodService, FactoryError> {
        let pool =
            connect_postgres(&self.config.database_url, self.config.database_max_connections)
                .await?;
        run_migrations(&pool)
            .await
            .map_err(|error| FactoryError::Migration(error.to_string()))?;

        let redis_pool = create_redis_pool(&self.config.redis_url)
            .map_err(|error| FactoryError::RedisConnection(error.to_string()))?;

        let store = CacheAsideStore::new(
            Arc::new(PgGoodStore::new(pool.clone())),
            Arc::new(RedisCache::new(redis_pool.clone())),
        )
        .with_ttl(self.config.cache_ttl);
        let publisher = RedisEventPublisher::new(redis_pool, self.config.event_topic.clone());

        tracing::info!(
            publish_policy = %self.config.publish_policy,
            cache_ttl_secs = self.config.cache_ttl.as_secs(),
            "Goods service ready"
        );

        Ok(GoodService::new(
            Arc::new(store),
            Arc::new(PgTransactor::new(pool)),
            Arc::new(publisher),
            self.config.service_config(),
        ))
    }

    /// Connects the analytics database and applies migrations.
    ///
    /// # Errors
    ///
    /// Returns `FactoryError` if the database cannot be reached or a migration fails.
    pub async fn create_analytics_sink(&self) -> Result<PgAnalyticsSink, FactoryError> {
        let pool = connect_postgres(
            &self.config.analytics_database_url,
            self.config.database_max_connections,
        )
        .await?;
        run_migrations(&pool)
            .await
            .map_err(|error| FactoryError::Migration(error.to_string()))?;
        Ok(PgAnalyticsSink::new(pool))
    }

    /// # Errors
    ///
    /// Returns `FactoryError::RedisConnection` if the Redis URL is invalid.
    pub fn create_subscriber(&self) -> Result<RedisEventSubscriber, FactoryError> {
        RedisEventSubscriber::new(&self.config.redis_url, self.config.event_topic.clone())
            .map_err(|error| FactoryError::RedisConnection(error.to_string()))
    }
}
