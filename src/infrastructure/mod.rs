//! Infrastructure module for external services.
//!
//! This module contains the relational store, the cache-aside layer, the
//! event channel, the analytical sink and configuration.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod factory;
pub mod in_memory;
pub mod messaging;
pub mod postgres;
pub mod redis;
pub mod repository;
pub mod transactor;

pub use analytics::{AnalyticsSink, PgAnalyticsSink, SinkError};
pub use cache::{Cache, CacheAsideStore, CacheError, DEFAULT_CACHE_TTL, good_cache_key};
pub use config::{AppConfig, ConfigError, LogFormat, MAX_BATCH_SIZE};
pub use factory::{
    FactoryError, PostgresGoodService, PostgresGoodStore, ServiceFactory, connect_postgres,
};
pub use in_memory::{InMemoryCache, InMemoryGoodStore, InMemoryTransaction};
pub use messaging::{EventPublisher, GOOD_EVENTS_TOPIC, PublishError, decode_event, encode_event};
pub use postgres::{PgGoodStore, PgTransaction, PgTransactor, run_migrations};
pub use redis::{RedisCache, RedisEventPublisher, RedisEventSubscriber, create_redis_pool};
pub use repository::{GoodStore, RepositoryError};
pub use transactor::{DeferredRefresh, TransactionHandle, Transactor, TxContext};
