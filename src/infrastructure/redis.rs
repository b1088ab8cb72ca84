//! Redis-backed cache and event channel.
//!
//! This module provides the production `Cache` and `EventPublisher`
//! implementations using `deadpool-redis` for connection pooling, plus the
//! pub/sub subscriber that feeds the audit pipeline.
//!
//! # Key Design
//!
//! - Good: `good:{id}` -> JSON (`SET EX`, see `good_cache_key`)
//! - Events: `PUBLISH logger:good <json>`

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use futures::{Stream, StreamExt};
use redis::AsyncCommands;

use crate::domain::Good;
use crate::infrastructure::{
    Cache, CacheError, EventPublisher, PublishError, decode_event, encode_event,
};

/// Creates a Redis connection pool from a URL.
///
/// # Errors
///
/// Returns `CacheError::Connection` if the URL is invalid.
pub fn create_redis_pool(redis_url: &str) -> Result<Pool, CacheError> {
    Config::from_url(redis_url)
        .create_pool(Some(Runtime::Tokio1))
        .map_err(|error| CacheError::Connection(error.to_string()))
}

// =============================================================================
// Redis Cache
// =============================================================================

/// Redis implementation of `Cache`.
#[derive(Debug, Clone)]
pub struct RedisCache {
    /// Connection pool for Redis.
    pool: Pool,
}

impl RedisCache {
    #[must_use]
    pub const fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|error| CacheError::Connection(error.to_string()))
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut connection = self.connection().await?;
        connection
            .get::<_, Option<String>>(key)
            .await
            .map_err(|error| CacheError::Command(error.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        // SET EX rejects zero.
        let seconds = ttl.as_secs().max(1);
        connection
            .set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|error| CacheError::Command(error.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut connection = self.connection().await?;
        connection
            .del::<_, ()>(key)
            .await
            .map_err(|error| CacheError::Command(error.to_string()))
    }
}

// =============================================================================
// Redis Event Publisher
// =============================================================================

/// Publishes change events with `PUBLISH`.
///
/// Redis pub/sub does not retain messages: events published while no
/// subscriber is connected are lost, which the audit pipeline tolerates.
#[derive(Debug, Clone)]
pub struct RedisEventPublisher {
    pool: Pool,
    topic: String,
}

impl RedisEventPublisher {
    #[must_use]
    pub fn new(pool: Pool, topic: impl Into<String>) -> Self {
        Self {
            pool,
            topic: topic.into(),
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn send(&self, good: &Good) -> Result<(), PublishError> {
        let payload = encode_event(good)?;
        let mut connection = self
            .pool
            .get()
            .await
            .map_err(|error| PublishError::Channel(error.to_string()))?;
        let receivers: i64 = connection
            .publish(&self.topic, payload)
            .await
            .map_err(|error| PublishError::Channel(error.to_string()))?;
        tracing::debug!(good_id = %good.id, receivers, "Published good event");
        Ok(())
    }
}

// =============================================================================
// Redis Event Subscriber
// =============================================================================

/// Subscribes to the event topic and hands decoded goods to a consumer.
#[derive(Debug, Clone)]
pub struct RedisEventSubscriber {
    client: redis::Client,
    topic: String,
}

impl RedisEventSubscriber {
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the URL is invalid.
    pub fn new(redis_url: &str, topic: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|error| CacheError::Connection(error.to_string()))?;
        Ok(Self {
            client,
            topic: topic.into(),
        })
    }

    /// Delivers every decodable message to `deliver` until `shutdown`
    /// resolves.
    ///
    /// Undecodable payloads are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Connection` if the subscription cannot be set up,
    /// or if the server closes it before `shutdown` resolves.
    pub async fn run<F, S>(&self, deliver: F, shutdown: S) -> Result<(), CacheError>
    where
        F: FnMut(Good) + Send,
        S: Future<Output = ()> + Send,
    {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|error| CacheError::Connection(error.to_string()))?;
        pubsub
            .subscribe(&self.topic)
            .await
            .map_err(|error| CacheError::Connection(error.to_string()))?;
        tracing::info!(topic = %self.topic, "Subscribed to good events");

        let payloads = pubsub
            .on_message()
            .map(|message| message.get_payload::<String>());
        forward_events(&self.topic, payloads, deliver, shutdown).await
    }
}

/// Decodes `payloads` into goods for `deliver` until `shutdown` resolves.
/// The stream ending first is an error.
async fn forward_events<P, F, S>(
    topic: &str,
    payloads: P,
    mut deliver: F,
    shutdown: S,
) -> Result<(), CacheError>
where
    P: Stream<Item = redis::RedisResult<String>>,
    F: FnMut(Good) + Send,
    S: Future<Output = ()> + Send,
{
    tokio::pin!(payloads);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                tracing::info!(topic = %topic, "Subscriber shutting down");
                return Ok(());
            }
            payload = payloads.next() => {
                let Some(payload) = payload else {
                    tracing::error!(topic = %topic, "Subscription closed by server");
                    return Err(CacheError::Connection(format!(
                        "subscription to {topic} closed by server"
                    )));
                };
                match payload {
                    Ok(payload) => match decode_event(&payload) {
                        Ok(good) => deliver(good),
                        Err(error) => {
                            tracing::warn!(error = %error, "Skipping undecodable good event");
                        }
                    },
                    Err(error) => {
                        tracing::warn!(error = %error, "Skipping non-text good event");
                    }
                }
            }
        }
    }
}
