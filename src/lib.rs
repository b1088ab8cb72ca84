//! # goods-manager
//!
//! Transactional catalogue of goods with a cache-aside read path and a
//! best-effort audit pipeline.
//!
//! ## Overview
//!
//! - **Domain**: the `Good` record, write inputs and the dense priority ordering
//! - **Infrastructure**: Postgres store, Redis cache and pub/sub, analytics sink
//! - **Application**: `GoodService`, the transaction boundary of every call
//! - **Worker**: `EventBatcher`, size-or-time batching into the analytics sink
//!
//! ## Example
//!
//! ```rust,ignore
//! use goods_manager::domain::{GroupId, NewGood};
//! use goods_manager::infrastructure::ServiceFactory;
//!
//! let service = ServiceFactory::from_env()?.create_service().await?;
//! let good = service.create(&NewGood::new(GroupId::new(1), "Widget")).await?;
//! let reordering = service.reprioritize(good.group_id, good.id, 1).await?;
//! ```

#![forbid(unsafe_code)]

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod worker;
