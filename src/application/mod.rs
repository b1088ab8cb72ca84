//! Application layer: the transactional service over goods.

pub mod good_service;

pub use good_service::{GoodError, GoodService, PublishPolicy, ServiceConfig};
