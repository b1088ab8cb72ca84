//! Background audit worker.

pub mod batcher;

pub use batcher::{BatchIngress, BatcherConfig, BatcherReport, EventBatcher};
