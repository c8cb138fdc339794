//! # Dispatcher
//!
//! 事件分发模块。
//!
//! 负责：
//! - 从 `EventSource` 拉取原始消息并串行提取 key
//! - Fan-out 到固定大小的 worker 池，每个 worker 负责一组 consumer
//! - 按 consumer 当前状态过滤事件，调用 handler 并回写 session
//! - 隔离慢 consumer 和失败的 handler，不影响其他 consumer

pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod metrics;
mod worker;

pub use contracts::{DecodedEvent, EventKey, EventSource, KeyExtractor, Session};
pub use consumer::{Consumer, ConsumerConfig};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::DispatcherError;
pub use metrics::{ConsumerMetrics, ConsumerSnapshot, DispatchMetrics, DispatchSnapshot};
