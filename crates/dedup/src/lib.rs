//! # Dedup
//!
//! 事件去重模块。
//!
//! 负责：
//! - 固定时间窗口内每个 key 只准入一次
//! - 后台定时器按窗口整体清空
//! - 运行时调整窗口长度
//!
//! ## 使用示例
//!
//! ```ignore
//! use dedup::DedupCache;
//! use std::time::Duration;
//!
//! let cache = DedupCache::new(Duration::from_millis(500))?;
//! cache.run();
//!
//! if cache.allowed("disk_full") {
//!     // publish
//! }
//! ```

mod cache;
mod error;
mod metrics;

pub use cache::DedupCache;
pub use error::DedupError;
pub use metrics::{DedupMetrics, DedupSnapshot};
