//! EngineConfig - Config Loader 输出
//!
//! 描述完整的引擎配置：分发器、去重窗口、演示事件源、演示消费者。

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{EventKey, StatusTable};

/// 去重窗口下限，低于此值的窗口被拒绝
pub const MIN_DEDUP_WINDOW: Duration = Duration::from_millis(1);

/// 默认最大消费者数量
pub const DEFAULT_MAX_CONSUMERS: usize = 63;

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 分发器设置
    #[serde(default)]
    pub dispatcher: DispatcherSettings,

    /// 去重缓存设置
    pub dedup: DedupSettings,

    /// 演示事件源设置
    #[serde(default)]
    pub source: SourceSettings,

    /// 演示消费者列表
    #[serde(default)]
    pub consumers: Vec<ConsumerProfile>,
}

/// 分发器设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherSettings {
    /// 工作线程数 (None = CPU 核数)
    #[serde(default)]
    pub workers: Option<usize>,

    /// 最大消费者数量
    #[serde(default = "default_max_consumers")]
    pub max_consumers: usize,

    /// 每个 worker 的队列容量
    #[serde(default = "default_worker_queue_capacity")]
    pub worker_queue_capacity: usize,

    /// 单次分发超时 (毫秒，None = 不限)
    #[serde(default)]
    pub dispatch_timeout_ms: Option<u64>,
}

impl DispatcherSettings {
    /// 单次分发超时
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: None,
            max_consumers: default_max_consumers(),
            worker_queue_capacity: default_worker_queue_capacity(),
            dispatch_timeout_ms: None,
        }
    }
}

fn default_max_consumers() -> usize {
    DEFAULT_MAX_CONSUMERS
}

fn default_worker_queue_capacity() -> usize {
    64
}

/// 去重缓存设置
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DedupSettings {
    /// 准入窗口 (毫秒)，必须 >= 1
    pub window_ms: u64,
}

impl DedupSettings {
    /// 准入窗口
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// 演示事件源设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSettings {
    /// 事件源名称
    #[serde(default = "default_source_name")]
    pub name: String,

    /// 轮流发送的事件 key
    #[serde(default)]
    pub keys: Vec<EventKey>,

    /// 发送频率 (Hz)，必须 > 0
    #[serde(default = "default_rate_hz")]
    pub rate_hz: f64,

    /// 每个事件连续重复发送的次数 (模拟突发)
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// 通道容量
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            name: default_source_name(),
            keys: Vec::new(),
            rate_hz: default_rate_hz(),
            burst: default_burst(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

fn default_source_name() -> String {
    "mock".to_string()
}

fn default_rate_hz() -> f64 {
    10.0
}

fn default_burst() -> u32 {
    1
}

fn default_channel_capacity() -> usize {
    100
}

/// 演示消费者配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerProfile {
    /// 唯一标识符
    pub id: String,

    /// 状态 key -> 该状态下激活的事件 key
    #[serde(default)]
    pub statuses: StatusTable,

    /// 注册了回显 handler 的事件 key
    #[serde(default)]
    pub handlers: Vec<EventKey>,

    /// 模拟客户端启动后依次发送的消息 key
    #[serde(default)]
    pub script: Vec<EventKey>,
}
