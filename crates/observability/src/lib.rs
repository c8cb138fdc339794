//! # Observability
//!
//! 可观测性模块：Tracing + Prometheus 指标。
//!
//! ## 功能
//!
//! - Tracing 初始化 (JSON/Pretty/Compact 格式)
//! - Prometheus 指标导出
//! - Dispatcher / Consumer / Dedup 指标记录与吞吐统计
//!
//! ## 使用示例
//!
//! ```ignore
//! use observability::{metrics, ObservabilityConfig};
//!
//! // 初始化
//! observability::init_with_config(ObservabilityConfig::from_verbosity(1, false))?;
//!
//! // 周期性导出计数快照
//! metrics::record_dispatch_metrics(&dispatcher.metrics());
//! metrics::record_dedup_metrics(&cache.metrics().snapshot(), cache.window());
//! ```

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::LookupSpan, util::SubscriberInitExt, EnvFilter, Layer,
};

// Re-exports
pub use crate::metrics::{
    record_consumer_count, record_consumer_metrics, record_dedup_metrics, record_dispatch_metrics,
    MetricsSummary, RunningStats, StatsSummary, ThroughputAggregator,
};

/// 可观测性配置
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// 日志格式
    pub log_format: LogFormat,
    /// 默认日志级别 (EnvFilter 语法)
    pub log_level: String,
    /// 为 true 时 RUST_LOG 覆盖 log_level
    pub honor_env: bool,
    /// Prometheus 端口 (None = 禁用)
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: "info".to_string(),
            honor_env: true,
            metrics_port: None,
        }
    }
}

impl ObservabilityConfig {
    /// 由 `-v` 次数与 `-q` 推导日志级别
    ///
    /// quiet 固定为 warn，且忽略 RUST_LOG。
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let (log_level, honor_env) = match (quiet, verbose) {
            (true, _) => ("warn", false),
            (false, 0) => ("info", true),
            (false, 1) => ("debug", true),
            (false, _) => ("trace", true),
        };
        Self {
            log_level: log_level.to_string(),
            honor_env,
            ..Self::default()
        }
    }

    pub fn with_log_format(mut self, log_format: LogFormat) -> Self {
        self.log_format = log_format;
        self
    }

    pub fn with_metrics_port(mut self, port: Option<u16>) -> Self {
        self.metrics_port = port;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        if self.honor_env {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
        } else {
            EnvFilter::new(&self.log_level)
        }
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON 结构化日志
    Json,
    /// 人类可读格式
    #[default]
    Pretty,
    /// 紧凑单行格式
    Compact,
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    }
}

/// 初始化 tracing 订阅者，并按需启动 Prometheus 导出
///
/// 每个进程只能成功调用一次。
pub fn init_with_config(config: ObservabilityConfig) -> Result<()> {
    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer(config.log_format))
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    if let Some(port) = config.metrics_port {
        init_metrics_only(port)?;
    }

    tracing::debug!(
        log_format = ?config.log_format,
        log_level = %config.log_level,
        metrics_port = ?config.metrics_port,
        "Observability initialized"
    );
    Ok(())
}

/// 仅初始化 Prometheus 指标（不初始化 Tracing）
///
/// 用于 Tracing 已由其他模块初始化的场景。
pub fn init_metrics_only(port: u16) -> Result<()> {
    let builder = PrometheusBuilder::new();
    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;

    tracing::info!(port = port, "Prometheus metrics endpoint initialized");
    Ok(())
}
