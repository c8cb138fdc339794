//! Event engine 指标收集模块
//!
//! 将 dispatcher / consumer / dedup 的本地计数快照导出为 Prometheus 指标，
//! 并在内存中聚合吞吐统计，供 CLI 输出摘要。

use std::fmt::Write as _;
use std::time::Duration;

use dedup::DedupSnapshot;
use dispatcher::{ConsumerSnapshot, DispatchSnapshot};
use metrics::{counter, gauge, histogram};

/// 从 DispatchSnapshot 记录 fan-out 指标
///
/// 快照是累计值，因此使用 `absolute` 而不是 `increment`。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_dispatch_metrics;
///
/// record_dispatch_metrics(&dispatcher.metrics());
/// ```
pub fn record_dispatch_metrics(snapshot: &DispatchSnapshot) {
    counter!("eventgate_messages_received_total").absolute(snapshot.received);
    counter!("eventgate_decode_failures_total").absolute(snapshot.decode_failures);
    counter!("eventgate_events_fanned_out_total").absolute(snapshot.fanned_out);
    counter!("eventgate_dispatch_failures_total").absolute(snapshot.dispatch_failures);
    counter!("eventgate_dispatch_timeouts_total").absolute(snapshot.timeouts);
}

/// 记录单个 consumer 的指标
pub fn record_consumer_metrics(consumer_id: &str, snapshot: &ConsumerSnapshot) {
    let id = consumer_id.to_string();
    counter!("eventgate_consumer_delivered_total", "consumer" => id.clone())
        .absolute(snapshot.delivered);
    counter!("eventgate_consumer_gated_total", "consumer" => id.clone()).absolute(snapshot.gated);
    counter!("eventgate_consumer_failures_total", "consumer" => id.clone())
        .absolute(snapshot.failures);
    counter!("eventgate_consumer_status_changes_total", "consumer" => id)
        .absolute(snapshot.status_changes);
}

/// 记录去重缓存指标
pub fn record_dedup_metrics(snapshot: &DedupSnapshot, window: Duration) {
    counter!("eventgate_dedup_admitted_total").absolute(snapshot.admitted_count);
    counter!("eventgate_dedup_suppressed_total").absolute(snapshot.suppressed_count);
    counter!("eventgate_dedup_clears_total").absolute(snapshot.clear_count);
    gauge!("eventgate_dedup_window_ms").set(window.as_secs_f64() * 1000.0);
    gauge!("eventgate_dedup_suppression_ratio").set(snapshot.suppression_ratio());
}

/// 记录已注册 consumer 数量
pub fn record_consumer_count(count: usize) {
    gauge!("eventgate_consumers").set(count as f64);
}

/// 吞吐指标聚合器
///
/// 周期性喂入 DispatchSnapshot，按采样间隔计算消息速率。
#[derive(Debug, Clone, Default)]
pub struct ThroughputAggregator {
    /// 上一次的快照
    last: DispatchSnapshot,

    /// 采样次数
    pub samples: u64,

    /// 每秒接收消息数统计
    pub received_rate: RunningStats,

    /// 每秒 fan-out 事件数统计
    pub fanned_out_rate: RunningStats,
}

impl ThroughputAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 喂入新快照
    ///
    /// `elapsed` 为距离上次采样的时间，为零时忽略本次采样。
    pub fn update(&mut self, snapshot: DispatchSnapshot, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }

        let received = snapshot.received.saturating_sub(self.last.received) as f64 / secs;
        let fanned_out = snapshot.fanned_out.saturating_sub(self.last.fanned_out) as f64 / secs;

        self.received_rate.push(received);
        self.fanned_out_rate.push(fanned_out);
        histogram!("eventgate_received_per_second").record(received);

        self.samples += 1;
        self.last = snapshot;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            totals: self.last,
            drop_rate: if self.last.received > 0 {
                self.last.decode_failures as f64 / self.last.received as f64 * 100.0
            } else {
                0.0
            },
            received_per_sec: StatsSummary::from(&self.received_rate),
            fanned_out_per_sec: StatsSummary::from(&self.fanned_out_rate),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub totals: DispatchSnapshot,
    pub drop_rate: f64,
    pub received_per_sec: StatsSummary,
    pub fanned_out_per_sec: StatsSummary,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        writeln!(out, "=== Dispatch Summary ===")?;
        writeln!(out, "Messages received: {}", self.totals.received)?;
        writeln!(
            out,
            "Decode failures: {} ({:.2}%)",
            self.totals.decode_failures, self.drop_rate
        )?;
        writeln!(out, "Events fanned out: {}", self.totals.fanned_out)?;
        writeln!(out, "Dispatch failures: {}", self.totals.dispatch_failures)?;
        writeln!(out, "Dispatch timeouts: {}", self.totals.timeouts)?;
        writeln!(out, "Received/s: {}", self.received_per_sec)?;
        writeln!(out, "Fanned out/s: {}", self.fanned_out_per_sec)?;
        f.write_str(&out)
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);

            let delta = value - self.mean;
            self.mean += delta / self.count as f64;
            let delta2 = value - self.mean;
            self.m2 += delta * delta2;
        }
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
