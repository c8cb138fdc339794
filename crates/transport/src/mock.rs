//! Mock 事件源
//!
//! 按固定频率轮流发送配置的事件 key，用于无 broker 环境的测试和演示。
//! 可选地经过 DedupCache 发布，模拟生产端的突发抑制。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{ContractError, EventKey, EventSource, SourceSettings};
use dedup::DedupCache;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::codec::encode_event;
use crate::publisher::{ChannelPublisher, DedupPublisher, PublishOutcome};

/// Mock 事件源配置
#[derive(Debug, Clone)]
pub struct MockSourceConfig {
    /// 事件源名称
    pub name: String,

    /// 轮流发送的事件 key
    pub keys: Vec<EventKey>,

    /// 发送频率 (Hz)
    pub rate_hz: f64,

    /// 每个 tick 重复发送的次数
    pub burst: u32,

    /// 通道容量
    pub channel_capacity: usize,

    /// 最多发送的 tick 数 (None = 直到关闭)
    pub max_ticks: Option<u64>,
}

impl Default for MockSourceConfig {
    fn default() -> Self {
        Self::from(&SourceSettings::default())
    }
}

impl From<&SourceSettings> for MockSourceConfig {
    fn from(settings: &SourceSettings) -> Self {
        Self {
            name: settings.name.clone(),
            keys: settings.keys.clone(),
            rate_hz: settings.rate_hz,
            burst: settings.burst,
            channel_capacity: settings.channel_capacity,
            max_ticks: None,
        }
    }
}

/// Mock 事件源计数
#[derive(Debug, Default)]
pub struct MockSourceStats {
    generated: AtomicU64,
    published: AtomicU64,
    suppressed: AtomicU64,
}

impl MockSourceStats {
    /// 生成的消息数 (含被抑制的)
    pub fn generated(&self) -> u64 {
        self.generated.load(Ordering::Relaxed)
    }

    /// 实际发出的消息数
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// 被去重抑制的消息数
    pub fn suppressed(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

enum Outlet {
    Direct(ChannelPublisher),
    Deduped(DedupPublisher<ChannelPublisher>),
}

impl Outlet {
    async fn publish(&self, key: &str, data: Bytes) -> Result<PublishOutcome, ContractError> {
        use contracts::Publisher;

        match self {
            Outlet::Direct(publisher) => {
                publisher.send(data).await?;
                Ok(PublishOutcome::Sent)
            }
            Outlet::Deduped(publisher) => publisher.publish(key, data).await,
        }
    }
}

/// Mock 事件源
pub struct MockEventSource {
    config: MockSourceConfig,
    dedup: Option<Arc<DedupCache>>,
    tx: Option<mpsc::Sender<Bytes>>,
    rx: Option<mpsc::Receiver<Bytes>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    stats: Arc<MockSourceStats>,
}

impl MockEventSource {
    /// 创建新的 Mock 事件源
    pub fn new(config: MockSourceConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        Self {
            config,
            dedup: None,
            tx: Some(tx),
            rx: Some(rx),
            cancel: CancellationToken::new(),
            task: None,
            stats: Arc::new(MockSourceStats::default()),
        }
    }

    /// 通过 DedupCache 发布，窗口内重复的 key 只发送一次
    pub fn with_dedup(mut self, cache: Arc<DedupCache>) -> Self {
        self.dedup = Some(cache);
        self
    }

    /// 限制发送的 tick 数，到达后关闭流
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.config.max_ticks = Some(max_ticks);
        self
    }

    /// 计数
    pub fn stats(&self) -> Arc<MockSourceStats> {
        Arc::clone(&self.stats)
    }
}

impl EventSource for MockEventSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    #[instrument(name = "mock_source_run", skip(self), fields(source = %self.config.name))]
    async fn run(&mut self) -> Result<(), ContractError> {
        if self.config.keys.is_empty() {
            return Err(ContractError::source(&self.config.name, "no keys configured"));
        }
        let period = tick_period(self.config.rate_hz).ok_or_else(|| {
            ContractError::source(
                &self.config.name,
                format!("rate_hz {} has no usable tick period", self.config.rate_hz),
            )
        })?;
        let tx = self
            .tx
            .take()
            .ok_or_else(|| ContractError::source(&self.config.name, "already running"))?;

        let publisher = ChannelPublisher::new(self.config.name.clone(), tx);
        let outlet = match &self.dedup {
            Some(cache) => Outlet::Deduped(DedupPublisher::new(publisher, Arc::clone(cache))),
            None => Outlet::Direct(publisher),
        };

        info!(
            source = %self.config.name,
            keys = self.config.keys.len(),
            rate_hz = self.config.rate_hz,
            burst = self.config.burst,
            deduped = self.dedup.is_some(),
            "Mock event source started"
        );

        self.task = Some(tokio::spawn(produce_loop(
            self.config.clone(),
            period,
            outlet,
            self.cancel.clone(),
            Arc::clone(&self.stats),
        )));
        Ok(())
    }

    fn stream(&mut self) -> Result<mpsc::Receiver<Bytes>, ContractError> {
        self.rx
            .take()
            .ok_or_else(|| ContractError::source(&self.config.name, "stream already taken"))
    }

    #[instrument(name = "mock_source_close", skip(self), fields(source = %self.config.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.cancel.cancel();
        self.tx = None;
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| {
                ContractError::source(&self.config.name, format!("producer task failed: {e}"))
            })?;
        }
        debug!(
            source = %self.config.name,
            generated = self.stats.generated(),
            published = self.stats.published(),
            suppressed = self.stats.suppressed(),
            "Mock event source closed"
        );
        Ok(())
    }
}

/// 1 / rate_hz，非正、溢出或取整为 0 时返回 None (interval 不接受 0 周期)
fn tick_period(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|period| !period.is_zero())
}

async fn produce_loop(
    config: MockSourceConfig,
    period: Duration,
    outlet: Outlet,
    cancel: CancellationToken,
    stats: Arc<MockSourceStats>,
) {
    let mut ticker = tokio::time::interval(period);
    let mut seq: u64 = 0;

    loop {
        if config.max_ticks.is_some_and(|max| seq >= max) {
            debug!(source = %config.name, ticks = seq, "Mock source reached tick limit");
            break;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let key = &config.keys[(seq % config.keys.len() as u64) as usize];
        let data = match encode_event(key.clone(), &json!({ "seq": seq, "source": config.name })) {
            Ok(data) => data,
            Err(e) => {
                warn!(source = %config.name, error = %e, "Failed to encode mock event");
                seq += 1;
                continue;
            }
        };
        seq += 1;

        for _ in 0..config.burst.max(1) {
            stats.generated.fetch_add(1, Ordering::Relaxed);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                outcome = outlet.publish(key, data.clone()) => outcome,
            };
            match outcome {
                Ok(PublishOutcome::Sent) => {
                    stats.published.fetch_add(1, Ordering::Relaxed);
                    trace!(source = %config.name, key = %key, seq, "Mock event published");
                }
                Ok(PublishOutcome::Suppressed) => {
                    stats.suppressed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    debug!(source = %config.name, error = %e, "Mock source outlet closed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EventEnvelope;

    fn config(keys: &[&str], burst: u32) -> MockSourceConfig {
        MockSourceConfig {
            name: "mock".to_string(),
            keys: keys.iter().map(|k| EventKey::from(*k)).collect(),
            rate_hz: 1000.0,
            burst,
            channel_capacity: 64,
            max_ticks: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_robin_keys() {
        let mut source = MockEventSource::new(config(&["a", "b"], 1)).with_max_ticks(4);
        let mut rx = source.stream().unwrap();
        source.run().await.unwrap();

        let mut keys = Vec::new();
        while let Some(msg) = rx.recv().await {
            keys.push(EventEnvelope::decode(&msg).unwrap().key.to_string());
        }
        assert_eq!(keys, vec!["a", "b", "a", "b"]);
        source.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_suppressed_by_dedup() {
        let cache = Arc::new(DedupCache::new(Duration::from_secs(60)).unwrap());
        let mut source = MockEventSource::new(config(&["disk_full"], 5))
            .with_dedup(cache)
            .with_max_ticks(3);
        let stats = source.stats();
        let mut rx = source.stream().unwrap();
        source.run().await.unwrap();

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        source.close().await.unwrap();

        assert_eq!(received, 1);
        assert_eq!(stats.generated(), 15);
        assert_eq!(stats.published(), 1);
        assert_eq!(stats.suppressed(), 14);
    }

    #[tokio::test]
    async fn test_run_requires_keys() {
        let mut source = MockEventSource::new(config(&[], 1));
        assert!(source.run().await.is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_zero_rate() {
        let mut cfg = config(&["a"], 1);
        cfg.rate_hz = 0.0;
        let mut source = MockEventSource::new(cfg);
        assert!(source.run().await.is_err());
    }

    #[tokio::test]
    async fn test_run_rejects_unusable_rates() {
        for rate_hz in [1e10, 1e-20, f64::NAN, f64::INFINITY] {
            let mut cfg = config(&["a"], 1);
            cfg.rate_hz = rate_hz;
            let mut source = MockEventSource::new(cfg);
            let err = source.run().await.unwrap_err().to_string();
            assert!(err.contains("no usable tick period"), "rate {rate_hz}: {err}");
            source.close().await.unwrap();
        }
    }

    #[test]
    fn test_tick_period() {
        assert_eq!(tick_period(1000.0), Some(Duration::from_millis(1)));
        assert_eq!(tick_period(0.5), Some(Duration::from_secs(2)));
        assert_eq!(tick_period(0.0), None);
        assert_eq!(tick_period(1e10), None);
        assert_eq!(tick_period(1e-20), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_producer() {
        let mut source = MockEventSource::new(config(&["a"], 1));
        let mut rx = source.stream().unwrap();
        source.run().await.unwrap();

        assert!(rx.recv().await.is_some());
        source.close().await.unwrap();

        // Drain what was queued before cancellation, then the stream ends
        while rx.recv().await.is_some() {}
    }
}
