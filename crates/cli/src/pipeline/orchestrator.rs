//! Pipeline orchestrator - coordinates all components.
//!
//! mock 事件源 -> DedupPublisher -> bus -> Dispatcher -> 每个 profile 一个
//! 模拟客户端 (ChannelSession)。handler 把事件体原样回显为 ClientResponse。

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use contracts::{handler, BoxError, ConsumerProfile, EngineConfig, EventKey, Handler};
use dedup::DedupCache;
use dispatcher::{ConsumerConfig, DispatcherBuilder, DispatcherConfig};
use observability::{
    record_consumer_count, record_consumer_metrics, record_dedup_metrics, record_dispatch_metrics,
    ThroughputAggregator,
};
use serde_json::value::RawValue;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, instrument, warn, Instrument, Span};
use transport::{
    json_extractor, json_status_decoder, ChannelSession, ClientResponse, MockEventSource,
    MockSourceConfig,
};

use super::client::{simulate_client, ClientStats};
use super::stats::{ConsumerReport, SourceTotals};
use super::{PipelineStats, StopReason};
use crate::error::Result;

/// Per-session channel capacity for the simulated clients
const SESSION_CAPACITY: usize = 256;

/// How often stop conditions are checked between samples
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Loaded engine configuration
    pub engine: EngineConfig,

    /// Stop after this many fanned-out events (None = unlimited)
    pub max_events: Option<u64>,

    /// Pipeline timeout (None = no timeout)
    pub timeout: Option<Duration>,

    /// Metrics sampling interval
    pub sample_interval: Duration,

    /// Delay between two status messages of a client script
    pub script_step: Duration,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Run the pipeline until a stop condition or `shutdown` fires
    #[instrument(name = "pipeline_run", skip_all, fields(consumers = self.config.engine.consumers.len()))]
    pub async fn run(self, shutdown: CancellationToken) -> Result<PipelineStats> {
        let start_time = Instant::now();
        let engine = &self.config.engine;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        // Dedup cache + ticker
        let cache = Arc::new(DedupCache::with_cancel(
            engine.dedup.window(),
            shutdown.child_token(),
        )?);
        cache.run();

        // Mock source publishing through the cache
        let source =
            MockEventSource::new(MockSourceConfig::from(&engine.source)).with_dedup(Arc::clone(&cache));
        let source_stats = source.stats();

        // Dispatcher
        let mut dispatcher = DispatcherBuilder::new(DispatcherConfig::from(&engine.dispatcher))
            .extractor(json_extractor())
            .cancel_token(shutdown.clone())
            .span(Span::current())
            .build()?;

        // One simulated client per profile
        let clients_cancel = shutdown.child_token();
        let mut clients: Vec<(String, JoinHandle<ClientStats>)> = Vec::new();
        for profile in &engine.consumers {
            let (session, peer) = ChannelSession::pair(profile.id.clone(), SESSION_CAPACITY);
            dispatcher.register_config(consumer_config(profile), session)?;

            let task = tokio::spawn(
                simulate_client(
                    peer,
                    profile.script.clone(),
                    self.config.script_step,
                    clients_cancel.clone(),
                )
                .instrument(info_span!("simulated_client", client = %profile.id)),
            );
            clients.push((profile.id.clone(), task));
        }
        record_consumer_count(dispatcher.consumer_count());

        if engine.consumers.is_empty() {
            warn!("No consumers configured - events will be dropped");
        }

        dispatcher.connect(source).await?;
        dispatcher.run()?;

        info!(
            consumers = dispatcher.consumer_count(),
            window_ms = engine.dedup.window_ms,
            max_events = ?self.config.max_events,
            timeout = ?self.config.timeout,
            "Pipeline running"
        );

        // Monitor loop
        let mut aggregator = ThroughputAggregator::new();
        let mut last_sample = Instant::now();
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        let deadline = self
            .config
            .timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);
        let timeout = sleep_until_opt(deadline);
        tokio::pin!(timeout);

        let stop_reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break StopReason::Signal,
                _ = &mut timeout => {
                    warn!(timeout = ?self.config.timeout, "Pipeline timed out");
                    break StopReason::Timeout;
                }
                _ = poll.tick() => {
                    let snapshot = dispatcher.metrics();

                    if last_sample.elapsed() >= self.config.sample_interval {
                        aggregator.update(snapshot, last_sample.elapsed());
                        last_sample = Instant::now();

                        record_dispatch_metrics(&snapshot);
                        for (id, consumer) in dispatcher.consumer_metrics() {
                            record_consumer_metrics(&id, &consumer);
                        }
                        record_dedup_metrics(&cache.metrics().snapshot(), cache.window());

                        debug!(
                            received = snapshot.received,
                            fanned_out = snapshot.fanned_out,
                            failures = snapshot.dispatch_failures,
                            cached_keys = cache.len(),
                            "Pipeline sample"
                        );
                    }

                    if let Some(max) = self.config.max_events {
                        if snapshot.fanned_out >= max {
                            info!(fanned_out = snapshot.fanned_out, "Reached max events limit");
                            break StopReason::MaxEvents;
                        }
                    }
                    if !dispatcher.is_running() {
                        info!("Event source exhausted");
                        break StopReason::SourceExhausted;
                    }
                }
            }
        };

        // Shutdown
        info!(reason = %stop_reason, "Shutting down pipeline...");
        let close_errors = dispatcher.close().await;
        for e in &close_errors {
            warn!(error = %e, "Dispatcher close error");
        }

        let totals = dispatcher.metrics();
        aggregator.update(totals, last_sample.elapsed());
        record_dispatch_metrics(&totals);

        let dedup_snapshot = cache.metrics().snapshot();
        record_dedup_metrics(&dedup_snapshot, cache.window());
        cache.close().await;

        clients_cancel.cancel();
        let mut client_stats = Vec::with_capacity(clients.len());
        for (id, task) in clients {
            match task.await {
                Ok(stats) => client_stats.push(stats),
                Err(e) => {
                    warn!(client = %id, error = %e, "Simulated client panicked");
                    client_stats.push(ClientStats::default());
                }
            }
        }

        let consumers = dispatcher
            .consumers()
            .iter()
            .zip(client_stats)
            .map(|(consumer, client)| ConsumerReport {
                id: consumer.id().to_string(),
                status: consumer.current_status().map(|s| s.to_string()),
                metrics: consumer.metrics().snapshot(),
                client,
            })
            .collect();

        let stats = PipelineStats {
            duration: start_time.elapsed(),
            stop_reason,
            dispatch: aggregator.summary(),
            source: SourceTotals {
                generated: source_stats.generated(),
                published: source_stats.published(),
                suppressed: source_stats.suppressed(),
            },
            dedup: dedup_snapshot,
            dedup_window: cache.window(),
            consumers,
            close_errors: close_errors.len(),
        };

        info!(
            duration_secs = stats.duration.as_secs_f64(),
            events_per_sec = format!("{:.2}", stats.events_per_sec()),
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

/// Consumer tables for a demo profile: an echo handler per key
fn consumer_config(profile: &ConsumerProfile) -> ConsumerConfig {
    let mut config = ConsumerConfig::new(profile.id.clone(), json_status_decoder());
    for key in &profile.handlers {
        config = config.handler(key.clone(), echo_handler(key.clone()));
    }
    for (status, active) in &profile.statuses {
        config = config.status(status.clone(), active.iter().cloned());
    }
    config
}

/// Handler replying `{key, body}` with the event body unchanged
fn echo_handler(key: EventKey) -> Handler {
    handler(move |payload: &Bytes| {
        let response = if payload.is_empty() {
            ClientResponse::bare(key.clone())
        } else {
            let body: Box<RawValue> = serde_json::from_slice(payload)?;
            ClientResponse {
                key: key.clone(),
                body: Some(body),
            }
        };
        Ok::<_, BoxError>(response.encode()?)
    })
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
