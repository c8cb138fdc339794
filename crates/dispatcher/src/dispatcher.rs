//! Dispatcher - main loop for fan-out to consumers

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use contracts::{DispatcherSettings, EventSource, KeyExtractor, DEFAULT_MAX_CONSUMERS};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument, Span};

use crate::consumer::{Consumer, ConsumerConfig};
use crate::error::DispatcherError;
use crate::metrics::{ConsumerSnapshot, DispatchMetrics, DispatchSnapshot};
use crate::worker::WorkerHandle;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Worker pool size
    pub workers: usize,
    /// Registry capacity
    pub max_consumers: usize,
    /// Per-worker queue capacity
    pub worker_queue_capacity: usize,
    /// Upper bound on one consumer dispatch
    pub dispatch_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            max_consumers: DEFAULT_MAX_CONSUMERS,
            worker_queue_capacity: 64,
            dispatch_timeout: None,
        }
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            workers: settings.workers.unwrap_or_else(default_workers),
            max_consumers: settings.max_consumers,
            worker_queue_capacity: settings.worker_queue_capacity,
            dispatch_timeout: settings.dispatch_timeout(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

/// Builder for creating a Dispatcher
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    extractor: Option<KeyExtractor>,
    cancel: Option<CancellationToken>,
    span: Option<Span>,
}

impl DispatcherBuilder {
    /// Create a new DispatcherBuilder
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            extractor: None,
            cancel: None,
            span: None,
        }
    }

    /// Key extractor, required
    pub fn extractor(mut self, extractor: KeyExtractor) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Parent cancellation token; cancelling it shuts the dispatcher down
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Parent span for every task the dispatcher spawns
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Build the dispatcher
    #[instrument(name = "dispatcher_builder_build", skip(self), fields(workers = self.config.workers))]
    pub fn build(self) -> Result<Dispatcher, DispatcherError> {
        let extractor = self.extractor.ok_or(DispatcherError::MissingExtractor)?;
        let cancel = self
            .cancel
            .map(|parent| parent.child_token())
            .unwrap_or_default();
        let span = self.span.unwrap_or_else(Span::current);

        Ok(Dispatcher {
            config: self.config,
            extractor,
            cancel,
            span,
            consumers: Vec::new(),
            receive_loops: Vec::new(),
            input: None,
            source: None,
            fanout: None,
            metrics: Arc::new(DispatchMetrics::new()),
        })
    }
}

/// Connected event source: its name and the task that closes it on cancellation
struct SourceBinding {
    name: String,
    task: JoinHandle<Result<(), contracts::ContractError>>,
}

/// The main Dispatcher that fans out events to consumers
pub struct Dispatcher {
    config: DispatcherConfig,
    extractor: KeyExtractor,
    cancel: CancellationToken,
    span: Span,
    consumers: Vec<Arc<Consumer>>,
    receive_loops: Vec<(String, JoinHandle<()>)>,
    input: Option<mpsc::Receiver<Bytes>>,
    source: Option<SourceBinding>,
    fanout: Option<JoinHandle<Vec<DispatcherError>>>,
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    /// Register a consumer and start its receive loop
    ///
    /// No duplicate check is made. Fails once the fan-out runs, since the
    /// worker partitions are fixed at that point.
    #[instrument(name = "dispatcher_register", skip(self, consumer), fields(consumer = %consumer.id()))]
    pub fn register(&mut self, consumer: Consumer) -> Result<Arc<Consumer>, DispatcherError> {
        if self.fanout.is_some() {
            return Err(DispatcherError::AlreadyRunning);
        }
        if self.consumers.len() >= self.config.max_consumers {
            warn!(max = self.config.max_consumers, "Consumer capacity exceeded");
            return Err(DispatcherError::capacity_exceeded(self.config.max_consumers));
        }

        let consumer = Arc::new(consumer);
        let handle = {
            let _entered = self.span.enter();
            consumer.start(self.cancel.child_token())
        };
        self.receive_loops.push((consumer.id().to_string(), handle));
        self.consumers.push(Arc::clone(&consumer));

        debug!(registered = self.consumers.len(), "Consumer registered");
        Ok(consumer)
    }

    /// Shorthand for `register(Consumer::new(config, session))`
    pub fn register_config(
        &mut self,
        config: ConsumerConfig,
        session: Arc<dyn contracts::Session>,
    ) -> Result<Arc<Consumer>, DispatcherError> {
        self.register(Consumer::new(config, session))
    }

    /// Start `source` and bind its stream as input
    ///
    /// The source is closed when the dispatcher is closed or cancelled.
    #[instrument(name = "dispatcher_connect", skip(self, source), fields(source = %source.name()))]
    pub async fn connect<S>(&mut self, mut source: S) -> Result<(), DispatcherError>
    where
        S: EventSource + 'static,
    {
        if self.fanout.is_some() || self.source.is_some() {
            return Err(DispatcherError::AlreadyRunning);
        }
        let name = source.name().to_string();

        source
            .run()
            .await
            .map_err(|e| DispatcherError::source(&name, e))?;
        let input = match source.stream() {
            Ok(input) => input,
            Err(e) => {
                if let Err(close_err) = source.close().await {
                    warn!(source = %name, error = %close_err, "Close after failed stream failed");
                }
                return Err(DispatcherError::source(&name, e));
            }
        };

        let cancel = self.cancel.child_token();
        let task = tokio::spawn(
            async move {
                cancel.cancelled().await;
                source.close().await
            }
            .instrument(info_span!(parent: &self.span, "source_binding", source = %name)),
        );

        info!(source = %name, "Event source connected");
        self.input = Some(input);
        self.source = Some(SourceBinding { name, task });
        Ok(())
    }

    /// Start the fan-out loop in the background
    #[instrument(name = "dispatcher_run", skip(self), fields(consumers = self.consumers.len()))]
    pub fn run(&mut self) -> Result<(), DispatcherError> {
        if self.fanout.is_some() {
            return Err(DispatcherError::AlreadyRunning);
        }
        let input = self.input.take().ok_or(DispatcherError::NotConnected)?;

        let worker_count = self.config.workers.max(1);
        let mut partitions: Vec<Vec<Arc<Consumer>>> = vec![Vec::new(); worker_count];
        for (i, consumer) in self.consumers.iter().enumerate() {
            partitions[i % worker_count].push(Arc::clone(consumer));
        }

        let workers: Vec<WorkerHandle> = {
            let _entered = self.span.enter();
            partitions
                .into_iter()
                .enumerate()
                .filter(|(_, consumers)| !consumers.is_empty())
                .map(|(index, consumers)| {
                    WorkerHandle::spawn(
                        index,
                        consumers,
                        self.config.worker_queue_capacity,
                        self.config.dispatch_timeout,
                        Arc::clone(&self.metrics),
                    )
                })
                .collect()
        };

        info!(
            workers = workers.len(),
            consumers = self.consumers.len(),
            "Dispatcher started"
        );

        self.fanout = Some(tokio::spawn(
            fanout_loop(
                input,
                Arc::clone(&self.extractor),
                workers,
                self.cancel.child_token(),
                Arc::clone(&self.metrics),
            )
            .instrument(info_span!(parent: &self.span, "dispatcher_fanout")),
        ));
        Ok(())
    }

    /// Check if the fan-out loop is still consuming input
    pub fn is_running(&self) -> bool {
        self.fanout.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Number of registered consumers
    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// Registered consumers, in registration order
    pub fn consumers(&self) -> &[Arc<Consumer>] {
        &self.consumers
    }

    /// Fan-out metrics
    pub fn metrics(&self) -> DispatchSnapshot {
        self.metrics.snapshot()
    }

    /// Per-consumer metrics
    pub fn consumer_metrics(&self) -> Vec<(String, ConsumerSnapshot)> {
        self.consumers
            .iter()
            .map(|c| (c.id().to_string(), c.metrics().snapshot()))
            .collect()
    }

    /// Stop consuming and close the source and every consumer
    ///
    /// Consumers are closed before the workers are joined: a dispatch already
    /// in flight completes, events still queued become no-ops. Every resource
    /// is attempted; errors are collected rather than returned early.
    #[instrument(name = "dispatcher_close", skip(self))]
    pub async fn close(&mut self) -> Vec<DispatcherError> {
        self.cancel.cancel();
        for consumer in &self.consumers {
            consumer.close();
        }
        let mut errors = Vec::new();

        if let Some(fanout) = self.fanout.take() {
            match fanout.await {
                Ok(worker_errors) => errors.extend(worker_errors),
                Err(e) => errors.push(DispatcherError::worker_panicked("dispatcher_fanout", e.to_string())),
            }
        }
        self.input = None;

        if let Some(binding) = self.source.take() {
            match binding.task.await {
                Ok(Ok(())) => debug!(source = %binding.name, "Event source closed"),
                Ok(Err(e)) => errors.push(DispatcherError::source(binding.name, e)),
                Err(e) => errors.push(DispatcherError::worker_panicked(
                    format!("source_binding_{}", binding.name),
                    e.to_string(),
                )),
            }
        }

        for (id, handle) in self.receive_loops.drain(..) {
            if let Err(e) = handle.await {
                errors.push(DispatcherError::worker_panicked(
                    format!("consumer_receive_loop_{id}"),
                    e.to_string(),
                ));
            }
        }

        for e in &errors {
            error!(error = %e, "Dispatcher close error");
        }
        info!(
            errors = errors.len(),
            received = self.metrics.received(),
            "Dispatcher shutdown complete"
        );
        errors
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn fanout_loop(
    mut input: mpsc::Receiver<Bytes>,
    extractor: KeyExtractor,
    workers: Vec<WorkerHandle>,
    cancel: CancellationToken,
    metrics: Arc<DispatchMetrics>,
) -> Vec<DispatcherError> {
    let mut message_count: u64 = 0;

    'outer: loop {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(messages = message_count, "Dispatcher cancelled");
                break;
            }
            raw = input.recv() => match raw {
                Some(raw) => raw,
                None => {
                    info!(messages = message_count, "Dispatcher input closed, shutting down");
                    break;
                }
            },
        };
        message_count += 1;
        metrics.inc_received();

        let event = match extractor(&raw) {
            Ok(event) => Arc::new(event),
            Err(e) => {
                metrics.inc_decode_failures();
                warn!(error = %e, bytes = raw.len(), "Dropping undecodable message");
                continue;
            }
        };

        for worker in &workers {
            let queued = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'outer,
                queued = worker.send(Arc::clone(&event)) => queued,
            };
            if !queued {
                warn!(worker = worker.index(), key = %event.key, "Event not queued");
            }
        }
        metrics.inc_fanned_out();

        if message_count.is_multiple_of(100) {
            debug!(messages = message_count, "Dispatcher progress");
        }
    }

    shutdown_workers(workers).await
}

async fn shutdown_workers(workers: Vec<WorkerHandle>) -> Vec<DispatcherError> {
    let mut errors = Vec::new();
    for worker in workers {
        if let Err(e) = worker.shutdown().await {
            errors.push(e);
        }
    }
    errors
}
