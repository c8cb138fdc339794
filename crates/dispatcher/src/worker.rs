//! WorkerHandle - one dispatch worker with its own bounded queue

use std::sync::Arc;
use std::time::Duration;

use contracts::DecodedEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn, Instrument};

use crate::consumer::Consumer;
use crate::error::DispatcherError;
use crate::metrics::DispatchMetrics;

/// Handle to a running dispatch worker
pub(crate) struct WorkerHandle {
    /// Worker index
    index: usize,
    /// Channel to send events to worker
    tx: mpsc::Sender<Arc<DecodedEvent>>,
    /// Worker task handle
    worker_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Spawn a worker owning `consumers`
    ///
    /// The worker walks its consumers in registration order for every event,
    /// so each consumer sees events in queue order.
    pub(crate) fn spawn(
        index: usize,
        consumers: Vec<Arc<Consumer>>,
        queue_capacity: usize,
        dispatch_timeout: Option<Duration>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let span = tracing::debug_span!("dispatch_worker", worker = index, consumers = consumers.len());

        let worker_handle = tokio::spawn(
            worker_loop(index, consumers, rx, dispatch_timeout, metrics).instrument(span),
        );

        Self {
            index,
            tx,
            worker_handle,
        }
    }

    /// Worker index
    pub(crate) fn index(&self) -> usize {
        self.index
    }

    /// Queue an event, waiting while the queue is full
    ///
    /// Returns false if the worker has stopped.
    pub(crate) async fn send(&self, event: Arc<DecodedEvent>) -> bool {
        if self.tx.send(event).await.is_err() {
            error!(worker = self.index, "Dispatch worker closed unexpectedly");
            return false;
        }
        true
    }

    /// Stop accepting events, let the worker drain its queue, then join it
    #[instrument(name = "worker_handle_shutdown", skip(self), fields(worker = self.index))]
    pub(crate) async fn shutdown(self) -> Result<(), DispatcherError> {
        // Drop sender to signal worker to stop
        drop(self.tx);
        self.worker_handle.await.map_err(|e| {
            error!(worker = self.index, error = ?e, "Worker task panicked");
            DispatcherError::worker_panicked(format!("dispatch_worker_{}", self.index), e.to_string())
        })?;
        debug!(worker = self.index, "WorkerHandle shutdown complete");
        Ok(())
    }
}

async fn worker_loop(
    index: usize,
    consumers: Vec<Arc<Consumer>>,
    mut rx: mpsc::Receiver<Arc<DecodedEvent>>,
    dispatch_timeout: Option<Duration>,
    metrics: Arc<DispatchMetrics>,
) {
    debug!(worker = index, "Dispatch worker started");

    while let Some(event) = rx.recv().await {
        for consumer in &consumers {
            let result = match dispatch_timeout {
                Some(timeout) => {
                    match tokio::time::timeout(timeout, consumer.dispatch(&event.key, &event.payload))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            metrics.inc_timeouts();
                            Err(DispatcherError::dispatch_timeout(
                                consumer.id(),
                                event.key.clone(),
                                timeout,
                            ))
                        }
                    }
                }
                None => consumer.dispatch(&event.key, &event.payload).await,
            };

            if let Err(e) = result {
                metrics.inc_dispatch_failures();
                match e {
                    DispatcherError::HandlerNotRegistered { .. } => {
                        warn!(worker = index, consumer = %consumer.id(), error = %e, "Dispatch skipped");
                    }
                    _ => {
                        error!(worker = index, consumer = %consumer.id(), error = %e, "Dispatch failed");
                    }
                }
                // Continue processing - one consumer never stalls the others
            }
        }
    }

    debug!(worker = index, "Dispatch worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::ConsumerConfig;
    use bytes::Bytes;
    use contracts::{handler, BoxError};
    use transport::{json_status_decoder, ChannelSession, EventEnvelope};

    fn active_consumer(id: &str, handler_fn: contracts::Handler) -> (Arc<Consumer>, transport::SessionPeer) {
        let (session, peer) = ChannelSession::pair(id, 16);
        let config = ConsumerConfig::new(id, json_status_decoder())
            .status("on", ["evt"])
            .handler("evt", handler_fn);
        let consumer = Arc::new(Consumer::new(config, session));
        consumer.apply_inbound(&EventEnvelope::bare("on").encode().unwrap());
        (consumer, peer)
    }

    #[tokio::test]
    async fn test_worker_drains_queue_on_shutdown() {
        let (consumer, mut peer) =
            active_consumer("c1", handler(|p: &Bytes| Ok::<_, BoxError>(p.clone())));
        let metrics = Arc::new(DispatchMetrics::new());
        let worker = WorkerHandle::spawn(0, vec![Arc::clone(&consumer)], 8, None, metrics);

        for i in 0..5u8 {
            let event = Arc::new(DecodedEvent::new("evt", vec![i]));
            assert!(worker.send(event).await);
        }
        worker.shutdown().await.unwrap();

        for i in 0..5u8 {
            assert_eq!(peer.try_recv().unwrap(), Bytes::from(vec![i]));
        }
        assert_eq!(consumer.metrics().delivered(), 5);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let (failing, _p1) =
            active_consumer("bad", handler(|_| Err::<Bytes, BoxError>("boom".into())));
        let (healthy, mut p2) =
            active_consumer("good", handler(|p: &Bytes| Ok::<_, BoxError>(p.clone())));
        let metrics = Arc::new(DispatchMetrics::new());
        let worker = WorkerHandle::spawn(
            0,
            vec![failing, Arc::clone(&healthy)],
            8,
            None,
            Arc::clone(&metrics),
        );

        for _ in 0..3 {
            worker.send(Arc::new(DecodedEvent::new("evt", "x"))).await;
        }
        worker.shutdown().await.unwrap();

        assert_eq!(metrics.dispatch_failures(), 3);
        assert_eq!(healthy.metrics().delivered(), 3);
        for _ in 0..3 {
            assert!(p2.try_recv().is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_timeout_moves_on() {
        // Capacity-1 session that nobody reads: the second send blocks
        let (session, _peer) = ChannelSession::pair("stuck", 1);
        let config = ConsumerConfig::new("stuck", json_status_decoder())
            .status("on", ["evt"])
            .handler("evt", handler(|p: &Bytes| Ok::<_, BoxError>(p.clone())));
        let consumer = Arc::new(Consumer::new(config, session));
        consumer.apply_inbound(&EventEnvelope::bare("on").encode().unwrap());

        let metrics = Arc::new(DispatchMetrics::new());
        let worker = WorkerHandle::spawn(
            0,
            vec![consumer],
            8,
            Some(Duration::from_millis(50)),
            Arc::clone(&metrics),
        );

        for _ in 0..3 {
            worker.send(Arc::new(DecodedEvent::new("evt", "x"))).await;
        }
        worker.shutdown().await.unwrap();

        assert_eq!(metrics.timeouts(), 2);
        assert_eq!(metrics.dispatch_failures(), 2);
    }
}
