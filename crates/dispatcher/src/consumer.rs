//! Consumer - one connected peer behind a status gate
//!
//! A consumer owns an immutable handler table and status table. The peer
//! selects the active status by sending a status key; only event keys listed
//! under that status reach a handler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use contracts::{EventKey, Handler, HandlerTable, Session, StatusDecoder, StatusTable};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn, Instrument};

use crate::error::DispatcherError;
use crate::metrics::ConsumerMetrics;

/// No status selected yet, nothing is active
const STATUS_UNSET: usize = usize::MAX;

/// Construction parameters for a [`Consumer`]
#[derive(Clone)]
pub struct ConsumerConfig {
    /// Consumer identifier (usually the session id)
    pub id: String,
    /// Handler per event key
    pub handlers: HandlerTable,
    /// Active event keys per status key
    pub statuses: StatusTable,
    /// Turns inbound peer messages into candidate status keys
    pub status_decoder: StatusDecoder,
}

impl ConsumerConfig {
    /// Empty tables, to be filled with [`handler`](Self::handler) and [`status`](Self::status)
    pub fn new(id: impl Into<String>, status_decoder: StatusDecoder) -> Self {
        Self {
            id: id.into(),
            handlers: HandlerTable::new(),
            statuses: StatusTable::new(),
            status_decoder,
        }
    }

    /// Register the handler for `key`
    pub fn handler(mut self, key: impl Into<EventKey>, handler: Handler) -> Self {
        self.handlers.insert(key.into(), handler);
        self
    }

    /// Declare status `key` with the event keys it activates
    pub fn status<I, K>(mut self, key: impl Into<EventKey>, active: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<EventKey>,
    {
        self.statuses
            .insert(key.into(), active.into_iter().map(Into::into).collect());
        self
    }
}

impl std::fmt::Debug for ConsumerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerConfig")
            .field("id", &self.id)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("statuses", &self.statuses)
            .finish_non_exhaustive()
    }
}

/// The engine's view of one connected peer
pub struct Consumer {
    id: String,
    handlers: HandlerTable,
    /// Status keys, indexed by position
    status_keys: Vec<EventKey>,
    /// Active set per status, same index as `status_keys`
    active: Vec<HashSet<EventKey>>,
    status_index: HashMap<EventKey, usize>,
    /// Index into `status_keys`, or `STATUS_UNSET`
    current: AtomicUsize,
    status_decoder: StatusDecoder,
    session: RwLock<Option<Arc<dyn Session>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    metrics: Arc<ConsumerMetrics>,
}

impl Consumer {
    /// Bind a consumer to its session
    ///
    /// The session is shared with the transport, which owns its lifetime.
    pub fn new(config: ConsumerConfig, session: Arc<dyn Session>) -> Self {
        let mut status_keys = Vec::with_capacity(config.statuses.len());
        let mut active = Vec::with_capacity(config.statuses.len());
        let mut status_index = HashMap::with_capacity(config.statuses.len());

        for (status, keys) in config.statuses {
            status_index.insert(status.clone(), status_keys.len());
            status_keys.push(status);
            active.push(keys.into_iter().collect());
        }

        Self {
            id: config.id,
            handlers: config.handlers,
            status_keys,
            active,
            status_index,
            current: AtomicUsize::new(STATUS_UNSET),
            status_decoder: config.status_decoder,
            session: RwLock::new(Some(session)),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            metrics: Arc::new(ConsumerMetrics::new()),
        }
    }

    /// Consumer identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Shared metrics
    pub fn metrics(&self) -> &Arc<ConsumerMetrics> {
        &self.metrics
    }

    /// Currently selected status, `None` while unset
    pub fn current_status(&self) -> Option<&EventKey> {
        self.status_keys.get(self.current.load(Ordering::Acquire))
    }

    /// Check if closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Check if `key` passes the gate right now
    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .get(self.current.load(Ordering::Acquire))
            .is_some_and(|set| set.contains(key))
    }

    /// Route one event through the gate
    ///
    /// Gated events return `Ok(())` without touching the handler or the
    /// session. A failed send closes the consumer.
    pub async fn dispatch(&self, key: &str, payload: &Bytes) -> Result<(), DispatcherError> {
        if self.is_closed() || !self.is_active(key) {
            self.metrics.inc_gated();
            return Ok(());
        }

        let Some(handler) = self.handlers.get(key) else {
            self.metrics.inc_failures();
            return Err(DispatcherError::handler_not_registered(&self.id, key));
        };

        let response = handler(payload).map_err(|e| {
            self.metrics.inc_failures();
            DispatcherError::handler(&self.id, key, e)
        })?;

        let session = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(session) = session else {
            // Closed between the gate check and here
            self.metrics.inc_gated();
            return Ok(());
        };

        if let Err(e) = session.send(response).await {
            self.metrics.inc_failures();
            self.close();
            return Err(DispatcherError::transport(&self.id, e));
        }

        self.metrics.inc_delivered();
        trace!(consumer = %self.id, key, "Event delivered");
        Ok(())
    }

    /// Apply an inbound peer message
    ///
    /// Returns true if it switched the status.
    pub fn apply_inbound(&self, message: &Bytes) -> bool {
        let Some(candidate) = (self.status_decoder)(message) else {
            return false;
        };
        match self.status_index.get(&candidate) {
            Some(&index) => {
                self.current.store(index, Ordering::Release);
                self.metrics.inc_status_changes();
                debug!(consumer = %self.id, status = %candidate, "Status changed");
                true
            }
            None => {
                trace!(consumer = %self.id, key = %candidate, "Ignoring non-status message");
                false
            }
        }
    }

    /// Spawn the receive loop that tracks the peer's status
    ///
    /// Ends on cancellation of `parent`, on [`close`](Self::close), or when the
    /// peer's stream ends. The last case closes the consumer.
    pub fn start(self: &Arc<Self>, parent: CancellationToken) -> JoinHandle<()> {
        let consumer = Arc::clone(self);
        let span = tracing::info_span!("consumer_receive_loop", consumer = %self.id);
        tokio::spawn(async move { consumer.receive_loop(parent).await }.instrument(span))
    }

    async fn receive_loop(&self, parent: CancellationToken) {
        let session = self
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(mut inbound) = session.and_then(|s| s.take_inbound()) else {
            warn!(consumer = %self.id, "Session has no inbound stream, status stays unset");
            return;
        };

        debug!(consumer = %self.id, "Receive loop started");

        loop {
            tokio::select! {
                biased;
                _ = parent.cancelled() => break,
                _ = self.cancel.cancelled() => break,
                message = inbound.recv() => match message {
                    Some(message) => {
                        self.apply_inbound(&message);
                    }
                    None => {
                        info!(consumer = %self.id, "Peer stream ended");
                        self.close();
                        break;
                    }
                },
            }
        }

        debug!(consumer = %self.id, "Receive loop stopped");
    }

    /// Detach the session and make later dispatches no-ops
    ///
    /// Idempotent.
    #[instrument(name = "consumer_close", skip(self), fields(consumer = %self.id))]
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cancel.cancel();
        info!(consumer = %self.id, "Consumer closed");
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("status", &self.current_status())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
