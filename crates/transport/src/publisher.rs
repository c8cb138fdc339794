//! Publishers - producer side of the bus
//!
//! Contains ChannelPublisher, LogPublisher and the DedupPublisher middleware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use contracts::{ContractError, Publisher};
use dedup::DedupCache;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace};

use crate::source::ChannelSource;

/// Publisher that forwards into an mpsc channel
pub struct ChannelPublisher {
    name: String,
    tx: mpsc::Sender<Bytes>,
}

impl ChannelPublisher {
    /// Wrap an existing sender
    pub fn new(name: impl Into<String>, tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            name: name.into(),
            tx,
        }
    }

    /// In-process bus: everything sent here comes out of the returned source
    pub fn bus(name: impl Into<String>, capacity: usize) -> (Self, ChannelSource) {
        let name = name.into();
        let (tx, source) = ChannelSource::pair(name.clone(), capacity);
        (Self::new(name, tx), source)
    }
}

impl Publisher for ChannelPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), ContractError> {
        debug!(publisher = %self.name, "ChannelPublisher running");
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), ContractError> {
        self.tx
            .send(data)
            .await
            .map_err(|_| ContractError::publisher(&self.name, "bus closed"))
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        debug!(publisher = %self.name, "ChannelPublisher closed");
        Ok(())
    }
}

/// Publisher that only logs, for dry runs
pub struct LogPublisher {
    name: String,
    sent_count: AtomicU64,
}

impl LogPublisher {
    /// Create a new LogPublisher with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent_count: AtomicU64::new(0),
        }
    }

    /// Messages accepted so far
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }
}

impl Publisher for LogPublisher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self) -> Result<(), ContractError> {
        info!(publisher = %self.name, "LogPublisher running");
        Ok(())
    }

    async fn send(&self, data: Bytes) -> Result<(), ContractError> {
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        debug!(
            publisher = %self.name,
            bytes = data.len(),
            message = %String::from_utf8_lossy(&data),
            "LogPublisher send"
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        info!(publisher = %self.name, sent = self.sent_count(), "LogPublisher closed");
        Ok(())
    }
}

/// Result of a deduplicated publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// First sighting in the window, sent to the broker
    Sent,
    /// Duplicate within the window, dropped
    Suppressed,
}

/// Publishing middleware that consults a DedupCache before sending
pub struct DedupPublisher<P> {
    inner: P,
    cache: Arc<DedupCache>,
}

impl<P: Publisher> DedupPublisher<P> {
    /// Wrap `inner`, admitting each key at most once per cache window
    pub fn new(inner: P, cache: Arc<DedupCache>) -> Self {
        Self { inner, cache }
    }

    /// Send `data` unless `key` was already published in this window
    ///
    /// A failed send releases `key` again so a retry is not suppressed.
    #[instrument(name = "dedup_publish", skip(self, data), fields(publisher = %self.inner.name()))]
    pub async fn publish(&self, key: &str, data: Bytes) -> Result<PublishOutcome, ContractError> {
        if !self.cache.allowed(key) {
            trace!(key, "Publish suppressed");
            return Ok(PublishOutcome::Suppressed);
        }
        if let Err(e) = self.inner.send(data).await {
            self.cache.release(key);
            return Err(e);
        }
        Ok(PublishOutcome::Sent)
    }

    /// Shared dedup cache
    pub fn cache(&self) -> &Arc<DedupCache> {
        &self.cache
    }

    /// Wrapped publisher
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Unwrap the publisher
    pub fn into_inner(self) -> P {
        self.inner
    }
}
