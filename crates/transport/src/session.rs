//! ChannelSession - Session backed by a pair of bounded channels
//!
//! The server half implements [`contracts::Session`] and is handed to a
//! consumer. The [`SessionPeer`] half plays the connected client.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use contracts::{ContractError, EventKey, Session};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::codec::EventEnvelope;
use crate::error::{Result, TransportError};

/// Server side of an in-process session
pub struct ChannelSession {
    id: String,
    inbound: Mutex<Option<mpsc::Receiver<Bytes>>>,
    outbound: mpsc::Sender<Bytes>,
    closed: AtomicBool,
    sent_count: AtomicU64,
}

/// Client side of an in-process session
pub struct SessionPeer {
    id: String,
    inbound_tx: mpsc::Sender<Bytes>,
    outbound_rx: mpsc::Receiver<Bytes>,
}

impl ChannelSession {
    /// Create a connected session/peer pair
    ///
    /// `capacity` bounds both directions. A full outbound queue makes
    /// `send` wait, which is how a slow peer backpressures its worker.
    pub fn pair(id: impl Into<String>, capacity: usize) -> (Arc<Self>, SessionPeer) {
        let id = id.into();
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);

        let session = Arc::new(Self {
            id: id.clone(),
            inbound: Mutex::new(Some(inbound_rx)),
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
            sent_count: AtomicU64::new(0),
        });
        let peer = SessionPeer {
            id,
            inbound_tx,
            outbound_rx,
        };
        (session, peer)
    }

    /// Close from the transport side, later sends fail
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(session = %self.id, "ChannelSession closed");
        }
    }

    /// Check if closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Messages delivered to the peer so far
    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Session for ChannelSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>> {
        self.inbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    async fn send(&self, data: Bytes) -> std::result::Result<(), ContractError> {
        if self.is_closed() {
            return Err(ContractError::session_closed(&self.id));
        }
        if self.outbound.send(data).await.is_err() {
            // Peer dropped its receiver
            self.close();
            return Err(ContractError::session_closed(&self.id));
        }
        self.sent_count.fetch_add(1, Ordering::Relaxed);
        trace!(session = %self.id, "ChannelSession send");
        Ok(())
    }
}

impl SessionPeer {
    /// Session identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Send raw bytes to the server
    pub async fn send(&self, data: Bytes) -> Result<()> {
        self.inbound_tx
            .send(data)
            .await
            .map_err(|_| TransportError::channel_closed(&self.id))
    }

    /// Send a bare `{key}` envelope, e.g. a status switch
    pub async fn send_key(&self, key: impl Into<EventKey>) -> Result<()> {
        self.send(EventEnvelope::bare(key).encode()?).await
    }

    /// Wait for the next message pushed by the server
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.outbound_rx.recv().await
    }

    /// Take a pushed message if one is queued
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.outbound_rx.try_recv().ok()
    }

    /// Split into the raw inbound sender and outbound receiver
    pub fn into_parts(self) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        (self.inbound_tx, self.outbound_rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip() {
        let (session, mut peer) = ChannelSession::pair("s1", 4);
        let mut inbound = session.take_inbound().unwrap();
        assert!(session.take_inbound().is_none());

        peer.send_key("active").await.unwrap();
        let msg = inbound.recv().await.unwrap();
        assert_eq!(EventEnvelope::decode(&msg).unwrap().key, "active");

        session.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(peer.recv().await.unwrap(), Bytes::from_static(b"pong"));
        assert_eq!(session.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (session, _peer) = ChannelSession::pair("s1", 4);
        session.close();

        let err = session.send(Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, ContractError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn test_send_after_peer_drop_fails() {
        let (session, peer) = ChannelSession::pair("s1", 4);
        drop(peer);

        assert!(session.send(Bytes::from_static(b"x")).await.is_err());
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_inbound_ends_when_peer_drops() {
        let (session, peer) = ChannelSession::pair("s1", 4);
        let mut inbound = session.take_inbound().unwrap();
        drop(peer);

        assert!(inbound.recv().await.is_none());
    }
}
