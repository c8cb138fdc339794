//! Session trait - one connected peer, as seen by the routing engine
//!
//! The transport (websocket server, test harness) owns the session. Consumers
//! only borrow it through an `Arc<dyn Session>`, so the trait is object safe.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::ContractError;

/// Bidirectional byte channel to one peer
///
/// # Example
///
/// ```ignore
/// let session: Arc<dyn Session> = server.accept().await?;
/// let mut inbound = session.take_inbound().expect("single reader");
/// while let Some(msg) = inbound.recv().await {
///     session.send(msg).await?; // echo
/// }
/// ```
#[async_trait]
pub trait Session: Send + Sync {
    /// Session identifier (used for logging)
    fn id(&self) -> &str;

    /// Take the stream of messages sent by the peer
    ///
    /// Returns `None` once the stream has been taken. The stream ends when the
    /// peer disconnects.
    fn take_inbound(&self) -> Option<mpsc::Receiver<Bytes>>;

    /// Send one message to the peer
    ///
    /// May wait when the outbound path is backpressured.
    ///
    /// # Errors
    /// `ContractError::SessionClosed` once the transport has closed the session.
    async fn send(&self, data: Bytes) -> Result<(), ContractError>;
}
