//! EventSource / Publisher traits - the two ends of the upstream event bus
//!
//! Defines the abstract interfaces for broker subscriptions and publishers.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::ContractError;

/// Upstream event stream (a queue or broker subscription)
///
/// The dispatcher only needs `run → stream of raw bytes → close`.
#[trait_variant::make(EventSource: Send)]
pub trait LocalEventSource {
    /// Source name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Start the subscription
    ///
    /// # Errors
    /// Returns connection error (should include context)
    async fn run(&mut self) -> Result<(), ContractError>;

    /// Hand over the raw message stream
    ///
    /// The stream has a single reader. Calling twice is an error.
    fn stream(&mut self) -> Result<mpsc::Receiver<Bytes>, ContractError>;

    /// Stop the subscription and release resources
    async fn close(&mut self) -> Result<(), ContractError>;
}

/// Producer side of the event bus
///
/// Messages should carry a key and a body, see the JSON envelope in the
/// `transport` crate. Route bursts through a dedup cache before `send`.
#[trait_variant::make(Publisher: Send)]
pub trait LocalPublisher {
    /// Publisher name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Connect to the broker
    async fn run(&mut self) -> Result<(), ContractError>;

    /// Publish one message
    async fn send(&self, data: Bytes) -> Result<(), ContractError>;

    /// Flush and disconnect
    async fn close(&mut self) -> Result<(), ContractError>;
}
