//! # Transport
//!
//! In-process transports for the event engine.
//!
//! Responsibilities:
//! - JSON `{key, body}` envelope, key extractor and status decoder
//! - Channel-backed `EventSource`, `Publisher` and `Session` implementations
//! - Publishing through a `DedupCache` (`DedupPublisher`)
//! - Mock event source for demos and tests
//!
//! ## Usage Example
//!
//! ```ignore
//! use transport::{json_extractor, ChannelPublisher, ChannelSession, DedupPublisher};
//!
//! let (publisher, source) = ChannelPublisher::bus("bus", 100);
//! let publisher = DedupPublisher::new(publisher, cache);
//! publisher.publish("disk_full", encode_event("disk_full", &body)?).await?;
//!
//! let (session, mut peer) = ChannelSession::pair("client-1", 16);
//! dispatcher.connect("client-1", session)?;
//! ```

mod codec;
mod error;
mod mock;
mod publisher;
mod session;
mod source;

// Re-exports
pub use codec::{
    encode_event, json_extractor, json_status_decoder, ClientRequest, ClientResponse,
    EventEnvelope,
};
pub use error::{Result, TransportError};
pub use mock::{MockEventSource, MockSourceConfig, MockSourceStats};
pub use publisher::{ChannelPublisher, DedupPublisher, LogPublisher, PublishOutcome};
pub use session::{ChannelSession, SessionPeer};
pub use source::ChannelSource;
