//! Decoded events and the integrator-supplied callbacks that produce and consume them.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::{BoxError, ContractError, EventKey};

/// One message from the event source after key extraction.
///
/// Produced once per raw message and shared read-only by every consumer it is
/// fanned out to. `Bytes` is immutable, so no consumer can alter the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    /// Event class
    pub key: EventKey,
    /// Event body, passed untouched to handlers
    pub payload: Bytes,
}

impl DecodedEvent {
    /// Create a decoded event
    pub fn new(key: impl Into<EventKey>, payload: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Splits a raw source message into key and payload.
///
/// Invoked once per message, serially, before fan-out. A decode error drops
/// only that message.
pub type KeyExtractor = Arc<dyn Fn(&Bytes) -> Result<DecodedEvent, ContractError> + Send + Sync>;

/// Business handler for one event key: payload in, response bytes out.
pub type Handler = Arc<dyn Fn(&Bytes) -> Result<Bytes, BoxError> + Send + Sync>;

/// Decodes a message sent by the connected peer into a candidate key.
///
/// Returns `None` for messages that carry no recognizable key.
pub type StatusDecoder = Arc<dyn Fn(&Bytes) -> Option<EventKey> + Send + Sync>;

/// Handler per event key
pub type HandlerTable = HashMap<EventKey, Handler>;

/// Active event keys per status key
pub type StatusTable = HashMap<EventKey, Vec<EventKey>>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Bytes) -> Result<Bytes, BoxError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`KeyExtractor`].
pub fn extractor<F>(f: F) -> KeyExtractor
where
    F: Fn(&Bytes) -> Result<DecodedEvent, ContractError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`StatusDecoder`].
pub fn status_decoder<F>(f: F) -> StatusDecoder
where
    F: Fn(&Bytes) -> Option<EventKey> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoded_event_shares_payload() {
        let event = DecodedEvent::new("tick", Bytes::from_static(b"42"));
        let copy = event.clone();
        assert_eq!(event.payload.as_ptr(), copy.payload.as_ptr());
        assert_eq!(copy.key, "tick");
    }

    #[test]
    fn test_handler_wrapper() {
        let h = handler(|payload| Ok(Bytes::from(payload.to_vec().repeat(2))));
        let out = h(&Bytes::from_static(b"ab")).unwrap();
        assert_eq!(&out[..], b"abab");
    }

    #[test]
    fn test_extractor_error_passthrough() {
        let x = extractor(|raw| {
            if raw.is_empty() {
                Err(ContractError::decode("empty message"))
            } else {
                Ok(DecodedEvent::new("k", raw.clone()))
            }
        });
        assert!(x(&Bytes::new()).is_err());
        assert_eq!(x(&Bytes::from_static(b"x")).unwrap().key, "k");
    }
}
