//! JSON envelope shared by the bus and the peer protocol
//!
//! Every message is `{"key": "...", "body": <any json>}`. The body is kept as
//! raw JSON so extraction never re-encodes the payload.

use bytes::Bytes;
use contracts::{
    extractor, status_decoder, ContractError, DecodedEvent, EventKey, KeyExtractor, StatusDecoder,
};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::error::Result;

/// Keyed JSON message
#[derive(Debug, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event or status key
    pub key: EventKey,

    /// Raw JSON body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Box<RawValue>>,
}

/// Message sent by a peer (status switch or request)
pub type ClientRequest = EventEnvelope;

/// Message pushed to a peer
pub type ClientResponse = EventEnvelope;

impl EventEnvelope {
    /// Envelope with a serialized body
    pub fn new<T: Serialize + ?Sized>(key: impl Into<EventKey>, body: &T) -> Result<Self> {
        Ok(Self {
            key: key.into(),
            body: Some(serde_json::value::to_raw_value(body)?),
        })
    }

    /// Envelope with no body
    pub fn bare(key: impl Into<EventKey>) -> Self {
        Self {
            key: key.into(),
            body: None,
        }
    }

    /// Parse an envelope from raw bytes
    pub fn decode(raw: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Serialize to bytes
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Raw body bytes, empty when absent
    pub fn body_bytes(&self) -> Bytes {
        self.body
            .as_ref()
            .map(|b| Bytes::copy_from_slice(b.get().as_bytes()))
            .unwrap_or_default()
    }

    /// Turn into the engine's decoded form
    pub fn into_event(self) -> DecodedEvent {
        let payload = self.body_bytes();
        DecodedEvent {
            key: self.key,
            payload,
        }
    }
}

/// Encode `{key, body}` in one step
pub fn encode_event<T: Serialize + ?Sized>(key: impl Into<EventKey>, body: &T) -> Result<Bytes> {
    EventEnvelope::new(key, body)?.encode()
}

/// Key extractor for bus messages in envelope form
pub fn json_extractor() -> KeyExtractor {
    extractor(|raw| {
        let envelope: EventEnvelope =
            serde_json::from_slice(raw).map_err(|e| ContractError::Decode {
                message: format!("invalid event envelope: {e}"),
                source: Some(Box::new(e)),
            })?;
        Ok(envelope.into_event())
    })
}

/// Status decoder for peer messages in envelope form
///
/// Malformed messages decode to `None` and leave the status untouched.
pub fn json_status_decoder() -> StatusDecoder {
    status_decoder(|raw| EventEnvelope::decode(raw).ok().map(|envelope| envelope.key))
}
