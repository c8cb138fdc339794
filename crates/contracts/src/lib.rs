//! # Contracts
//!
//! Frozen interface contracts, defining inter-module data structures and traits.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Event Model
//! - A raw message (`Bytes`) arrives from an [`EventSource`]
//! - A [`KeyExtractor`] turns it into a [`DecodedEvent`] (key + payload)
//! - Each consumer gates the key by its current status and runs a [`Handler`]
//! - The handler's response goes back to the peer through a [`Session`]

mod config;
mod error;
mod event;
mod event_key;
mod session;
mod source;

pub use config::*;
pub use error::*;
pub use event::*;
pub use event_key::EventKey;
pub use session::Session;
pub use source::{EventSource, LocalEventSource, LocalPublisher, Publisher};
