//! Dispatcher error types

use std::time::Duration;

use contracts::{BoxError, ContractError, EventKey};
use thiserror::Error;

/// Dispatcher-specific errors
#[derive(Debug, Error)]
pub enum DispatcherError {
    // ===== Construction / lifecycle =====
    /// Builder finished without a key extractor
    #[error("dispatcher requires a key extractor")]
    MissingExtractor,

    /// Registry already holds `max` consumers
    #[error("consumer capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },

    /// Operation not allowed once the fan-out is running
    #[error("dispatcher is already running")]
    AlreadyRunning,

    /// `run` called before `connect`
    #[error("dispatcher has no connected event source")]
    NotConnected,

    // ===== Per-dispatch =====
    /// Key is active for the consumer's status but has no handler
    #[error("consumer '{consumer_id}' has no handler for '{key}'")]
    HandlerNotRegistered { consumer_id: String, key: EventKey },

    /// Handler returned an error
    #[error("handler for '{key}' failed on consumer '{consumer_id}': {source}")]
    Handler {
        consumer_id: String,
        key: EventKey,
        #[source]
        source: BoxError,
    },

    /// Session send failed, the consumer has been closed
    #[error("transport failure on consumer '{consumer_id}': {source}")]
    Transport {
        consumer_id: String,
        #[source]
        source: ContractError,
    },

    /// Dispatch did not finish within the configured timeout
    #[error("dispatch of '{key}' to consumer '{consumer_id}' timed out after {timeout:?}")]
    DispatchTimeout {
        consumer_id: String,
        key: EventKey,
        timeout: Duration,
    },

    // ===== Source / tasks =====
    /// Event source failed to start or stop
    #[error("event source '{source_name}' failed: {source}")]
    Source {
        source_name: String,
        #[source]
        source: ContractError,
    },

    /// A background task panicked or was aborted
    #[error("task '{task}' panicked: {message}")]
    WorkerPanicked { task: String, message: String },

    /// Contract-level error
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),
}

impl DispatcherError {
    /// Create a capacity exceeded error
    pub fn capacity_exceeded(max: usize) -> Self {
        Self::CapacityExceeded { max }
    }

    /// Create a handler-not-registered error
    pub fn handler_not_registered(consumer_id: impl Into<String>, key: impl Into<EventKey>) -> Self {
        Self::HandlerNotRegistered {
            consumer_id: consumer_id.into(),
            key: key.into(),
        }
    }

    /// Create a handler error
    pub fn handler(
        consumer_id: impl Into<String>,
        key: impl Into<EventKey>,
        source: BoxError,
    ) -> Self {
        Self::Handler {
            consumer_id: consumer_id.into(),
            key: key.into(),
            source,
        }
    }

    /// Create a transport error
    pub fn transport(consumer_id: impl Into<String>, source: ContractError) -> Self {
        Self::Transport {
            consumer_id: consumer_id.into(),
            source,
        }
    }

    /// Create a dispatch timeout error
    pub fn dispatch_timeout(
        consumer_id: impl Into<String>,
        key: impl Into<EventKey>,
        timeout: Duration,
    ) -> Self {
        Self::DispatchTimeout {
            consumer_id: consumer_id.into(),
            key: key.into(),
            timeout,
        }
    }

    /// Create an event source error
    pub fn source(source_name: impl Into<String>, source: ContractError) -> Self {
        Self::Source {
            source_name: source_name.into(),
            source,
        }
    }

    /// Create a worker panicked error
    pub fn worker_panicked(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerPanicked {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Whether the error means the consumer's transport is gone
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
