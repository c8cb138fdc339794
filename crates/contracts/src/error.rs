//! Layered error definitions
//!
//! Categorized by source: config / decode / session / source / publisher

use thiserror::Error;

/// Boxed error returned by integrator-supplied callbacks (handlers, codecs).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Decode Errors =====
    /// Raw message could not be decoded into an event
    #[error("decode error: {message}")]
    Decode {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    // ===== Session Errors =====
    /// Session is closed, no more sends are accepted
    #[error("session '{session_id}' is closed")]
    SessionClosed { session_id: String },

    /// Session send/receive failure
    #[error("session '{session_id}' error: {message}")]
    Session { session_id: String, message: String },

    // ===== Source / Publisher Errors =====
    /// Event source error
    #[error("event source '{source_name}' error: {message}")]
    Source {
        source_name: String,
        message: String,
    },

    /// Publisher error
    #[error("publisher '{publisher_name}' error: {message}")]
    Publisher {
        publisher_name: String,
        message: String,
    },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
            source: None,
        }
    }

    /// Create session closed error
    pub fn session_closed(session_id: impl Into<String>) -> Self {
        Self::SessionClosed {
            session_id: session_id.into(),
        }
    }

    /// Create session error
    pub fn session(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Session {
            session_id: session_id.into(),
            message: message.into(),
        }
    }

    /// Create event source error
    pub fn source(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create publisher error
    pub fn publisher(publisher_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Publisher {
            publisher_name: publisher_name.into(),
            message: message.into(),
        }
    }
}
