//! Dedup error types

use std::time::Duration;

use thiserror::Error;

/// Dedup-specific errors
#[derive(Debug, Error)]
pub enum DedupError {
    /// Window below the 1ms floor
    #[error("dedup window {window:?} is below the 1ms minimum")]
    WindowTooSmall { window: Duration },
}

impl DedupError {
    /// Create a window too small error
    pub fn window_too_small(window: Duration) -> Self {
        Self::WindowTooSmall { window }
    }
}
