//! ChannelSource - EventSource over an in-process channel

use bytes::Bytes;
use contracts::{ContractError, EventSource};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument};

/// Event source fed by an mpsc channel
///
/// Stands in for a broker subscription in tests and single-process setups.
pub struct ChannelSource {
    name: String,
    rx: Option<mpsc::Receiver<Bytes>>,
    running: bool,
}

impl ChannelSource {
    /// Wrap an existing receiver
    pub fn new(name: impl Into<String>, rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            name: name.into(),
            rx: Some(rx),
            running: false,
        }
    }

    /// Create a source plus the sender that feeds it
    pub fn pair(name: impl Into<String>, capacity: usize) -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(name, rx))
    }

    /// Check if `run` has been called and `close` has not
    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl EventSource for ChannelSource {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "channel_source_run", skip(self), fields(source = %self.name))]
    async fn run(&mut self) -> Result<(), ContractError> {
        self.running = true;
        info!(source = %self.name, "ChannelSource running");
        Ok(())
    }

    fn stream(&mut self) -> Result<mpsc::Receiver<Bytes>, ContractError> {
        self.rx
            .take()
            .ok_or_else(|| ContractError::source(&self.name, "stream already taken"))
    }

    #[instrument(name = "channel_source_close", skip(self), fields(source = %self.name))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.running = false;
        self.rx = None;
        debug!(source = %self.name, "ChannelSource closed");
        Ok(())
    }
}
