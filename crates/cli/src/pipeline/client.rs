//! Simulated client behind a ChannelSession
//!
//! 依次发送脚本中的状态消息（每步间隔 `step`），同时持续读取推送的
//! ClientResponse，避免会话通道被写满。

use std::collections::BTreeMap;
use std::time::Duration;

use contracts::EventKey;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use transport::{ClientResponse, SessionPeer};

/// Counters kept by one simulated client
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Status messages sent
    pub requests: u64,
    /// Well-formed responses received
    pub responses: u64,
    /// Responses that failed to decode
    pub malformed: u64,
    /// Responses per event key
    pub by_key: BTreeMap<String, u64>,
}

/// Replay `script` and drain responses until the session ends or `cancel` fires
pub async fn simulate_client(
    mut peer: SessionPeer,
    script: Vec<EventKey>,
    step: Duration,
    cancel: CancellationToken,
) -> ClientStats {
    let mut stats = ClientStats::default();
    let mut script = script.into_iter();
    let mut next_step = tokio::time::Instant::now();
    let mut next_status = script.next();

    loop {
        let due = next_status.as_ref().map(|_| next_step);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = peer.recv() => match msg {
                Some(raw) => match ClientResponse::decode(&raw) {
                    Ok(response) => {
                        stats.responses += 1;
                        *stats.by_key.entry(response.key.to_string()).or_default() += 1;
                        trace!(client = %peer.id(), key = %response.key, "Response received");
                    }
                    Err(e) => {
                        stats.malformed += 1;
                        warn!(client = %peer.id(), error = %e, "Malformed response");
                    }
                },
                None => {
                    debug!(client = %peer.id(), "Session closed by server");
                    break;
                }
            },
            _ = sleep_until_opt(due) => {
                if let Some(status) = next_status.take() {
                    if let Err(e) = peer.send_key(status.clone()).await {
                        warn!(client = %peer.id(), error = %e, "Failed to send status");
                        break;
                    }
                    stats.requests += 1;
                    debug!(client = %peer.id(), status = %status, "Status switched");
                    next_step += step;
                    next_status = script.next();
                }
            }
        }
    }

    stats
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
