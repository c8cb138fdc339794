//! DedupCache - fixed-window admission control
//!
//! Collapses repeated occurrences of the same key into one admitted
//! occurrence per window. The window is cleared wholesale by a background
//! ticker, there is no per-key expiry.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use contracts::{EventKey, MIN_DEDUP_WINDOW};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::DedupError;
use crate::metrics::DedupMetrics;

/// State shared with the ticker task
#[derive(Debug, Default)]
struct Shared {
    /// Keys admitted in the current window
    window: Mutex<HashSet<EventKey>>,
    metrics: DedupMetrics,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, HashSet<EventKey>> {
        // A panicking holder cannot leave the set half-updated.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Swap in an empty window, returns how many keys were dropped
    fn clear(&self) -> usize {
        let previous = std::mem::take(&mut *self.lock());
        self.metrics.inc_clear_count();
        previous.len()
    }
}

/// Time-windowed deduplication cache
///
/// # Example
///
/// ```ignore
/// let cache = Arc::new(DedupCache::new(Duration::from_millis(500))?);
/// cache.run();
///
/// if cache.allowed("disk_full") {
///     publisher.send(message).await?;
/// }
///
/// cache.close().await;
/// ```
#[derive(Debug)]
pub struct DedupCache {
    shared: Arc<Shared>,
    /// Current window length, watched by the ticker
    period: watch::Sender<Duration>,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl DedupCache {
    /// Create a cache with the given window length
    ///
    /// # Errors
    /// `DedupError::WindowTooSmall` for windows under one millisecond.
    pub fn new(window: Duration) -> Result<Self, DedupError> {
        Self::with_cancel(window, CancellationToken::new())
    }

    /// Create a cache whose ticker also stops when `cancel` fires
    ///
    /// The cache holds a child of `cancel`; closing or dropping it never
    /// cancels the caller's token.
    pub fn with_cancel(window: Duration, cancel: CancellationToken) -> Result<Self, DedupError> {
        if window < MIN_DEDUP_WINDOW {
            return Err(DedupError::window_too_small(window));
        }
        let (period, _) = watch::channel(window);

        Ok(Self {
            shared: Arc::new(Shared::default()),
            period,
            cancel: cancel.child_token(),
            ticker: Mutex::new(None),
        })
    }

    /// Returns true the first time `key` is seen in the current window
    ///
    /// Check and insert happen under one lock, so concurrent first calls for
    /// the same key admit exactly one caller.
    pub fn allowed(&self, key: &str) -> bool {
        let admitted = {
            let mut window = self.shared.lock();
            if window.contains(key) {
                false
            } else {
                window.insert(EventKey::from(key));
                true
            }
        };

        if admitted {
            self.shared.metrics.inc_admitted_count();
        } else {
            self.shared.metrics.inc_suppressed_count();
            trace!(key, "Duplicate suppressed");
        }
        admitted
    }

    /// Un-admit `key` for the rest of the current window
    ///
    /// Used when the publish that followed a successful [`allowed`](Self::allowed)
    /// failed. Returns false if `key` was not admitted.
    pub fn release(&self, key: &str) -> bool {
        let released = self.shared.lock().remove(key);
        if released {
            trace!(key, "Dedup key released");
        }
        released
    }

    /// Drop every admitted key, all keys become eligible again
    pub fn clear(&self) {
        let dropped = self.shared.clear();
        debug!(dropped, "Dedup window cleared");
    }

    /// Change the window length going forward
    ///
    /// Returns false (and keeps the current window) for sub-millisecond
    /// durations. A running ticker is re-armed with the new period.
    #[instrument(name = "dedup_update_online", skip(self))]
    pub fn update_online(&self, window: Duration) -> bool {
        if window < MIN_DEDUP_WINDOW {
            warn!(
                requested_us = window.as_micros() as u64,
                "Ignoring dedup window below 1ms"
            );
            return false;
        }
        let previous = self.period.send_replace(window);
        info!(
            previous_ms = previous.as_millis() as u64,
            window_ms = window.as_millis() as u64,
            "Dedup window updated"
        );
        true
    }

    /// Current window length
    pub fn window(&self) -> Duration {
        *self.period.borrow()
    }

    /// Number of keys admitted in the current window
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// True when nothing has been admitted in the current window
    pub fn is_empty(&self) -> bool {
        self.shared.lock().is_empty()
    }

    /// Get current metrics
    pub fn metrics(&self) -> &DedupMetrics {
        &self.shared.metrics
    }

    /// Start the background ticker that clears the window once per period
    ///
    /// Calling it while the ticker is running is a no-op.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime.
    #[instrument(name = "dedup_run", skip(self))]
    pub fn run(&self) {
        let mut ticker = self.ticker.lock().unwrap_or_else(PoisonError::into_inner);
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Dedup ticker already running");
            return;
        }

        let handle = tokio::spawn(ticker_loop(
            Arc::clone(&self.shared),
            self.period.subscribe(),
            self.cancel.clone(),
        ));
        *ticker = Some(handle);

        info!(
            window_ms = self.window().as_millis() as u64,
            "Dedup ticker started"
        );
    }

    /// Stop the ticker and wait for it to exit
    #[instrument(name = "dedup_close", skip(self))]
    pub async fn close(&self) {
        self.cancel.cancel();

        let handle = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = ?e, "Dedup ticker panicked");
            }
        }

        info!("Dedup cache closed");
    }
}

impl Drop for DedupCache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Clears the window every period, re-arming whenever the period changes
async fn ticker_loop(
    shared: Arc<Shared>,
    mut period_rx: watch::Receiver<Duration>,
    cancel: CancellationToken,
) {
    loop {
        let period = *period_rx.borrow_and_update();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Dedup ticker stopped");
                    return;
                }
                changed = period_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    let dropped = shared.clear();
                    trace!(dropped, "Dedup window expired");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_allowed_once_per_window() {
        let cache = DedupCache::new(Duration::from_millis(500)).unwrap();

        assert!(cache.allowed("disk_full"));
        assert!(!cache.allowed("disk_full"));
        assert!(!cache.allowed("disk_full"));
        assert!(cache.allowed("cpu_high"));

        let snapshot = cache.metrics().snapshot();
        assert_eq!(snapshot.admitted_count, 2);
        assert_eq!(snapshot.suppressed_count, 2);
    }

    #[test]
    fn test_clear_resets_window() {
        let cache = DedupCache::new(Duration::from_millis(500)).unwrap();

        assert!(cache.allowed("k"));
        assert!(!cache.allowed("k"));
        assert_eq!(cache.len(), 1);

        cache.clear();

        assert!(cache.is_empty());
        assert!(cache.allowed("k"));
        assert_eq!(cache.metrics().clear_count(), 1);
    }

    #[test]
    fn test_release_readmits_key() {
        let cache = DedupCache::new(Duration::from_millis(500)).unwrap();

        assert!(!cache.release("k"));
        assert!(cache.allowed("k"));
        assert!(cache.release("k"));
        assert!(cache.allowed("k"));
        assert!(!cache.allowed("k"));
    }

    #[test]
    fn test_concurrent_first_calls_admit_exactly_one() {
        const THREADS: usize = 16;

        let cache = Arc::new(DedupCache::new(Duration::from_secs(60)).unwrap());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..100).filter(|_| cache.allowed("same_key")).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn test_rejects_sub_millisecond_window() {
        let result = DedupCache::new(Duration::from_micros(500));
        assert!(matches!(result, Err(DedupError::WindowTooSmall { .. })));
    }

    #[test]
    fn test_update_online_ignores_tiny_windows() {
        let cache = DedupCache::new(Duration::from_millis(500)).unwrap();

        assert!(!cache.update_online(Duration::from_micros(10)));
        assert_eq!(cache.window(), Duration::from_millis(500));

        assert!(cache.update_online(Duration::from_millis(60)));
        assert_eq!(cache.window(), Duration::from_millis(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_clears_window() {
        let cache = DedupCache::new(Duration::from_millis(100)).unwrap();
        cache.run();

        assert!(cache.allowed("k"));
        assert!(!cache.allowed("k"));

        time::sleep(Duration::from_millis(150)).await;

        assert!(cache.allowed("k"));
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_online_rearms_ticker() {
        let cache = DedupCache::new(Duration::from_secs(10)).unwrap();
        cache.run();
        assert!(cache.allowed("k"));

        assert!(cache.update_online(Duration::from_millis(50)));
        time::sleep(Duration::from_millis(100)).await;

        assert!(cache.allowed("k"));
        cache.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_ticker() {
        let cache = DedupCache::new(Duration::from_millis(100)).unwrap();
        cache.run();
        cache.close().await;

        assert!(cache.allowed("k"));
        time::sleep(Duration::from_secs(1)).await;

        assert!(!cache.allowed("k"));
        assert_eq!(cache.metrics().clear_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_and_drop_leave_parent_token_live() {
        let parent = CancellationToken::new();

        let cache = DedupCache::with_cancel(Duration::from_millis(10), parent.clone()).unwrap();
        cache.run();
        cache.close().await;
        assert!(!parent.is_cancelled());

        let cache = DedupCache::with_cancel(Duration::from_millis(10), parent.clone()).unwrap();
        cache.run();
        drop(cache);
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_ticker() {
        let parent = CancellationToken::new();
        let cache = DedupCache::with_cancel(Duration::from_millis(100), parent.clone()).unwrap();
        cache.run();

        parent.cancel();
        cache.close().await;

        assert!(cache.allowed("k"));
        time::sleep(Duration::from_secs(1)).await;
        assert!(!cache.allowed("k"));
        assert_eq!(cache.metrics().clear_count(), 0);
    }
}
