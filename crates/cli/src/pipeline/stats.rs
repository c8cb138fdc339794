//! Pipeline statistics and metrics.

use std::fmt;
use std::time::Duration;

use dedup::DedupSnapshot;
use dispatcher::ConsumerSnapshot;
use observability::MetricsSummary;

use super::client::ClientStats;

/// Why the pipeline stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// Ctrl-C / SIGTERM
    #[default]
    Signal,
    /// `--timeout` elapsed
    Timeout,
    /// `--max-events` reached
    MaxEvents,
    /// The event source ended on its own
    SourceExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::Signal => "shutdown signal",
            StopReason::Timeout => "timeout",
            StopReason::MaxEvents => "max events reached",
            StopReason::SourceExhausted => "source exhausted",
        };
        f.write_str(s)
    }
}

/// Mock source counters at shutdown
#[derive(Debug, Clone, Copy, Default)]
pub struct SourceTotals {
    pub generated: u64,
    pub published: u64,
    pub suppressed: u64,
}

/// Per-consumer outcome
#[derive(Debug, Clone, Default)]
pub struct ConsumerReport {
    pub id: String,
    pub status: Option<String>,
    pub metrics: ConsumerSnapshot,
    pub client: ClientStats,
}

/// Statistics from a pipeline run
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total duration of the pipeline run
    pub duration: Duration,

    /// What ended the run
    pub stop_reason: StopReason,

    /// Fan-out totals and sampled rates
    pub dispatch: MetricsSummary,

    /// Mock source counters
    pub source: SourceTotals,

    /// Dedup cache counters
    pub dedup: DedupSnapshot,

    /// Dedup window in effect
    pub dedup_window: Duration,

    /// One entry per consumer, in registration order
    pub consumers: Vec<ConsumerReport>,

    /// Errors collected while closing the dispatcher
    pub close_errors: usize,
}

impl PipelineStats {
    /// Fanned-out events per second over the whole run
    pub fn events_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.dispatch.totals.fanned_out as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Responses delivered to all consumers
    pub fn total_delivered(&self) -> u64 {
        self.consumers.iter().map(|c| c.metrics.delivered).sum()
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════╗");
        println!("║                    Pipeline Statistics                       ║");
        println!("╚══════════════════════════════════════════════════════════════╝\n");

        println!("📊 Overview");
        println!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        println!("   ├─ Stopped by: {}", self.stop_reason);
        println!("   ├─ Events fanned out: {}", self.dispatch.totals.fanned_out);
        println!("   ├─ Events/s: {:.2}", self.events_per_sec());
        println!("   ├─ Responses delivered: {}", self.total_delivered());
        println!("   └─ Close errors: {}", self.close_errors);

        println!("\n🚰 Source & Dedup");
        println!("   ├─ Generated: {}", self.source.generated);
        println!("   ├─ Published: {}", self.source.published);
        println!("   ├─ Suppressed: {}", self.source.suppressed);
        println!("   ├─ Window: {:?}", self.dedup_window);
        println!("   ├─ Cache clears: {}", self.dedup.clear_count);
        println!(
            "   └─ Suppression ratio: {:.2}%",
            self.dedup.suppression_ratio() * 100.0
        );

        println!("\n📈 Dispatcher");
        for line in self.dispatch.to_string().lines().skip(1) {
            println!("   │ {}", line);
        }

        if !self.consumers.is_empty() {
            println!("\n👥 Consumers ({})", self.consumers.len());
            for (i, consumer) in self.consumers.iter().enumerate() {
                let is_last = i == self.consumers.len() - 1;
                let prefix = if is_last { "└─" } else { "├─" };
                println!(
                    "   {} {} [{}] delivered={} gated={} failures={} status_changes={} responses_seen={}",
                    prefix,
                    consumer.id,
                    consumer.status.as_deref().unwrap_or("-"),
                    consumer.metrics.delivered,
                    consumer.metrics.gated,
                    consumer.metrics.failures,
                    consumer.metrics.status_changes,
                    consumer.client.responses,
                );
            }
        }

        println!();
    }
}
