//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::load_config;
use crate::cli::RunArgs;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Delay between two status messages of a simulated client script
const SCRIPT_STEP: Duration = Duration::from_secs(1);

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    let mut engine = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Apply CLI overrides
    if let Some(window_ms) = args.window_ms {
        info!(window_ms, "Overriding dedup window from CLI");
        engine.dedup.window_ms = window_ms;
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            anyhow::bail!("--workers must be >= 1");
        }
        info!(workers, "Overriding worker count from CLI");
        engine.dispatcher.workers = Some(workers);
    }

    info!(
        window_ms = engine.dedup.window_ms,
        workers = ?engine.dispatcher.workers,
        source_keys = engine.source.keys.len(),
        consumers = engine.consumers.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&engine);
        return Ok(());
    }

    let pipeline_config = PipelineConfig {
        engine,
        max_events: (args.max_events != 0).then_some(args.max_events),
        timeout: (args.timeout != 0).then(|| Duration::from_secs(args.timeout)),
        sample_interval: Duration::from_millis(args.sample_interval_ms.max(1)),
        script_step: SCRIPT_STEP,
        metrics_port: (args.metrics_port != 0).then_some(args.metrics_port),
    };

    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn(watch_shutdown_signal(shutdown.clone()));

    info!("Starting pipeline...");
    let result = Pipeline::new(pipeline_config).run(shutdown).await;
    signal_task.abort();

    let stats = result.context("Pipeline execution failed")?;
    info!(
        fanned_out = stats.dispatch.totals.fanned_out,
        delivered = stats.total_delivered(),
        duration_secs = stats.duration.as_secs_f64(),
        stop_reason = %stats.stop_reason,
        "Pipeline completed"
    );
    stats.print_summary();

    info!("eventgate finished");
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C or SIGTERM
async fn watch_shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Received shutdown signal, stopping pipeline...");
    shutdown.cancel();
}

/// Print configuration summary for dry-run mode
fn print_config_summary(engine: &contracts::EngineConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Dispatcher:");
    match engine.dispatcher.workers {
        Some(workers) => println!("  Workers: {}", workers),
        None => println!("  Workers: (available parallelism)"),
    }
    println!("  Max consumers: {}", engine.dispatcher.max_consumers);
    println!("  Queue capacity: {}", engine.dispatcher.worker_queue_capacity);

    println!("\nDedup window: {}ms", engine.dedup.window_ms);

    println!("\nSource '{}':", engine.source.name);
    println!("  Keys: {:?}", engine.source.keys);
    println!("  Rate: {} Hz, burst {}", engine.source.rate_hz, engine.source.burst);

    if !engine.consumers.is_empty() {
        println!("\nConsumers ({}):", engine.consumers.len());
        for consumer in &engine.consumers {
            println!(
                "  - {} ({} statuses, {} handlers, {} script steps)",
                consumer.id,
                consumer.statuses.len(),
                consumer.handlers.len(),
                consumer.script.len()
            );
        }
    }

    println!();
}
