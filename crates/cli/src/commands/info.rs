//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::EngineConfig;
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    dispatcher: DispatcherInfo,
    dedup_window_ms: u64,
    source: SourceInfo,
    consumers: Vec<ConsumerInfo>,
}

#[derive(Serialize)]
struct DispatcherInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    workers: Option<usize>,
    max_consumers: usize,
    worker_queue_capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    dispatch_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct SourceInfo {
    name: String,
    keys: Vec<String>,
    rate_hz: f64,
    burst: u32,
}

#[derive(Serialize)]
struct ConsumerInfo {
    id: String,
    handlers: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    statuses: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    script: Vec<String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    let engine = load_config(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&engine, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&engine, args);
    }

    Ok(())
}

fn to_strings<'a>(keys: impl IntoIterator<Item = &'a contracts::EventKey>) -> Vec<String> {
    keys.into_iter().map(|k| k.to_string()).collect()
}

fn build_config_info(engine: &EngineConfig, args: &InfoArgs) -> ConfigInfo {
    let consumers = engine
        .consumers
        .iter()
        .map(|c| {
            let (statuses, script) = if args.consumers {
                (
                    c.statuses
                        .iter()
                        .map(|(status, keys)| (status.to_string(), to_strings(keys)))
                        .collect(),
                    to_strings(&c.script),
                )
            } else {
                (BTreeMap::new(), Vec::new())
            };
            ConsumerInfo {
                id: c.id.clone(),
                handlers: to_strings(&c.handlers),
                statuses,
                script,
            }
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", engine.version),
        dispatcher: DispatcherInfo {
            workers: engine.dispatcher.workers,
            max_consumers: engine.dispatcher.max_consumers,
            worker_queue_capacity: engine.dispatcher.worker_queue_capacity,
            dispatch_timeout_ms: engine.dispatcher.dispatch_timeout_ms,
        },
        dedup_window_ms: engine.dedup.window_ms,
        source: SourceInfo {
            name: engine.source.name.clone(),
            keys: to_strings(&engine.source.keys),
            rate_hz: engine.source.rate_hz,
            burst: engine.source.burst,
        },
        consumers,
    }
}

fn print_config_info(engine: &EngineConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  eventgate Configuration                     ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let dispatcher = &engine.dispatcher;
    println!("⚙️  Dispatcher");
    println!("   ├─ Version: {:?}", engine.version);
    match dispatcher.workers {
        Some(workers) => println!("   ├─ Workers: {}", workers),
        None => println!("   ├─ Workers: (available parallelism)"),
    }
    println!("   ├─ Max consumers: {}", dispatcher.max_consumers);
    println!("   ├─ Queue capacity: {}", dispatcher.worker_queue_capacity);
    match dispatcher.dispatch_timeout_ms {
        Some(ms) => println!("   └─ Dispatch timeout: {}ms", ms),
        None => println!("   └─ Dispatch timeout: none"),
    }

    println!("\n🧹 Dedup");
    println!("   └─ Window: {}ms", engine.dedup.window_ms);

    let source = &engine.source;
    println!("\n🚰 Source '{}'", source.name);
    println!("   ├─ Keys: {}", to_strings(&source.keys).join(", "));
    println!("   └─ Rate: {} Hz (burst {})", source.rate_hz, source.burst);

    println!("\n👥 Consumers ({})", engine.consumers.len());
    for (i, consumer) in engine.consumers.iter().enumerate() {
        let is_last = i == engine.consumers.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} (handlers: {})",
            prefix,
            consumer.id,
            to_strings(&consumer.handlers).join(", ")
        );

        if args.consumers && !consumer.statuses.is_empty() {
            // Sorted for stable output
            let statuses: BTreeMap<_, _> = consumer
                .statuses
                .iter()
                .map(|(status, keys)| (status.as_str(), keys))
                .collect();
            for (j, (status, keys)) in statuses.iter().enumerate() {
                let status_prefix = if j == statuses.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {}  {} {} -> [{}]",
                    child_prefix,
                    status_prefix,
                    status,
                    to_strings(keys.iter()).join(", ")
                );
            }
            if !consumer.script.is_empty() {
                println!(
                    "   {}     script: {}",
                    child_prefix,
                    to_strings(&consumer.script).join(" → ")
                );
            }
        } else {
            println!("   {}  └─ {} statuses", child_prefix, consumer.statuses.len());
        }
    }

    println!();
}
