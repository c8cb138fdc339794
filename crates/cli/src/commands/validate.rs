//! `validate` command implementation.

use std::collections::HashSet;

use anyhow::{Context, Result};
use contracts::EngineConfig;
use serde::Serialize;
use tracing::info;

use super::load_config;
use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    workers: Option<usize>,
    window_ms: u64,
    source_keys: usize,
    consumer_count: usize,
    status_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    match load_config(&args.config) {
        Ok(engine) => {
            let warnings = collect_warnings(&engine);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", engine.version),
                    workers: engine.dispatcher.workers,
                    window_ms: engine.dedup.window_ms,
                    source_keys: engine.source.keys.len(),
                    consumer_count: engine.consumers.len(),
                    status_count: engine.consumers.iter().map(|c| c.statuses.len()).sum(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(engine: &EngineConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if engine.consumers.is_empty() {
        warnings.push("No consumers configured - every event will be dropped".to_string());
    }

    for consumer in &engine.consumers {
        if consumer.script.is_empty() {
            warnings.push(format!(
                "Consumer '{}' has an empty script - it never leaves the unset status",
                consumer.id
            ));
        }
        for status in &consumer.script {
            if !consumer.statuses.contains_key(status) {
                warnings.push(format!(
                    "Consumer '{}' script uses unknown status '{}' - it will be ignored",
                    consumer.id, status
                ));
            }
        }
    }

    // Source keys no consumer status ever activates
    let active: HashSet<&str> = engine
        .consumers
        .iter()
        .flat_map(|c| c.statuses.values())
        .flatten()
        .map(|k| k.as_str())
        .collect();
    for key in &engine.source.keys {
        if !active.contains(key.as_str()) {
            warnings.push(format!(
                "Source key '{}' is not active in any consumer status",
                key
            ));
        }
    }

    if engine.source.burst > 1 && engine.dedup.window_ms as f64 * engine.source.rate_hz < 1.0 {
        warnings.push(
            "dedup.window_ms is shorter than the source tick - bursts may still pass".to_string(),
        );
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            match summary.workers {
                Some(workers) => println!("  Workers: {}", workers),
                None => println!("  Workers: (auto)"),
            }
            println!("  Dedup window: {}ms", summary.window_ms);
            println!("  Source keys: {}", summary.source_keys);
            println!("  Consumers: {}", summary.consumer_count);
            println!("  Statuses: {}", summary.status_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    const VALID: &str = r#"
[dedup]
window_ms = 500

[source]
keys = ["order_updated", "price_tick"]
rate_hz = 20.0
burst = 3

[[consumers]]
id = "desk-1"
handlers = ["order_updated"]
script = ["watching", "paused"]

[consumers.statuses]
idle = []
watching = ["order_updated"]
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(VALID);
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        let result = validate_config(&args);
        assert!(result.valid, "error: {:?}", result.error);

        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("unknown status 'paused'")));
        assert!(warnings.iter().any(|w| w.contains("'price_tick' is not active")));
        assert_eq!(result.summary.unwrap().consumer_count, 1);
    }

    #[test]
    fn test_missing_file() {
        let args = ValidateArgs {
            config: PathBuf::from("/nonexistent/eventgate.toml"),
            json: false,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("not found"));
        assert!(run_validate(&args).is_err());
    }

    #[test]
    fn test_invalid_window() {
        let file = write_config(&VALID.replace("window_ms = 500", "window_ms = 0"));
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: false,
        };
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("window_ms"));
    }
}
