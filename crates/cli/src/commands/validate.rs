//! `validate` command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use contracts::{ClusterKind, MigrationBlueprint, SourceType};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

const BUFFERED_RECORDS_WARNING: usize = 1_000_000;

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
    implementation: String,
    cluster_size: usize,
    source_type: String,
    page_size: usize,
    sink: String,
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

    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => {
            let warnings = collect_warnings(&blueprint);

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
                    version: format!("{:?}", blueprint.version),
                    implementation: blueprint.cluster.implementation.to_string(),
                    cluster_size: blueprint.cluster.size,
                    source_type: format!("{:?}", blueprint.source.source_type),
                    page_size: blueprint.source.page_size,
                    sink: format!("{} ({:?})", blueprint.sink.name, blueprint.sink.sink_type),
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
fn collect_warnings(blueprint: &MigrationBlueprint) -> Vec<String> {
    let mut warnings = Vec::new();
    let cluster = &blueprint.cluster;

    if blueprint.source.source_type == SourceType::Jsonl {
        if let Some(path) = blueprint.source.params.get("path") {
            if !Path::new(path).exists() {
                warnings.push(format!("source.params.path '{}' does not exist yet", path));
            }
        }
    }

    // Every channel full at once
    let buffered = blueprint.source.page_size * cluster.channel_capacity * cluster.size;
    if buffered > BUFFERED_RECORDS_WARNING {
        warnings.push(format!(
            "up to {} records may be buffered in worker channels \
             (page_size x channel_capacity x size)",
            buffered
        ));
    }

    if let Ok(cores) = std::thread::available_parallelism() {
        let oversubscribed =
            cluster.implementation != ClusterKind::Cooperative && cluster.size > cores.get() * 4;
        if oversubscribed {
            warnings.push(format!(
                "cluster.size {} is more than four times the {} available cores",
                cluster.size, cores
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Implementation: {}", summary.implementation);
            println!("  Workers: {}", summary.cluster_size);
            println!("  Source: {} (pages of {})", summary.source_type, summary.page_size);
            println!("  Sink: {}", summary.sink);
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
