//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use contracts::MigrationBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    cluster: ClusterInfo,
    source: EndpointInfo,
    sink: EndpointInfo,
}

#[derive(Serialize)]
struct ClusterInfo {
    implementation: String,
    size: usize,
    channel_capacity: usize,
    startup_timeout_secs: u64,
    serializes_batches: bool,
}

#[derive(Serialize)]
struct EndpointInfo {
    name: String,
    kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_size: Option<usize>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    params: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    let info = build_config_info(&blueprint);
    if args.json {
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&info);
    }

    Ok(())
}

fn build_config_info(blueprint: &MigrationBlueprint) -> ConfigInfo {
    let cluster = &blueprint.cluster;

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        cluster: ClusterInfo {
            implementation: cluster.implementation.to_string(),
            size: cluster.size,
            channel_capacity: cluster.channel_capacity,
            startup_timeout_secs: cluster.startup_timeout_secs,
            serializes_batches: cluster.implementation.requires_serialization(),
        },
        source: EndpointInfo {
            name: "source".to_string(),
            kind: format!("{:?}", blueprint.source.source_type).to_lowercase(),
            page_size: Some(blueprint.source.page_size),
            params: blueprint.source.params.clone().into_iter().collect(),
        },
        sink: EndpointInfo {
            name: blueprint.sink.name.clone(),
            kind: format!("{:?}", blueprint.sink.sink_type).to_lowercase(),
            page_size: None,
            params: blueprint.sink.params.clone().into_iter().collect(),
        },
    }
}

fn print_config_info(info: &ConfigInfo) {
    println!("\n=== Migrator Configuration ===\n");
    println!("Version: {}", info.version);

    println!("\nCluster:");
    println!("  Implementation: {}", info.cluster.implementation);
    println!("  Workers: {}", info.cluster.size);
    println!("  Channel capacity: {} batches", info.cluster.channel_capacity);
    println!("  Startup timeout: {}s", info.cluster.startup_timeout_secs);
    if info.cluster.serializes_batches {
        println!("  Batches are serialized over worker pipes");
    }

    for (label, endpoint) in [("Source", &info.source), ("Sink", &info.sink)] {
        println!("\n{}: {} ({})", label, endpoint.name, endpoint.kind);
        if let Some(page_size) = endpoint.page_size {
            println!("  Page size: {}", page_size);
        }
        for (key, value) in &endpoint.params {
            println!("  {} = {}", key, value);
        }
    }

    println!();
}
