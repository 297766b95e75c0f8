pub mod classify;
pub mod test_gateway;
pub mod timeline;
pub mod trace;

use crate::config::{AppConfig, GatewayBackend, MixingPolicy};
use crate::errors::{AppError, AppResult};
use crate::gateway::{self, GatewayClient};
use crate::tracer::{TraceBudget, Tracer};
use clap::Args;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ===== Shared Arguments =====

/// Configuration and gateway overrides shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GatewayArgs {
    /// Configuration file (defaults to ./config.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Gateway backend: bitcoin_core, esplora or snapshot (overrides config.toml)
    #[arg(long)]
    pub backend: Option<GatewayBackend>,

    /// Gateway URL (overrides config.toml)
    #[arg(long)]
    pub gateway_url: Option<String>,

    /// Ledger snapshot JSON file; implies the snapshot backend
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Bitcoin network for address seeds (overrides config.toml)
    #[arg(long)]
    pub network: Option<String>,
}

impl GatewayArgs {
    /// Load configuration and apply command-line overrides
    pub fn load_config(&self) -> AppResult<AppConfig> {
        let mut config = AppConfig::load_from(self.config.as_deref())?;

        if let Some(backend) = self.backend {
            config.gateway.backend = backend;
        }
        if let Some(url) = &self.gateway_url {
            config.gateway.url = url.clone();
        }
        if let Some(path) = &self.snapshot {
            config.gateway.backend = GatewayBackend::Snapshot;
            config.gateway.snapshot_path = Some(path.clone());
        }
        if let Some(network) = &self.network {
            config.tracer.network = network.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Connect the configured gateway and wire a tracer over it
    pub async fn tracer(&self) -> AppResult<(AppConfig, Tracer<GatewayClient>)> {
        let config = self.load_config()?;
        let client = gateway::connect(&config.gateway).await?;
        let tracer = Tracer::from_config(client, &config)?;
        Ok((config, tracer))
    }
}

/// Budget overrides shared by trace and timeline
#[derive(Args, Debug, Clone, Default)]
pub struct BudgetArgs {
    /// Maximum hops from the seed
    #[arg(long)]
    pub max_depth: Option<u32>,

    /// Maximum followed edges per transaction
    #[arg(long)]
    pub max_fanout: Option<usize>,

    /// Wall-clock budget in milliseconds
    #[arg(long)]
    pub time_budget_ms: Option<u64>,

    /// Mixing policy: stop or dilute
    #[arg(long)]
    pub mixing_policy: Option<MixingPolicy>,
}

impl BudgetArgs {
    pub fn apply(&self, mut budget: TraceBudget) -> AppResult<TraceBudget> {
        if let Some(depth) = self.max_depth {
            budget.max_depth = depth;
        }
        if let Some(fanout) = self.max_fanout {
            if fanout == 0 {
                return Err(AppError::InvalidData(
                    "--max-fanout must be greater than 0".to_string(),
                ));
            }
            budget.max_fanout = fanout;
        }
        if let Some(ms) = self.time_budget_ms {
            budget.time_budget = Duration::from_millis(ms);
        }
        if let Some(policy) = self.mixing_policy {
            budget.mixing_policy = policy;
        }
        Ok(budget)
    }
}

// ===== Output Helpers =====

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Console,
    Json,
}

/// Parse output format string to OutputFormat enum
pub fn parse_format(format_str: &str) -> OutputFormat {
    match format_str.to_lowercase().as_str() {
        "json" => OutputFormat::Json,
        _ => OutputFormat::Console,
    }
}

/// Write output to file with safe directory creation
pub fn write_output_to_file(path: &Path, content: &str, description: &str) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    println!("{} written to: {}", description, path.display());
    Ok(())
}

/// Pretty JSON to `path`, or stdout when no path is given
pub fn emit_json<T: Serialize>(value: &T, path: Option<&Path>, description: &str) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    match path {
        Some(path) => write_output_to_file(path, &json, description),
        None => {
            println!("{}", json);
            Ok(())
        }
    }
}
