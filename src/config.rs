use crate::errors::{AppError, AppResult};
use bitcoin::Network;
use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from config.toml or environment variables
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub tracer: TracerConfig,
    pub classifier: ClassifierConfig,
}

/// Which blockchain data gateway adapter to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayBackend {
    BitcoinCore,
    Esplora,
    Snapshot,
}

impl FromStr for GatewayBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "bitcoin_core" | "core" => Ok(GatewayBackend::BitcoinCore),
            "esplora" | "electrs" => Ok(GatewayBackend::Esplora),
            "snapshot" => Ok(GatewayBackend::Snapshot),
            other => Err(format!("unknown gateway backend '{}'", other)),
        }
    }
}

/// Blockchain data gateway connection and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub backend: GatewayBackend,
    pub url: String,
    pub username: String,
    pub password: String,
    pub snapshot_path: Option<PathBuf>,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub concurrent_requests: usize,
    pub max_history_pages: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            backend: GatewayBackend::Esplora,
            url: "http://localhost:3002".to_string(),
            username: "bitcoin".to_string(),
            password: "password".to_string(),
            snapshot_path: None,
            request_timeout_ms: 30_000,
            max_retries: 5,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            concurrent_requests: 8,
            max_history_pages: 20,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// How the tracer treats a transaction classified as mixing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixingPolicy {
    /// Anonymity-set boundary: stop propagating along this branch
    Stop,
    /// Divide taint by the anonymity-set size and continue
    Dilute,
}

impl FromStr for MixingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stop" => Ok(MixingPolicy::Stop),
            "dilute" => Ok(MixingPolicy::Dilute),
            other => Err(format!("unknown mixing policy '{}'", other)),
        }
    }
}

/// Default traversal budgets and policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracerConfig {
    pub network: String,
    pub max_depth: u32,
    pub max_fanout: usize,
    pub time_budget_ms: u64,
    pub drain_grace_ms: u64,
    pub mixing_policy: MixingPolicy,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            network: "bitcoin".to_string(),
            max_depth: 6,
            max_fanout: 25,
            time_budget_ms: 120_000,
            drain_grace_ms: 2_000,
            mixing_policy: MixingPolicy::Stop,
        }
    }
}

impl TracerConfig {
    pub fn network(&self) -> AppResult<Network> {
        Network::from_str(&self.network)
            .map_err(|e| AppError::Config(format!("Unknown network '{}': {}", self.network, e)))
    }
}

/// CoinJoin classifier policy constants
///
/// Weights are summed per fired signal and clamped into [0, 1]; a verdict is
/// positive when the clamped score reaches `confidence_threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub confidence_threshold: f64,
    pub min_equal_outputs: usize,
    pub min_participants: usize,
    pub equal_output_weight: f64,
    pub participant_weight: f64,
    pub denomination_weight: f64,
    pub dominant_input_penalty: f64,
    pub dominant_input_ratio: f64,
    pub denominations: Vec<u64>,
    pub whirlpool_denominations: Vec<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.6,
            min_equal_outputs: 3,
            min_participants: 3,
            equal_output_weight: 0.45,
            participant_weight: 0.25,
            denomination_weight: 0.35,
            dominant_input_penalty: 0.5,
            dominant_input_ratio: 0.5,
            // Wasabi 1.x base denomination plus the Whirlpool pools
            denominations: vec![100_000, 1_000_000, 5_000_000, 10_000_000, 50_000_000],
            whirlpool_denominations: vec![100_000, 1_000_000, 5_000_000, 50_000_000],
        }
    }
}

impl AppConfig {
    /// Load configuration from config.toml file and environment variables
    /// Environment variables take precedence over file configuration
    pub fn load() -> AppResult<Self> {
        Self::load_from(None)
    }

    /// Load configuration, reading `path` instead of ./config.toml when given
    pub fn load_from(path: Option<&Path>) -> AppResult<Self> {
        let builder = Self::with_defaults(Config::builder())?;
        let builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        let config = builder
            // FORENSICS_GATEWAY__URL, FORENSICS_TRACER__MAX_DEPTH, ...
            .add_source(
                config::Environment::with_prefix("FORENSICS")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("classifier.denominations")
                    .with_list_parse_key("classifier.whirlpool_denominations")
                    .try_parsing(true),
            )
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn with_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        let gateway = GatewayConfig::default();
        let tracer = TracerConfig::default();
        let classifier = ClassifierConfig::default();

        builder
            .set_default("gateway.backend", "esplora")?
            .set_default("gateway.url", gateway.url)?
            .set_default("gateway.username", gateway.username)?
            .set_default("gateway.password", gateway.password)?
            .set_default("gateway.request_timeout_ms", gateway.request_timeout_ms)?
            .set_default("gateway.max_retries", gateway.max_retries as i64)?
            .set_default("gateway.initial_backoff_ms", gateway.initial_backoff_ms)?
            .set_default("gateway.backoff_multiplier", gateway.backoff_multiplier)?
            .set_default("gateway.max_backoff_ms", gateway.max_backoff_ms)?
            .set_default(
                "gateway.concurrent_requests",
                gateway.concurrent_requests as i64,
            )?
            .set_default("gateway.max_history_pages", gateway.max_history_pages as i64)?
            .set_default("tracer.network", tracer.network)?
            .set_default("tracer.max_depth", tracer.max_depth as i64)?
            .set_default("tracer.max_fanout", tracer.max_fanout as i64)?
            .set_default("tracer.time_budget_ms", tracer.time_budget_ms)?
            .set_default("tracer.drain_grace_ms", tracer.drain_grace_ms)?
            .set_default("tracer.mixing_policy", "stop")?
            .set_default(
                "classifier.confidence_threshold",
                classifier.confidence_threshold,
            )?
            .set_default(
                "classifier.min_equal_outputs",
                classifier.min_equal_outputs as i64,
            )?
            .set_default(
                "classifier.min_participants",
                classifier.min_participants as i64,
            )?
            .set_default(
                "classifier.equal_output_weight",
                classifier.equal_output_weight,
            )?
            .set_default("classifier.participant_weight", classifier.participant_weight)?
            .set_default(
                "classifier.denomination_weight",
                classifier.denomination_weight,
            )?
            .set_default(
                "classifier.dominant_input_penalty",
                classifier.dominant_input_penalty,
            )?
            .set_default(
                "classifier.dominant_input_ratio",
                classifier.dominant_input_ratio,
            )?
            .set_default(
                "classifier.denominations",
                to_config_list(&classifier.denominations),
            )?
            .set_default(
                "classifier.whirlpool_denominations",
                to_config_list(&classifier.whirlpool_denominations),
            )
    }

    /// Reject configurations that would make every trace degenerate
    pub fn validate(&self) -> AppResult<()> {
        if self.gateway.concurrent_requests == 0 {
            return Err(AppError::Config(
                "gateway.concurrent_requests must be greater than 0".to_string(),
            ));
        }
        if self.gateway.max_retries == 0 {
            return Err(AppError::Config(
                "gateway.max_retries must be at least 1".to_string(),
            ));
        }
        if self.gateway.backoff_multiplier < 1.0 {
            return Err(AppError::Config(
                "gateway.backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.gateway.backend == GatewayBackend::Snapshot && self.gateway.snapshot_path.is_none()
        {
            return Err(AppError::Config(
                "gateway.snapshot_path is required for the snapshot backend".to_string(),
            ));
        }
        if self.tracer.max_fanout == 0 {
            return Err(AppError::Config(
                "tracer.max_fanout must be greater than 0".to_string(),
            ));
        }
        if self.tracer.time_budget_ms == 0 {
            return Err(AppError::Config(
                "tracer.time_budget_ms must be greater than 0".to_string(),
            ));
        }
        self.tracer.network()?;

        let threshold = self.classifier.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AppError::Config(format!(
                "classifier.confidence_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.classifier.dominant_input_ratio) {
            return Err(AppError::Config(
                "classifier.dominant_input_ratio must be in [0, 1]".to_string(),
            ));
        }
        if self.classifier.min_equal_outputs < 2 {
            return Err(AppError::Config(
                "classifier.min_equal_outputs must be at least 2".to_string(),
            ));
        }
        Ok(())
    }
}

fn to_config_list(values: &[u64]) -> Vec<i64> {
    values.iter().map(|v| *v as i64).collect()
}
