//! UTXO Tracer
//!
//! Breadth-first traversal of the spend graph from a seed, forward (where did
//! the funds go) or backward (where did they come from). Taint is propagated
//! by value-weighted share, mixing transactions are handled per the
//! configured policy, and depth, fan-out and time budgets bound the result.
//!
//! A trace never fails because data is missing: incomplete branches carry an
//! explicit status and the graph reports whether it was fully traced, bounded
//! by policy, or bounded by missing data. Only a malformed seed is an error.

pub mod propagation;
mod session;

use crate::classifier::CoinJoinClassifier;
use crate::config::{AppConfig, MixingPolicy, TracerConfig};
use crate::errors::{AppResult, TraceError, TraceResult};
use crate::gateway::ChainGateway;
use crate::graph::{Singletons, TxGraphBuilder};
use crate::types::{CoinJoinVerdict, FrontierEntry, TraceDirection, TraceGraph};
use bitcoin::address::NetworkUnchecked;
use bitcoin::{Address, Network, OutPoint, Txid};
use session::TraceSession;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Traversal limits for one trace request
#[derive(Debug, Clone, PartialEq)]
pub struct TraceBudget {
    /// Hops from the seed beyond which nodes are not expanded
    pub max_depth: u32,
    /// Followed edges per transaction; the rest become low-value markers
    pub max_fanout: usize,
    pub time_budget: Duration,
    pub mixing_policy: MixingPolicy,
}

impl TraceBudget {
    pub fn from_config(config: &TracerConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            max_fanout: config.max_fanout,
            time_budget: Duration::from_millis(config.time_budget_ms),
            mixing_policy: config.mixing_policy,
        }
    }
}

impl Default for TraceBudget {
    fn default() -> Self {
        Self::from_config(&TracerConfig::default())
    }
}

/// Where a trace starts
#[derive(Debug, Clone, PartialEq)]
pub enum TraceSeed {
    OutPoint(OutPoint),
    /// Every output of the transaction
    Transaction(Txid),
    /// Every output paying the address across its history
    Address(Address),
    /// Resume from the frontier of a truncated trace
    Frontier(Vec<FrontierEntry>),
}

impl TraceSeed {
    /// Parse `txid:vout`, a bare txid, or an address valid on `network`
    pub fn parse(input: &str, network: Network) -> TraceResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(TraceError::InvalidInput("empty seed".to_string()));
        }

        if input.contains(':') {
            return OutPoint::from_str(input)
                .map(TraceSeed::OutPoint)
                .map_err(|e| {
                    TraceError::InvalidInput(format!("malformed outpoint '{}': {}", input, e))
                });
        }

        if input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit()) {
            return Txid::from_str(input)
                .map(TraceSeed::Transaction)
                .map_err(|e| TraceError::InvalidInput(format!("malformed txid '{}': {}", input, e)));
        }

        let address = input
            .parse::<Address<NetworkUnchecked>>()
            .map_err(|e| TraceError::InvalidInput(format!("malformed seed '{}': {}", input, e)))?
            .require_network(network)
            .map_err(|e| {
                TraceError::InvalidInput(format!("address '{}' not valid on {}: {}", input, network, e))
            })?;
        Ok(TraceSeed::Address(address))
    }

    /// Seed that resumes a truncated trace, if it left anything to resume
    pub fn resume(graph: &TraceGraph) -> Option<Self> {
        if graph.frontier.is_empty() {
            None
        } else {
            Some(TraceSeed::Frontier(graph.frontier.clone()))
        }
    }
}

impl fmt::Display for TraceSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceSeed::OutPoint(outpoint) => write!(f, "{}", outpoint),
            TraceSeed::Transaction(txid) => write!(f, "{}", txid),
            TraceSeed::Address(address) => write!(f, "{}", address),
            TraceSeed::Frontier(entries) => write!(f, "frontier({})", entries.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceRequest {
    pub seed: TraceSeed,
    pub direction: TraceDirection,
    pub budget: TraceBudget,
}

/// Orchestrates trace sessions over a shared graph builder
pub struct Tracer<G> {
    builder: Arc<TxGraphBuilder<G>>,
    classifier: Arc<CoinJoinClassifier>,
    config: TracerConfig,
    network: Network,
    concurrency: usize,
}

impl<G: ChainGateway> Tracer<G> {
    pub fn new(
        builder: Arc<TxGraphBuilder<G>>,
        classifier: Arc<CoinJoinClassifier>,
        config: TracerConfig,
        concurrency: usize,
    ) -> AppResult<Self> {
        let network = config.network()?;
        Ok(Self {
            builder,
            classifier,
            config,
            network,
            concurrency: concurrency.max(1),
        })
    }

    /// Wire builder, classifier and tracer from application configuration
    pub fn from_config(gateway: G, config: &AppConfig) -> AppResult<Self> {
        let builder = Arc::new(TxGraphBuilder::new(gateway, &config.gateway));
        let classifier = Arc::new(CoinJoinClassifier::new(config.classifier.clone()));
        Self::new(
            builder,
            classifier,
            config.tracer.clone(),
            config.gateway.concurrent_requests,
        )
    }

    pub fn builder(&self) -> &TxGraphBuilder<G> {
        &self.builder
    }

    pub fn classifier(&self) -> &CoinJoinClassifier {
        &self.classifier
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub(crate) fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.config.drain_grace_ms)
    }

    /// Budget built from the tracer configuration
    pub fn default_budget(&self) -> TraceBudget {
        TraceBudget::from_config(&self.config)
    }

    pub fn parse_seed(&self, input: &str) -> TraceResult<TraceSeed> {
        TraceSeed::parse(input, self.network)
    }

    /// Run one trace; partial data yields a marked, partial graph rather than an error
    pub async fn trace(&self, request: &TraceRequest) -> TraceResult<TraceGraph> {
        if request.budget.max_fanout == 0 {
            return Err(TraceError::InvalidInput(
                "max_fanout must be greater than 0".to_string(),
            ));
        }

        info!(
            "Starting {} trace from {} (depth {}, fan-out {}, budget {:?}, mixing policy {:?})",
            request.direction,
            request.seed,
            request.budget.max_depth,
            request.budget.max_fanout,
            request.budget.time_budget,
            request.budget.mixing_policy
        );

        let session = TraceSession::new(
            self,
            request.direction,
            request.budget.clone(),
            &request.seed,
        );
        let graph = session.run(&request.seed).await?;

        let stats = self.builder.cache_stats();
        info!(
            "Transaction cache: {} hits, {} misses ({:.1}% hit rate)",
            stats.hits,
            stats.misses,
            stats.hit_rate()
        );
        Ok(graph)
    }

    /// Forward and backward traces from the same seed, run concurrently
    pub async fn trace_both(
        &self,
        seed: TraceSeed,
        budget: TraceBudget,
    ) -> TraceResult<(TraceGraph, TraceGraph)> {
        let forward = TraceRequest {
            seed: seed.clone(),
            direction: TraceDirection::Forward,
            budget: budget.clone(),
        };
        let backward = TraceRequest {
            seed,
            direction: TraceDirection::Backward,
            budget,
        };

        let (forward, backward) = tokio::join!(self.trace(&forward), self.trace(&backward));
        Ok((forward?, backward?))
    }

    /// Classify a single transaction outside of any trace
    ///
    /// No clustering context exists, so each input owner is its own cluster.
    pub async fn inspect_transaction(&self, txid: &Txid) -> TraceResult<CoinJoinVerdict> {
        let tx = self.builder.fetch_resolved(txid).await?;
        Ok(self.classifier.classify(&tx, &Singletons))
    }
}
