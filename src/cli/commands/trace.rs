use super::{emit_json, parse_format, write_output_to_file, BudgetArgs, GatewayArgs, OutputFormat};
use crate::errors::{AppError, AppResult};
use crate::gateway::GatewayClient;
use crate::tracer::{TraceBudget, TraceRequest, TraceSeed, Tracer};
use crate::types::{TraceDirection, TraceGraph};
use crate::utils::currency::{format_sats_as_btc, format_taint};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    Forward,
    Backward,
    Both,
}

/// Trace fund flow from a seed outpoint, transaction or address
#[derive(Args)]
pub struct TraceCommand {
    /// Seed: txid:vout, txid or address
    #[arg(required_unless_present = "resume")]
    pub seed: Option<String>,

    /// Trace direction
    #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
    pub direction: DirectionArg,

    #[command(flatten)]
    pub budget: BudgetArgs,

    /// Resume from the frontier of a saved trace graph (JSON)
    #[arg(long, conflicts_with = "seed")]
    pub resume: Option<PathBuf>,

    /// Write the trace graph JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Also write a Graphviz DOT rendering
    #[arg(long)]
    pub dot: Option<PathBuf>,

    /// Output format (console, json)
    #[arg(long, default_value = "json")]
    pub format: String,

    /// Emit the cluster-level aggregate instead of the UTXO graph
    #[arg(long)]
    pub clusters: bool,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}

#[derive(Serialize)]
struct BidirectionalTrace<'a> {
    forward: &'a TraceGraph,
    backward: &'a TraceGraph,
}

impl TraceCommand {
    pub async fn run(&self) -> AppResult<()> {
        let (_, tracer) = self.gateway.tracer().await?;
        let budget = self.budget.apply(tracer.default_budget())?;

        if let Some(path) = &self.resume {
            let previous = load_graph(path)?;
            let seed = TraceSeed::resume(&previous).ok_or_else(|| {
                AppError::InvalidData(format!("{} has no frontier to resume", path.display()))
            })?;
            info!(
                "Resuming {} trace of {} from {} frontier nodes",
                previous.direction,
                previous.seed,
                previous.frontier.len()
            );
            let request = TraceRequest {
                seed,
                direction: previous.direction,
                budget,
            };
            let graph = tracer.trace(&request).await?;
            return self.emit_single(&graph);
        }

        let input = self
            .seed
            .as_deref()
            .ok_or_else(|| AppError::InvalidData("a seed is required".to_string()))?;
        let seed = tracer.parse_seed(input)?;

        match self.direction {
            DirectionArg::Forward => self.trace_one(&tracer, seed, TraceDirection::Forward, budget).await,
            DirectionArg::Backward => self.trace_one(&tracer, seed, TraceDirection::Backward, budget).await,
            DirectionArg::Both => {
                let (forward, backward) = tracer.trace_both(seed, budget).await?;
                if let Some(dot) = &self.dot {
                    write_output_to_file(&dot.with_extension("forward.dot"), &forward.to_dot(), "Forward DOT graph")?;
                    write_output_to_file(&dot.with_extension("backward.dot"), &backward.to_dot(), "Backward DOT graph")?;
                }
                match parse_format(&self.format) {
                    OutputFormat::Console => {
                        print_summary(&backward);
                        print_summary(&forward);
                        Ok(())
                    }
                    OutputFormat::Json if self.clusters => emit_json(
                        &serde_json::json!({
                            "forward": forward.cluster_view(),
                            "backward": backward.cluster_view(),
                        }),
                        self.output.as_deref(),
                        "Cluster views",
                    ),
                    OutputFormat::Json => emit_json(
                        &BidirectionalTrace {
                            forward: &forward,
                            backward: &backward,
                        },
                        self.output.as_deref(),
                        "Trace graphs",
                    ),
                }
            }
        }
    }

    async fn trace_one(
        &self,
        tracer: &Tracer<GatewayClient>,
        seed: TraceSeed,
        direction: TraceDirection,
        budget: TraceBudget,
    ) -> AppResult<()> {
        let request = TraceRequest {
            seed,
            direction,
            budget,
        };
        let graph = tracer.trace(&request).await?;
        self.emit_single(&graph)
    }

    fn emit_single(&self, graph: &TraceGraph) -> AppResult<()> {
        if let Some(dot) = &self.dot {
            write_output_to_file(dot, &graph.to_dot(), "DOT graph")?;
        }
        match parse_format(&self.format) {
            OutputFormat::Console => {
                print_summary(graph);
                Ok(())
            }
            OutputFormat::Json if self.clusters => {
                emit_json(&graph.cluster_view(), self.output.as_deref(), "Cluster view")
            }
            OutputFormat::Json => emit_json(graph, self.output.as_deref(), "Trace graph"),
        }
    }
}

/// Read a trace graph previously written with `--output`
pub fn load_graph(path: &Path) -> AppResult<TraceGraph> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn print_summary(graph: &TraceGraph) {
    println!("Trace ({}) from {}", graph.direction, graph.seed);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Nodes: {}", graph.nodes.len());
    println!("Edges: {}", graph.edges.len());
    println!("Transactions expanded: {}", graph.stats.transactions_expanded);
    println!("Mixing transactions: {}", graph.stats.mixing_transactions);
    println!("Longest path: {}", graph.max_path_length());
    println!("Completeness: {:?}", graph.completeness());
    if graph.truncated {
        println!("Budgets hit: {:?}", graph.budgets_hit);
        println!("Resumable frontier: {} nodes", graph.frontier.len());
    }
    for unresolved in &graph.unresolved_seeds {
        println!("Unresolved seed {}: {}", unresolved.seed, unresolved.reason);
    }

    let view = graph.cluster_view();
    let mut clusters: Vec<_> = view.nodes.iter().collect();
    clusters.sort_by(|a, b| b.tainted_value.cmp(&a.tainted_value));
    println!();
    println!("Top clusters by tainted value:");
    for cluster in clusters.iter().take(10) {
        let taint = if cluster.total_value == 0 {
            0.0
        } else {
            cluster.tainted_value as f64 / cluster.total_value as f64
        };
        println!(
            "  {} - {} across {} UTXOs ({} tainted)",
            cluster.cluster,
            format_sats_as_btc(cluster.tainted_value),
            cluster.utxo_count,
            format_taint(taint)
        );
    }
    println!();
}
