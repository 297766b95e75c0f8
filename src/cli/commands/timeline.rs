use super::trace::load_graph;
use super::{emit_json, parse_format, BudgetArgs, GatewayArgs, OutputFormat};
use crate::errors::{AppError, AppResult};
use crate::timeline::{export_csv, TimelineGenerator, TimelineOptions};
use crate::types::{Timeline, TraceGraph};
use crate::utils::currency::{format_sats_as_btc, format_taint};
use clap::Args;
use std::path::PathBuf;

/// Build a chronological fund-movement timeline around a seed
#[derive(Args)]
pub struct TimelineCommand {
    /// Seed: txid:vout, txid or address (traced in both directions)
    #[arg(required_unless_present = "graph")]
    pub seed: Option<String>,

    /// Build from saved trace graph JSON files instead of tracing (repeatable)
    #[arg(long, conflicts_with = "seed")]
    pub graph: Vec<PathBuf>,

    #[command(flatten)]
    pub budget: BudgetArgs,

    /// Fold same-cluster pass-through hops
    #[arg(long)]
    pub compact: bool,

    /// Also export events as CSV
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write the timeline JSON here instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Output format (console, json)
    #[arg(long, default_value = "json")]
    pub format: String,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}

impl TimelineCommand {
    pub async fn run(&self) -> AppResult<()> {
        let generator = TimelineGenerator::new(TimelineOptions {
            compact: self.compact,
        });

        let timeline = if self.graph.is_empty() {
            let input = self
                .seed
                .as_deref()
                .ok_or_else(|| AppError::InvalidData("a seed is required".to_string()))?;
            let (_, tracer) = self.gateway.tracer().await?;
            let seed = tracer.parse_seed(input)?;
            let budget = self.budget.apply(tracer.default_budget())?;
            let (forward, backward) = tracer.trace_both(seed, budget).await?;
            generator.merge(&forward, &backward)
        } else {
            let graphs = self
                .graph
                .iter()
                .map(|path| load_graph(path))
                .collect::<AppResult<Vec<TraceGraph>>>()?;
            let refs: Vec<&TraceGraph> = graphs.iter().collect();
            generator.from_graphs(&refs)
        };

        if let Some(path) = &self.csv {
            export_csv(&timeline, path)?;
        }

        match parse_format(&self.format) {
            OutputFormat::Console => {
                print_timeline(&timeline);
                Ok(())
            }
            OutputFormat::Json => emit_json(&timeline, self.output.as_deref(), "Timeline"),
        }
    }
}

fn print_timeline(timeline: &Timeline) {
    let summary = &timeline.summary;
    println!("Fund Movement Timeline");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Events: {}", summary.event_count);
    if let (Some(first), Some(last)) = (summary.first_height, summary.last_height) {
        println!("Blocks: {} - {}", first, last);
    }
    if let (Some(first), Some(last)) = (summary.first_seen, summary.last_seen) {
        println!(
            "Span: {} to {} ({} days)",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d"),
            summary.span_days.unwrap_or(0)
        );
    }
    println!("Distinct clusters: {}", summary.distinct_clusters);
    println!("CoinJoin transactions: {}", summary.coinjoin_transactions);
    println!("Unconfirmed events: {}", summary.unconfirmed_events);
    println!();

    for event in &timeline.events {
        let height = event
            .block_height
            .map(|h| h.to_string())
            .unwrap_or_else(|| "mempool".to_string());
        let merged = if event.merged_hops > 0 {
            format!(" (+{} hops)", event.merged_hops)
        } else {
            String::new()
        };
        let mix = if event.coinjoin { " [coinjoin]" } else { "" };
        println!(
            "  [{}] {} -> {}  {}  taint {}{}{}",
            height,
            event.from_cluster,
            event.to_cluster,
            format_sats_as_btc(event.amount),
            format_taint(event.taint),
            merged,
            mix
        );
    }
}
