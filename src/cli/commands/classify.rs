use super::{emit_json, parse_format, GatewayArgs, OutputFormat};
use crate::errors::{AppError, AppResult};
use crate::types::CoinJoinVerdict;
use bitcoin::Txid;
use clap::Args;
use std::str::FromStr;
use tracing::warn;

/// Classify transactions as CoinJoin / mixing
#[derive(Args)]
pub struct ClassifyCommand {
    /// Transaction IDs to classify
    #[arg(required = true)]
    pub txids: Vec<String>,

    /// Override the confidence threshold
    #[arg(long)]
    pub threshold: Option<f64>,

    /// Output format (console, json)
    #[arg(long, default_value = "console")]
    pub format: String,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}

impl ClassifyCommand {
    pub async fn run(&self) -> AppResult<()> {
        let txids = self
            .txids
            .iter()
            .map(|s| {
                Txid::from_str(s.trim())
                    .map_err(|e| AppError::InvalidData(format!("Invalid txid '{}': {}", s, e)))
            })
            .collect::<AppResult<Vec<_>>>()?;

        let mut config = self.gateway.load_config()?;
        if let Some(threshold) = self.threshold {
            config.classifier.confidence_threshold = threshold;
            config.validate()?;
        }
        let client = crate::gateway::connect(&config.gateway).await?;
        let tracer = crate::tracer::Tracer::from_config(client, &config)?;

        let mut verdicts = Vec::with_capacity(txids.len());
        for txid in &txids {
            match tracer.inspect_transaction(txid).await {
                Ok(verdict) => verdicts.push(verdict),
                Err(e) => {
                    warn!("Could not classify {}: {}", txid, e);
                    if txids.len() == 1 {
                        return Err(e.into());
                    }
                }
            }
        }

        match parse_format(&self.format) {
            OutputFormat::Json => emit_json(&verdicts, None, "Verdicts"),
            OutputFormat::Console => {
                for verdict in &verdicts {
                    print_verdict(verdict);
                }
                Ok(())
            }
        }
    }
}

fn print_verdict(verdict: &CoinJoinVerdict) {
    println!("Transaction {}", verdict.txid);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Mixing: {} ({}, confidence {:.2})",
        if verdict.is_coinjoin { "yes" } else { "no" },
        verdict.pattern,
        verdict.confidence
    );
    println!("Participants: {}", verdict.participants);
    println!("Anonymity set: {}", verdict.anonymity_set);
    if let Some(denomination) = verdict.denomination {
        println!("Denomination: {} sats", denomination);
    }
    for signal in &verdict.signals {
        println!("  {:?}: {:+.2}", signal.kind, signal.contribution);
    }
    println!();
}
