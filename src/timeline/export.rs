//! CSV export of timeline events

use crate::errors::AppResult;
use crate::types::Timeline;
use crate::utils::currency::btc_amount;
use csv::Writer;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

const HEADER: [&str; 15] = [
    "block_height",
    "block_position",
    "timestamp",
    "txid",
    "funding_txid",
    "from_outpoint",
    "to_outpoint",
    "from_cluster",
    "to_cluster",
    "amount_sats",
    "amount_btc",
    "hop_depth",
    "taint",
    "direction",
    "merged_hops",
];

/// Write one CSV row per event, in timeline order
pub fn write_csv<W: Write>(timeline: &Timeline, writer: W) -> AppResult<()> {
    let mut csv = Writer::from_writer(writer);
    csv.write_record(HEADER)?;

    for event in &timeline.events {
        let mut direction = event.direction.to_string();
        if event.coinjoin {
            direction.push_str("+coinjoin");
        }
        csv.write_record([
            event.block_height.map(|h| h.to_string()).unwrap_or_default(),
            event.block_position.map(|p| p.to_string()).unwrap_or_default(),
            event.timestamp.map(|t| t.to_rfc3339()).unwrap_or_default(),
            event.txid.to_string(),
            event.funding_txid.to_string(),
            event.from_outpoint.to_string(),
            event.to_outpoint.to_string(),
            event.from_cluster.clone(),
            event.to_cluster.clone(),
            event.amount.to_string(),
            btc_amount(event.amount),
            event.hop_depth.to_string(),
            format!("{:.6}", event.taint),
            direction,
            event.merged_hops.to_string(),
        ])?;
    }

    csv.flush()?;
    Ok(())
}

pub fn export_csv(timeline: &Timeline, path: &Path) -> AppResult<()> {
    let file = File::create(path)?;
    write_csv(timeline, file)?;
    info!("Wrote {} timeline events to {}", timeline.events.len(), path.display());
    Ok(())
}
