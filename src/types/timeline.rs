use crate::types::trace::TraceDirection;
use bitcoin::{OutPoint, Txid};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One hop of fund movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub block_height: Option<u32>,
    pub block_position: Option<u32>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Transaction moving the funds
    pub txid: Txid,
    /// Transaction that created the source output
    pub funding_txid: Txid,
    pub from_outpoint: OutPoint,
    pub to_outpoint: OutPoint,
    pub from_cluster: String,
    pub to_cluster: String,
    pub amount: u64,
    pub hop_depth: u32,
    pub taint: f64,
    pub direction: TraceDirection,
    /// Same-cluster hops folded into this event by compaction
    pub merged_hops: u32,
    pub coinjoin: bool,
}

/// Aggregate facts about a timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineSummary {
    pub event_count: usize,
    pub first_height: Option<u32>,
    pub last_height: Option<u32>,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub span_days: Option<i64>,
    pub distinct_clusters: usize,
    pub coinjoin_transactions: usize,
    pub unconfirmed_events: usize,
}

/// Chronologically ordered fund movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    pub events: Vec<TimelineEvent>,
    pub summary: TimelineSummary,
}
