//! Timeline Generator
//!
//! Merges forward and backward trace graphs into one chronologically ordered
//! sequence of fund-movement events. Every followed hop becomes an event; by
//! default nothing is collapsed. With `compact`, a same-cluster hop that
//! moves the full amount it received is folded into the hop that funded it.
//!
//! Each trace labels clusters on its own, so an address can sit in different
//! clusters in the forward and backward graphs. Merging unions those labels
//! and relabels every event with the combined cluster id.

pub mod export;
pub mod ordering;

use crate::graph::{AddressClusters, ClusterView};
use crate::types::{
    EdgeKind, Timeline, TimelineEvent, TimelineSummary, TraceEdge, TraceGraph,
};
use bitcoin::{OutPoint, Txid};
use chrono::{TimeZone, Utc};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

pub use export::{export_csv, write_csv};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimelineOptions {
    /// Fold same-cluster pass-through hops into their predecessor
    pub compact: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TimelineGenerator {
    options: TimelineOptions,
}

impl TimelineGenerator {
    pub fn new(options: TimelineOptions) -> Self {
        Self { options }
    }

    /// Merge a forward and a backward trace of the same seed
    pub fn merge(&self, forward: &TraceGraph, backward: &TraceGraph) -> Timeline {
        self.from_graphs(&[backward, forward])
    }

    /// Timeline of a single trace graph
    pub fn from_graph(&self, graph: &TraceGraph) -> Timeline {
        self.from_graphs(&[graph])
    }

    /// Timeline over any number of trace graphs; shared hops appear once
    pub fn from_graphs(&self, graphs: &[&TraceGraph]) -> Timeline {
        let clusters = unify_clusters(graphs);
        let mut seen: HashSet<(Txid, OutPoint, OutPoint)> = HashSet::new();
        let mut events = Vec::new();
        for graph in graphs {
            for edge in graph.edges.iter().filter(|e| e.kind != EdgeKind::TruncatedLowValue) {
                let event = event_for(graph, edge, &clusters);
                if seen.insert((event.txid, event.from_outpoint, event.to_outpoint)) {
                    events.push(event);
                }
            }
        }

        let mut events = ordering::order_events(events);
        if self.options.compact {
            let before = events.len();
            events = compact(events);
            debug!("Compacted {} events into {}", before, events.len());
        }

        let summary = summarize(&events);
        Timeline { events, summary }
    }
}

/// Union every node's owner with the cluster its own trace assigned
fn unify_clusters(graphs: &[&TraceGraph]) -> AddressClusters {
    let mut clusters = AddressClusters::new();
    for graph in graphs {
        for node in &graph.nodes {
            clusters.union(&node.owner, &node.cluster);
        }
    }
    clusters
}

fn event_for(graph: &TraceGraph, edge: &TraceEdge, clusters: &AddressClusters) -> TimelineEvent {
    let (from, to) = edge.flow(graph.direction);
    let from = graph.node(from);
    let to = graph.node(to);
    let summary = graph.transactions.get(&edge.txid);
    let block = summary.and_then(|s| s.block);

    TimelineEvent {
        block_height: block.map(|b| b.height),
        block_position: block.and_then(|b| b.position),
        timestamp: block
            .and_then(|b| b.time)
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        txid: edge.txid,
        funding_txid: from.outpoint.txid,
        from_outpoint: from.outpoint,
        to_outpoint: to.outpoint,
        from_cluster: clusters.cluster_of(&from.owner),
        to_cluster: clusters.cluster_of(&to.owner),
        amount: edge.value,
        hop_depth: from.depth.max(to.depth),
        taint: edge.taint,
        direction: graph.direction,
        merged_hops: 0,
        coinjoin: summary.map(|s| s.verdict.is_coinjoin).unwrap_or(false),
    }
}

/// Fold pass-through hops: same cluster on both ends, same amount as the hop
/// that delivered the funds
fn compact(events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    let mut out: Vec<TimelineEvent> = Vec::with_capacity(events.len());
    // to_outpoint -> index in `out` of the event that delivered it
    let mut delivered: HashMap<OutPoint, usize> = HashMap::new();

    for event in events {
        let predecessor = delivered.get(&event.from_outpoint).copied().filter(|i| {
            let prev = &out[*i];
            event.from_cluster == event.to_cluster
                && prev.to_cluster == event.from_cluster
                && prev.amount == event.amount
                && prev.direction == event.direction
        });

        match predecessor {
            Some(index) => {
                delivered.remove(&event.from_outpoint);
                let prev = &mut out[index];
                prev.to_outpoint = event.to_outpoint;
                prev.hop_depth = prev.hop_depth.max(event.hop_depth);
                prev.taint = event.taint;
                prev.merged_hops += 1;
                delivered.insert(event.to_outpoint, index);
            }
            None => {
                delivered.insert(event.to_outpoint, out.len());
                out.push(event);
            }
        }
    }
    out
}

fn summarize(events: &[TimelineEvent]) -> TimelineSummary {
    let heights = events.iter().filter_map(|e| e.block_height);
    let first_height = heights.clone().min();
    let last_height = heights.max();

    let times = events.iter().filter_map(|e| e.timestamp);
    let first_seen = times.clone().min();
    let last_seen = times.max();
    let span_days = match (first_seen, last_seen) {
        (Some(first), Some(last)) => Some((last - first).num_days()),
        _ => None,
    };

    let clusters: BTreeSet<&str> = events
        .iter()
        .flat_map(|e| [e.from_cluster.as_str(), e.to_cluster.as_str()])
        .collect();
    let coinjoins: BTreeSet<Txid> = events.iter().filter(|e| e.coinjoin).map(|e| e.txid).collect();

    TimelineSummary {
        event_count: events.len(),
        first_height,
        last_height,
        first_seen,
        last_seen,
        span_days,
        distinct_clusters: clusters.len(),
        coinjoin_transactions: coinjoins.len(),
        unconfirmed_events: events.iter().filter(|e| e.block_height.is_none()).count(),
    }
}
