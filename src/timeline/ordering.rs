//! Chronological ordering of timeline events
//!
//! Events are grouped by block height (unconfirmed last). Within a group,
//! transactions are ordered topologically by funding dependency, with
//! `(position, txid)` choosing among transactions that are ready.

use crate::types::TimelineEvent;
use bitcoin::Txid;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::warn;

/// Confirmed heights ascending, then unconfirmed
fn height_key(event: &TimelineEvent) -> (bool, u32) {
    match event.block_height {
        Some(height) => (false, height),
        None => (true, 0),
    }
}

/// Order `events` by height, then dependency within each height
pub fn order_events(events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    let mut by_height: BTreeMap<(bool, u32), Vec<TimelineEvent>> = BTreeMap::new();
    for event in events {
        by_height.entry(height_key(&event)).or_default().push(event);
    }

    let mut ordered = Vec::new();
    for (_, group) in by_height {
        ordered.extend(order_group(group));
    }
    ordered
}

fn order_group(events: Vec<TimelineEvent>) -> Vec<TimelineEvent> {
    let mut by_tx: BTreeMap<Txid, Vec<TimelineEvent>> = BTreeMap::new();
    let mut positions: HashMap<Txid, u32> = HashMap::new();
    for event in events {
        let position = event.block_position.unwrap_or(u32::MAX);
        positions
            .entry(event.txid)
            .and_modify(|p| *p = (*p).min(position))
            .or_insert(position);
        by_tx.entry(event.txid).or_default().push(event);
    }

    let dependencies: BTreeSet<(Txid, Txid)> = by_tx
        .values()
        .flatten()
        .filter(|e| e.funding_txid != e.txid && by_tx.contains_key(&e.funding_txid))
        .map(|e| (e.funding_txid, e.txid))
        .collect();

    let order = topological_order(&positions, &dependencies);

    let mut ordered = Vec::new();
    for txid in order {
        if let Some(mut events) = by_tx.remove(&txid) {
            events.sort_by(|a, b| {
                (a.from_outpoint, a.to_outpoint).cmp(&(b.from_outpoint, b.to_outpoint))
            });
            ordered.extend(events);
        }
    }
    ordered
}

/// Kahn's algorithm with a `(position, txid)`-ordered ready set
///
/// A dependency cycle cannot occur in valid ledger data; if one shows up the
/// remaining transactions are appended in key order.
pub fn topological_order(
    positions: &HashMap<Txid, u32>,
    dependencies: &BTreeSet<(Txid, Txid)>,
) -> Vec<Txid> {
    let mut graph: DiGraph<Txid, ()> = DiGraph::new();
    let mut keys: Vec<(u32, Txid)> = positions.iter().map(|(txid, p)| (*p, *txid)).collect();
    keys.sort();

    let mut index: HashMap<Txid, NodeIndex> = HashMap::new();
    for (_, txid) in &keys {
        index.insert(*txid, graph.add_node(*txid));
    }
    for (before, after) in dependencies {
        if let (Some(a), Some(b)) = (index.get(before), index.get(after)) {
            graph.add_edge(*a, *b, ());
        }
    }

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.neighbors_directed(n, Direction::Incoming).count()))
        .collect();
    let key_of = |n: NodeIndex| (positions.get(&graph[n]).copied().unwrap_or(u32::MAX), graph[n]);

    let mut ready: BTreeSet<(u32, Txid)> = graph
        .node_indices()
        .filter(|n| in_degree.get(n) == Some(&0))
        .map(key_of)
        .collect();

    let mut order = Vec::with_capacity(keys.len());
    while let Some(key) = ready.pop_first() {
        let node = index[&key.1];
        order.push(key.1);
        for next in graph.neighbors_directed(node, Direction::Outgoing) {
            if let Some(degree) = in_degree.get_mut(&next) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(key_of(next));
                }
            }
        }
    }

    if order.len() < keys.len() {
        warn!(
            "Dependency cycle among {} same-block transactions; falling back to position order",
            keys.len() - order.len()
        );
        let placed: BTreeSet<Txid> = order.iter().copied().collect();
        order.extend(keys.iter().map(|(_, txid)| *txid).filter(|t| !placed.contains(t)));
    }
    order
}
