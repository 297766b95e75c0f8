//! Structural features of a transaction used by the CoinJoin classifier

use crate::graph::ClusterView;
use crate::types::TxRecord;
use std::collections::{BTreeMap, HashMap};

/// Largest group of identical-value outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EqualOutputGroup {
    pub value: u64,
    pub count: usize,
}

/// Find the largest set of outputs sharing one value
///
/// Zero-value outputs (OP_RETURN markers) are ignored. Ties on count go to
/// the larger value.
pub fn largest_equal_output_group(tx: &TxRecord) -> Option<EqualOutputGroup> {
    let mut counts: HashMap<u64, usize> = HashMap::new();
    for output in tx.outputs.iter().filter(|o| o.value > 0) {
        *counts.entry(output.value).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by_key(|(value, count)| (*count, *value))
        .map(|(value, count)| EqualOutputGroup { value, count })
}

/// Input value held by each input cluster, keyed by cluster id
///
/// An input without a known owner counts as its own cluster.
pub fn input_cluster_values(tx: &TxRecord, clusters: &impl ClusterView) -> BTreeMap<String, u64> {
    let mut values: BTreeMap<String, u64> = BTreeMap::new();
    for input in tx.inputs.iter().filter(|i| !i.coinbase) {
        let cluster = match input.owner() {
            Some(owner) => clusters.cluster_of(&owner),
            None => format!("outpoint:{}", input.previous_output),
        };
        let entry = values.entry(cluster).or_insert(0);
        *entry = entry.saturating_add(input.value.unwrap_or(0));
    }
    values
}

/// Share of total input value held by the largest input cluster
pub fn dominant_cluster_share(cluster_values: &BTreeMap<String, u64>) -> Option<f64> {
    let total: u64 = cluster_values.values().fold(0u64, |acc, v| acc.saturating_add(*v));
    if total == 0 {
        return None;
    }
    let largest = cluster_values.values().copied().max().unwrap_or(0);
    Some(largest as f64 / total as f64)
}

/// Samourai Whirlpool mix: five inputs, five outputs, all at one pool denomination
pub fn is_whirlpool(tx: &TxRecord, pool_denominations: &[u64]) -> bool {
    if tx.inputs.len() != 5 || tx.outputs.len() != 5 {
        return false;
    }
    let first = tx.outputs[0].value;
    pool_denominations.contains(&first) && tx.outputs.iter().all(|o| o.value == first)
}
