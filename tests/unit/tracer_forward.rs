//! Forward tracing: conservation, budgets, determinism and seeds

use crate::common::{budget, op, theft_ledger, tracer, txid, Ledger};
use chain_forensics::errors::TraceError;
use chain_forensics::tracer::{TraceRequest, TraceSeed};
use chain_forensics::types::{
    BudgetKind, Completeness, EdgeKind, NodeStatus, TraceDirection, TraceGraph,
};
use std::collections::HashMap;

fn forward(seed: TraceSeed, max_depth: u32, max_fanout: usize) -> TraceRequest {
    TraceRequest {
        seed,
        direction: TraceDirection::Forward,
        budget: budget(max_depth, max_fanout),
    }
}

fn node_by_owner<'a>(graph: &'a TraceGraph, owner: &str) -> Option<&'a chain_forensics::types::TraceNode> {
    graph.nodes.iter().find(|n| n.owner == owner)
}

#[tokio::test]
async fn test_forward_trace_follows_all_branches() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 10, 10))
        .await
        .unwrap();

    assert_eq!(graph.nodes.len(), 6);
    assert_eq!(graph.edges.len(), 5);
    assert_eq!(graph.stats.transactions_expanded, 3);
    assert_eq!(graph.max_path_length(), 3);
    assert!(!graph.truncated);
    assert_eq!(graph.completeness(), Completeness::FullyTraced);

    let mule = node_by_owner(&graph, "mule").unwrap();
    assert_eq!(mule.outpoint, op(4, 0));
    assert_eq!(mule.depth, 3);
    assert_eq!(mule.status, NodeStatus::Unspent);
    assert!((mule.taint - 1.0).abs() < 1e-12);

    // Victim's change output goes back to the victim cluster
    let change = graph.nodes.iter().find(|n| n.outpoint == op(2, 1)).unwrap();
    assert_eq!(change.cluster, "victim");
    assert_eq!(change.status, NodeStatus::Unspent);

    let summary = &graph.transactions[&txid(2)];
    assert_eq!(summary.fee, Some(10_000));
    assert!(!summary.verdict.is_coinjoin);
}

#[tokio::test]
async fn test_value_is_conserved_across_edges() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 10, 10))
        .await
        .unwrap();

    let mut sent: HashMap<usize, u64> = HashMap::new();
    for edge in &graph.edges {
        *sent.entry(edge.source.0).or_default() += edge.value;
        assert!(edge.share <= 1.0);
        assert!(edge.taint >= 0.0 && edge.taint <= 1.0);
    }
    for (source, value) in sent {
        assert!(
            value <= graph.nodes[source].value,
            "node {} sends {} of {}",
            source,
            value,
            graph.nodes[source].value
        );
    }

    // Tainted value at the leaves never exceeds the seed
    let seed_value = graph.seeds().map(|n| n.value).sum::<u64>() as f64;
    let leaf_taint: f64 = graph
        .nodes
        .iter()
        .filter(|n| n.status == NodeStatus::Unspent)
        .map(|n| n.value as f64 * n.taint)
        .sum();
    assert!(leaf_taint <= seed_value);
}

#[tokio::test]
async fn test_depth_budget_bounds_paths() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 1, 10))
        .await
        .unwrap();

    assert_eq!(graph.nodes.len(), 3);
    assert!(graph.max_path_length() <= 1);
    assert!(graph.truncated);
    assert!(graph.budgets_hit.contains(&BudgetKind::Depth));
    assert_eq!(graph.frontier.len(), 2);
    assert!(graph
        .nodes
        .iter()
        .filter(|n| n.depth == 1)
        .all(|n| n.status == NodeStatus::DepthLimit));
    assert_eq!(graph.completeness(), Completeness::BoundedByPolicy);
}

#[tokio::test]
async fn test_fanout_budget_keeps_highest_value_edges() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 10, 1))
        .await
        .unwrap();

    assert!(graph.budgets_hit.contains(&BudgetKind::Fanout));
    assert_eq!(graph.stats.truncated_edges, 2);
    for node in &graph.nodes {
        let followed = graph
            .outgoing(node.id)
            .filter(|e| e.kind == EdgeKind::Spend)
            .count();
        assert!(followed <= 1);
    }

    // 300M thief output beats 199.99M change; 150M exchange beats 149.99M thief2
    assert!(node_by_owner(&graph, "exchange").is_some());
    assert!(node_by_owner(&graph, "mule").is_none());
    let thief2 = node_by_owner(&graph, "thief2").unwrap();
    assert_eq!(thief2.status, NodeStatus::TruncatedLowValue);
}

#[tokio::test]
async fn test_identical_requests_produce_identical_graphs() {
    let request = forward(TraceSeed::Transaction(txid(2)), 10, 10);

    let first = tracer(theft_ledger().gateway()).trace(&request).await.unwrap();
    let second = tracer(theft_ledger().gateway()).trace(&request).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.fingerprint().unwrap(), second.fingerprint().unwrap());
}

#[tokio::test]
async fn test_earlier_traces_do_not_affect_later_ones() {
    // tx 2 and tx 3 both claim 1:0; tx 3 also spends 5:0
    let mut ledger = Ledger::new();
    ledger.coinbase(1, "a", 1_000, 10);
    ledger.coinbase(5, "z", 1_000, 10);
    ledger.spend(2, &[(1, 0)], &[("b", 900)], Some(11));
    ledger.spend(3, &[(1, 0), (5, 0)], &[("c", 1_900)], Some(11));
    let request = forward(TraceSeed::OutPoint(op(5, 0)), 10, 10);

    let fresh = tracer(ledger.gateway()).trace(&request).await.unwrap();
    assert_eq!(fresh.nodes[0].status, NodeStatus::Expanded);
    assert!(node_by_owner(&fresh, "c").is_some());

    let shared = tracer(ledger.gateway());
    shared
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 10, 10))
        .await
        .unwrap();
    let after = shared.trace(&request).await.unwrap();

    assert_eq!(after, fresh);
    assert_eq!(after.fingerprint().unwrap(), fresh.fingerprint().unwrap());
    assert_eq!(after.stats.integrity_violations, 0);
}

#[tokio::test]
async fn test_transaction_seed_starts_from_every_output() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::Transaction(txid(3)), 10, 10))
        .await
        .unwrap();

    let seeds: Vec<_> = graph.seeds().map(|n| n.outpoint).collect();
    assert_eq!(seeds, vec![op(3, 0), op(3, 1)]);
    assert!(node_by_owner(&graph, "mule").is_some());
}

#[tokio::test]
async fn test_address_seed_uses_address_history() {
    let genesis = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    let mut ledger = Ledger::new();
    ledger.coinbase(30, genesis, 5_000_000_000, 1);
    ledger.coinbase(31, "miner", 100_000, 2);
    ledger.spend(32, &[(31, 0)], &[(genesis, 90_000)], Some(3));
    ledger.spend(33, &[(30, 0)], &[("cold", 4_999_990_000)], Some(4));

    let tracer = tracer(ledger.gateway());
    let seed = tracer.parse_seed(genesis).unwrap();
    let graph = tracer.trace(&forward(seed, 10, 10)).await.unwrap();

    let seeds: Vec<_> = graph.seeds().map(|n| n.outpoint).collect();
    assert_eq!(seeds, vec![op(30, 0), op(32, 0)]);
    assert_eq!(node_by_owner(&graph, "cold").unwrap().outpoint, op(33, 0));
    assert!(node_by_owner(&graph, "miner").is_none());
}

#[tokio::test]
async fn test_missing_seed_is_reported_not_raised() {
    let tracer = tracer(theft_ledger().gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(99, 0)), 10, 10))
        .await
        .unwrap();

    assert!(graph.is_empty());
    assert_eq!(graph.unresolved_seeds.len(), 1);
    assert_eq!(graph.completeness(), Completeness::BoundedByMissingData);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let tracer = tracer(theft_ledger().gateway());

    let zero_fanout = tracer
        .trace(&forward(TraceSeed::OutPoint(op(1, 0)), 10, 0))
        .await;
    assert!(matches!(zero_fanout, Err(TraceError::InvalidInput(_))));

    let empty_frontier = tracer
        .trace(&forward(TraceSeed::Frontier(Vec::new()), 10, 10))
        .await;
    assert!(matches!(empty_frontier, Err(TraceError::InvalidInput(_))));

    assert!(tracer.parse_seed("not a seed").is_err());
}

#[tokio::test]
async fn test_revisits_do_not_expand_twice() {
    // Two outputs of tx 71 are recombined by tx 72
    let mut ledger = Ledger::new();
    ledger.coinbase(70, "alice", 1_000_000, 10);
    ledger.spend(71, &[(70, 0)], &[("bob", 600_000), ("carol", 400_000)], Some(11));
    ledger.spend(72, &[(71, 0), (71, 1)], &[("dave", 990_000)], Some(12));

    let tracer = tracer(ledger.gateway());
    let graph = tracer
        .trace(&forward(TraceSeed::OutPoint(op(70, 0)), 10, 10))
        .await
        .unwrap();

    assert_eq!(graph.stats.transactions_expanded, 2);
    let dave = node_by_owner(&graph, "dave").unwrap();
    assert_eq!(dave.status, NodeStatus::Unspent);
    // Both inputs were co-spent in one expansion: one edge each into dave
    let into_dave = graph.edges.iter().filter(|e| e.target == dave.id).count();
    assert_eq!(into_dave, 2);
    assert_eq!(graph.stats.revisits, 0);
    // bob and carol now share a cluster, labelled by the smallest member
    assert_eq!(node_by_owner(&graph, "carol").unwrap().cluster, "bob");
}
