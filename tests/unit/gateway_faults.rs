//! Gateway failures and inconsistent ledger data surface as branch markers

use crate::common::{budget, op, theft_ledger, tracer, txid, Ledger};
use chain_forensics::tracer::{TraceRequest, TraceSeed};
use chain_forensics::types::{
    Completeness, FrontierEntry, NodeStatus, SpendStatus, TraceDirection,
};

fn forward_from(outpoint: bitcoin::OutPoint) -> TraceRequest {
    TraceRequest {
        seed: TraceSeed::OutPoint(outpoint),
        direction: TraceDirection::Forward,
        budget: budget(10, 10),
    }
}

#[tokio::test]
async fn test_transient_failures_recover_within_retry_limit() {
    let tracer = tracer(theft_ledger().gateway());
    tracer.builder().gateway().fail_transiently(txid(3), 2);

    let graph = tracer.trace(&forward_from(op(1, 0))).await.unwrap();
    assert_eq!(graph.completeness(), Completeness::FullyTraced);
    assert!(graph.nodes.iter().any(|n| n.owner == "mule"));
}

#[tokio::test]
async fn test_exhausted_retries_mark_branch_unresolved() {
    let tracer = tracer(theft_ledger().gateway());
    tracer.builder().gateway().fail_transiently(txid(3), 10);

    let graph = tracer.trace(&forward_from(op(1, 0))).await.unwrap();

    let thief = graph.nodes.iter().find(|n| n.outpoint == op(2, 0)).unwrap();
    assert!(matches!(thief.status, NodeStatus::Unresolved { .. }));
    assert_eq!(graph.stats.unresolved_branches, 1);
    // The sibling branch is unaffected
    let change = graph.nodes.iter().find(|n| n.outpoint == op(2, 1)).unwrap();
    assert_eq!(change.status, NodeStatus::Unspent);
    assert_eq!(graph.completeness(), Completeness::BoundedByMissingData);
}

#[tokio::test]
async fn test_spender_mismatch_is_an_integrity_violation() {
    let tracer = tracer(theft_ledger().gateway());
    // tx 4 spends 3:1, not 2:1
    tracer
        .builder()
        .gateway()
        .override_spender(op(2, 1), SpendStatus::Spent { txid: txid(4) });

    let graph = tracer.trace(&forward_from(op(1, 0))).await.unwrap();

    let change = graph.nodes.iter().find(|n| n.outpoint == op(2, 1)).unwrap();
    assert!(matches!(change.status, NodeStatus::IntegrityViolation { .. }));
    assert_eq!(graph.stats.integrity_violations, 1);
    assert!(graph.nodes.iter().any(|n| n.owner == "mule"));
}

#[tokio::test]
async fn test_double_spend_is_excluded() {
    // tx 41 and tx 42 both claim 40:0
    let mut ledger = Ledger::new();
    ledger.coinbase(40, "a", 1_000, 10);
    ledger.spend(41, &[(40, 0)], &[("b", 900)], Some(11));
    ledger.spend(42, &[(40, 0)], &[("c", 800)], Some(11));

    let tracer = tracer(ledger.gateway());
    let entries = [op(41, 0), op(42, 0)]
        .into_iter()
        .map(|outpoint| FrontierEntry {
            outpoint,
            taint: 1.0,
            depth: 0,
        })
        .collect();
    let graph = tracer
        .trace(&TraceRequest {
            seed: TraceSeed::Frontier(entries),
            direction: TraceDirection::Backward,
            budget: budget(10, 10),
        })
        .await
        .unwrap();

    let second = graph.nodes.iter().find(|n| n.outpoint == op(42, 0)).unwrap();
    match &second.status {
        NodeStatus::IntegrityViolation { reason } => assert!(reason.contains("spent by both")),
        other => panic!("expected integrity violation, got {:?}", other),
    }
    let funding = graph.nodes.iter().find(|n| n.outpoint == op(40, 0)).unwrap();
    assert_eq!(funding.status, NodeStatus::Coinbase);
    assert_eq!(graph.stats.integrity_violations, 1);
    let first = graph.nodes.iter().find(|n| n.outpoint == op(41, 0)).unwrap();
    assert_eq!(first.status, NodeStatus::Expanded);

    // The conflict is scoped to that trace; tracing tx 42 alone is clean
    let alone = tracer
        .trace(&TraceRequest {
            seed: TraceSeed::OutPoint(op(42, 0)),
            direction: TraceDirection::Backward,
            budget: budget(10, 10),
        })
        .await
        .unwrap();
    assert_eq!(alone.stats.integrity_violations, 0);
    assert_eq!(alone.nodes[0].status, NodeStatus::Expanded);
}

#[tokio::test]
async fn test_overspending_transaction_is_rejected() {
    let mut ledger = Ledger::new();
    ledger.coinbase(90, "a", 1_000, 10);
    ledger.spend(91, &[(90, 0)], &[("b", 5_000)], Some(11));

    let tracer = tracer(ledger.gateway());
    let graph = tracer.trace(&forward_from(op(90, 0))).await.unwrap();

    assert!(matches!(
        graph.nodes[0].status,
        NodeStatus::IntegrityViolation { .. }
    ));
    assert_eq!(graph.nodes.len(), 1);
}
