//! Backward tracing and resumable frontiers

use crate::common::{budget, op, theft_ledger, tracer, tracer_config, tracer_with, txid, Ledger};
use chain_forensics::tracer::{TraceRequest, TraceSeed};
use chain_forensics::types::{BudgetKind, Completeness, NodeStatus, TraceDirection};
use std::time::Duration;

#[tokio::test]
async fn test_backward_trace_reaches_coinbase() {
    let tracer = tracer(theft_ledger().gateway());
    let request = TraceRequest {
        seed: TraceSeed::OutPoint(op(4, 0)),
        direction: TraceDirection::Backward,
        budget: budget(10, 10),
    };
    let graph = tracer.trace(&request).await.unwrap();

    // mule <- thief2 <- thief <- victim <- coinbase
    let outpoints: Vec<_> = graph.nodes.iter().map(|n| n.outpoint).collect();
    assert_eq!(outpoints, vec![op(4, 0), op(3, 1), op(2, 0), op(1, 0)]);

    let origin = &graph.nodes[3];
    assert_eq!(origin.owner, "victim");
    assert_eq!(origin.status, NodeStatus::Coinbase);
    assert_eq!(origin.depth, 3);
    assert_eq!(graph.completeness(), Completeness::FullyTraced);

    // Edge orientation follows traversal; flow() restores money-flow order
    let first = &graph.edges[0];
    assert_eq!(first.txid, txid(4));
    let (from, to) = first.flow(graph.direction);
    assert_eq!(graph.node(from).outpoint, op(3, 1));
    assert_eq!(graph.node(to).outpoint, op(4, 0));
}

#[tokio::test]
async fn test_backward_taint_is_share_of_outputs() {
    // 60% of tx 81's outputs is the seed; its single input gets taint 0.6
    let mut ledger = Ledger::new();
    ledger.coinbase(80, "funder", 1_000_000, 10);
    ledger.spend(81, &[(80, 0)], &[("target", 600_000), ("other", 400_000)], Some(11));

    let tracer = tracer(ledger.gateway());
    let request = TraceRequest {
        seed: TraceSeed::OutPoint(op(81, 0)),
        direction: TraceDirection::Backward,
        budget: budget(10, 10),
    };
    let graph = tracer.trace(&request).await.unwrap();

    let funder = graph.nodes.iter().find(|n| n.owner == "funder").unwrap();
    assert!((funder.taint - 0.6).abs() < 1e-12);
    assert_eq!(graph.edges[0].value, 600_000);
}

#[tokio::test]
async fn test_trace_both_directions() {
    let tracer = tracer(theft_ledger().gateway());
    let (forward, backward) = tracer
        .trace_both(TraceSeed::OutPoint(op(2, 0)), budget(10, 10))
        .await
        .unwrap();

    assert_eq!(forward.direction, TraceDirection::Forward);
    assert_eq!(backward.direction, TraceDirection::Backward);
    assert!(forward.nodes.iter().any(|n| n.owner == "mule"));
    assert!(backward.nodes.iter().any(|n| n.owner == "victim"));
    assert!(!backward.nodes.iter().any(|n| n.owner == "mule"));
}

/// Chain of 12 single-output hops from coinbase 50: txs 51..=62
fn long_chain() -> Ledger {
    let mut ledger = Ledger::new();
    ledger.coinbase(50, "start", 10_000_000, 300);
    let mut value = 10_000_000u64;
    for id in 51..=62u8 {
        value -= 1_000;
        let owner = format!("hop{}", id);
        ledger.spend(id, &[(id - 1, 0)], &[(owner.as_str(), value)], Some(300 + id as u32));
    }
    ledger
}

#[tokio::test(start_paused = true)]
async fn test_time_budget_truncates_and_resumes() {
    let gateway = long_chain().gateway().with_latency(Duration::from_secs(1));
    let tracer = tracer_with(gateway, tracer_config());

    let mut limited = budget(20, 10);
    limited.time_budget = Duration::from_secs(5);
    let request = TraceRequest {
        seed: TraceSeed::OutPoint(op(50, 0)),
        direction: TraceDirection::Forward,
        budget: limited,
    };
    let partial = tracer.trace(&request).await.unwrap();

    assert!(partial.truncated);
    assert!(partial.budgets_hit.contains(&BudgetKind::Time));
    assert!(!partial.frontier.is_empty());
    assert!(!partial.nodes.iter().any(|n| n.outpoint == op(62, 0)));
    assert_eq!(partial.completeness(), Completeness::BoundedByPolicy);
    for entry in &partial.frontier {
        let node = partial.nodes.iter().find(|n| n.outpoint == entry.outpoint).unwrap();
        assert_eq!(node.status, NodeStatus::Frontier);
        assert_eq!(node.depth, entry.depth);
    }

    let resumed = tracer
        .trace(&TraceRequest {
            seed: TraceSeed::resume(&partial).unwrap(),
            direction: TraceDirection::Forward,
            budget: budget(20, 10),
        })
        .await
        .unwrap();

    assert!(!resumed.truncated);
    let last = resumed.nodes.iter().find(|n| n.outpoint == op(62, 0)).unwrap();
    assert_eq!(last.status, NodeStatus::Unspent);
    assert_eq!(last.depth, 12);
    assert!(TraceSeed::resume(&resumed).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_address_seeding_respects_time_budget() {
    let genesis = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";
    let mut ledger = Ledger::new();
    for id in 100..120u8 {
        ledger.coinbase(id, genesis, 50_000, 400 + id as u32);
    }
    let gateway = ledger.gateway().with_latency(Duration::from_secs(1));
    let tracer = tracer_with(gateway, tracer_config());

    let mut limited = budget(10, 10);
    limited.time_budget = Duration::from_secs(3);
    let request = TraceRequest {
        seed: tracer.parse_seed(genesis).unwrap(),
        direction: TraceDirection::Forward,
        budget: limited,
    };

    let started = tokio::time::Instant::now();
    let graph = tracer.trace(&request).await.unwrap();
    let elapsed = started.elapsed();

    // Budget plus drain grace plus one in-flight call
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    assert!(graph.truncated);
    assert!(graph.budgets_hit.contains(&BudgetKind::Time));
    assert!(!graph.nodes.is_empty());
    assert!(graph.nodes.len() < 20);
    assert_eq!(graph.nodes.len() + graph.unresolved_seeds.len(), 20);
}
