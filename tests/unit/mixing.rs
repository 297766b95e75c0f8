//! Tracing through a CoinJoin under the stop and dilute policies

use crate::common::{budget, op, tracer, txid, whirlpool_ledger};
use chain_forensics::config::MixingPolicy;
use chain_forensics::tracer::{TraceRequest, TraceSeed};
use chain_forensics::types::{Completeness, MixPattern, NodeStatus, TraceDirection};

fn request(policy: MixingPolicy) -> TraceRequest {
    let mut budget = budget(10, 10);
    budget.mixing_policy = policy;
    TraceRequest {
        seed: TraceSeed::OutPoint(op(10, 0)),
        direction: TraceDirection::Forward,
        budget,
    }
}

#[tokio::test]
async fn test_stop_policy_marks_boundary() {
    let tracer = tracer(whirlpool_ledger().gateway());
    let graph = tracer.trace(&request(MixingPolicy::Stop)).await.unwrap();

    assert_eq!(graph.nodes.len(), 1);
    assert!(graph.edges.is_empty());
    match &graph.nodes[0].status {
        NodeStatus::MixingBoundary { txid: mix, confidence } => {
            assert_eq!(*mix, txid(20));
            assert!(*confidence >= 0.6);
        }
        other => panic!("expected mixing boundary, got {:?}", other),
    }
    assert_eq!(graph.stats.mixing_transactions, 1);
    assert_eq!(graph.transactions[&txid(20)].verdict.pattern, MixPattern::Whirlpool);
    assert_eq!(graph.completeness(), Completeness::BoundedByPolicy);
}

#[tokio::test]
async fn test_dilute_policy_divides_taint() {
    let tracer = tracer(whirlpool_ledger().gateway());
    let graph = tracer.trace(&request(MixingPolicy::Dilute)).await.unwrap();

    // 1 of 5 equal inputs, then divided by the anonymity set of 5
    let mix_outputs: Vec<_> = graph.nodes.iter().filter(|n| n.depth == 1).collect();
    assert_eq!(mix_outputs.len(), 5);
    for node in &mix_outputs {
        assert!((node.taint - 0.04).abs() < 1e-12);
    }
    for edge in graph.edges.iter().filter(|e| e.txid == txid(20)) {
        assert!((edge.confidence - 0.2).abs() < 1e-12);
        assert_eq!(edge.value, 200_000);
    }

    let after = graph.nodes.iter().find(|n| n.owner == "after_mix").unwrap();
    assert!((after.taint - 0.04).abs() < 1e-12);
    assert_eq!(after.status, NodeStatus::Unspent);
    assert_eq!(graph.completeness(), Completeness::FullyTraced);
}

#[tokio::test]
async fn test_mix_inputs_are_not_clustered() {
    let tracer = tracer(whirlpool_ledger().gateway());
    let graph = tracer.trace(&request(MixingPolicy::Dilute)).await.unwrap();

    let seed = &graph.nodes[0];
    assert_eq!(seed.cluster, "p0");
    // Mixing transactions never merge their inputs
    let clusters: std::collections::BTreeSet<_> = graph.nodes.iter().map(|n| n.cluster.as_str()).collect();
    assert_eq!(clusters.len(), graph.nodes.len());
}
