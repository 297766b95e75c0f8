use crate::common::{budget, op, theft_ledger, tracer, txid, Ledger};
use chain_forensics::timeline::{export_csv, TimelineGenerator, TimelineOptions};
use chain_forensics::tracer::{TraceRequest, TraceSeed};
use chain_forensics::types::TraceDirection;

#[tokio::test]
async fn test_merged_timeline_is_chronological() {
    let tracer = tracer(theft_ledger().gateway());
    let (forward, backward) = tracer
        .trace_both(TraceSeed::OutPoint(op(2, 0)), budget(10, 10))
        .await
        .unwrap();

    let timeline = TimelineGenerator::default().merge(&forward, &backward);
    let order: Vec<_> = timeline.events.iter().map(|e| e.txid).collect();
    assert_eq!(order, vec![txid(2), txid(3), txid(3), txid(4)]);

    let theft = &timeline.events[0];
    assert_eq!(theft.from_cluster, "victim");
    assert_eq!(theft.to_cluster, "thief");
    assert_eq!(theft.direction, TraceDirection::Backward);
    assert_eq!(theft.amount, 300_000_000);
    assert!(theft.timestamp.is_some());

    assert_eq!(timeline.events[1].to_outpoint, op(3, 0));
    assert_eq!(timeline.events[2].to_outpoint, op(3, 1));

    let summary = &timeline.summary;
    assert_eq!(summary.event_count, 4);
    assert_eq!(summary.first_height, Some(101));
    assert_eq!(summary.last_height, Some(103));
    assert_eq!(summary.distinct_clusters, 5);
    assert_eq!(summary.coinjoin_transactions, 0);
    assert_eq!(summary.span_days, Some(0));
}

#[tokio::test]
async fn test_same_block_spend_ordered_after_funding() {
    // tx 0x30 and its spender tx 0x08 confirm in the same block, positions unknown
    let mut ledger = Ledger::new();
    ledger.coinbase(0x40, "alice", 1_000_000, 149);
    ledger.spend(0x30, &[(0x40, 0)], &[("bob", 990_000)], Some(150));
    ledger.spend(0x08, &[(0x30, 0)], &[("carol", 980_000)], Some(150));
    let ledger = ledger.without_positions();

    let tracer = tracer(ledger.gateway());
    let graph = tracer
        .trace(&TraceRequest {
            seed: TraceSeed::OutPoint(op(0x40, 0)),
            direction: TraceDirection::Forward,
            budget: budget(10, 10),
        })
        .await
        .unwrap();

    let timeline = TimelineGenerator::default().from_graph(&graph);
    let order: Vec<_> = timeline.events.iter().map(|e| e.txid).collect();
    assert_eq!(order, vec![txid(0x30), txid(0x08)]);
    assert!(timeline.events.iter().all(|e| e.block_position.is_none()));
}

#[tokio::test]
async fn test_compact_mode_folds_self_transfers() {
    let mut ledger = Ledger::new();
    ledger.coinbase(60, "alice", 1_000, 10);
    ledger.spend(61, &[(60, 0)], &[("bob", 1_000)], Some(11));
    ledger.spend(62, &[(61, 0)], &[("bob", 1_000)], Some(12));
    ledger.spend(63, &[(62, 0)], &[("carol", 1_000)], Some(13));

    let tracer = tracer(ledger.gateway());
    let graph = tracer
        .trace(&TraceRequest {
            seed: TraceSeed::OutPoint(op(60, 0)),
            direction: TraceDirection::Forward,
            budget: budget(10, 10),
        })
        .await
        .unwrap();

    let full = TimelineGenerator::default().from_graph(&graph);
    assert_eq!(full.events.len(), 3);
    assert!(full.events.iter().all(|e| e.merged_hops == 0));

    let compact = TimelineGenerator::new(TimelineOptions { compact: true }).from_graph(&graph);
    assert_eq!(compact.events.len(), 2);
    assert_eq!(compact.events[0].from_cluster, "alice");
    assert_eq!(compact.events[0].to_outpoint, op(62, 0));
    assert_eq!(compact.events[0].merged_hops, 1);
    assert_eq!(compact.events[1].to_cluster, "carol");
}

#[tokio::test]
async fn test_csv_export() -> anyhow::Result<()> {
    let tracer = tracer(theft_ledger().gateway());
    let (forward, backward) = tracer
        .trace_both(TraceSeed::OutPoint(op(2, 0)), budget(10, 10))
        .await?;
    let timeline = TimelineGenerator::default().merge(&forward, &backward);

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("timeline.csv");
    export_csv(&timeline, &path)?;

    let content = std::fs::read_to_string(&path)?;
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), timeline.events.len() + 1);
    assert!(lines[0].starts_with("block_height,"));
    assert!(lines[1].starts_with("101,"));
    Ok(())
}

#[tokio::test]
async fn test_merged_timeline_uses_one_cluster_per_address() {
    // tx 4 co-spends mallory's output with alpha's, which only the forward trace sees
    let mut ledger = Ledger::new();
    ledger.coinbase(1, "zed", 1_000, 10);
    ledger.coinbase(2, "alpha", 500, 10);
    ledger.spend(3, &[(1, 0)], &[("mallory", 990)], Some(11));
    ledger.spend(4, &[(3, 0), (2, 0)], &[("dest", 1_480)], Some(12));

    let tracer = tracer(ledger.gateway());
    let (forward, backward) = tracer
        .trace_both(TraceSeed::OutPoint(op(3, 0)), budget(10, 10))
        .await
        .unwrap();

    // Each trace labels the seed on its own
    assert_eq!(backward.nodes[0].cluster, "mallory");
    assert_eq!(forward.nodes[0].cluster, "alpha");

    let timeline = TimelineGenerator::default().merge(&forward, &backward);
    let order: Vec<_> = timeline.events.iter().map(|e| e.txid).collect();
    assert_eq!(order, vec![txid(3), txid(4)]);
    assert_eq!(timeline.events[0].from_cluster, "zed");
    assert_eq!(timeline.events[0].to_cluster, "alpha");
    assert_eq!(timeline.events[1].from_cluster, "alpha");
    assert_eq!(timeline.events[1].to_cluster, "dest");
    assert_eq!(timeline.summary.distinct_clusters, 3);
}
