use crate::common::{theft_ledger, tracer, txid, whirlpool_ledger, Ledger};
use chain_forensics::classifier::CoinJoinClassifier;
use chain_forensics::config::ClassifierConfig;
use chain_forensics::graph::{AddressClusters, Singletons};
use chain_forensics::types::{MixPattern, SignalKind};

#[tokio::test]
async fn test_whirlpool_mix_is_classified() {
    let tracer = tracer(whirlpool_ledger().gateway());
    let verdict = tracer.inspect_transaction(&txid(20)).await.unwrap();

    assert!(verdict.is_coinjoin);
    assert_eq!(verdict.pattern, MixPattern::Whirlpool);
    assert_eq!(verdict.participants, 5);
    assert_eq!(verdict.anonymity_set, 5);
    assert_eq!(verdict.denomination, Some(1_000_000));
    assert_eq!(verdict.confidence, 1.0);
}

#[tokio::test]
async fn test_simple_payment_is_not_mixing() {
    let tracer = tracer(theft_ledger().gateway());
    let verdict = tracer.inspect_transaction(&txid(2)).await.unwrap();

    assert!(!verdict.is_coinjoin);
    assert_eq!(verdict.pattern, MixPattern::None);
    assert_eq!(verdict.anonymity_set, 1);
    assert!(verdict
        .signals
        .iter()
        .any(|s| s.kind == SignalKind::DominantInput));
}

#[tokio::test]
async fn test_coinbase_is_never_mixing() {
    let tracer = tracer(theft_ledger().gateway());
    let verdict = tracer.inspect_transaction(&txid(1)).await.unwrap();
    assert!(!verdict.is_coinjoin);
    assert_eq!(verdict.confidence, 0.0);
}

#[tokio::test]
async fn test_classification_is_idempotent() {
    let tracer = tracer(whirlpool_ledger().gateway());
    let first = tracer.inspect_transaction(&txid(20)).await.unwrap();
    let second = tracer.inspect_transaction(&txid(20)).await.unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_common_ownership_suppresses_mixing() {
    // Same 5x5 shape, but one wallet funds every input
    let mut ledger = Ledger::new();
    for id in 10..15u8 {
        ledger.coinbase(id, &format!("w{}", id), 1_000_000, 200);
    }
    let inputs: Vec<(u8, u32)> = (10..15).map(|id| (id, 0)).collect();
    let outputs: Vec<(&str, u64)> = ["m0", "m1", "m2", "m3", "m4"]
        .iter()
        .map(|o| (*o, 1_000_000))
        .collect();
    ledger.spend(20, &inputs, &outputs, Some(201));
    let mix = ledger.transactions().into_iter().find(|t| t.txid == txid(20)).unwrap();

    let classifier = CoinJoinClassifier::default();
    assert!(classifier.classify(&mix, &Singletons).is_coinjoin);

    let mut clusters = AddressClusters::new();
    for id in 11..15u8 {
        clusters.union("w10", &format!("w{}", id));
    }
    let verdict = classifier.classify(&mix, &clusters);
    assert!(!verdict.is_coinjoin);
    assert_eq!(verdict.participants, 1);
}

#[test]
fn test_threshold_is_configurable() {
    let ledger = whirlpool_ledger();
    let mix = ledger.transactions().into_iter().find(|t| t.txid == txid(20)).unwrap();

    let strict = CoinJoinClassifier::new(ClassifierConfig {
        confidence_threshold: 1.0,
        denominations: Vec::new(),
        whirlpool_denominations: Vec::new(),
        ..ClassifierConfig::default()
    });
    let verdict = strict.classify(&mix, &Singletons);
    // 0.45 + 0.25 without the denomination signal
    assert!((verdict.confidence - 0.70).abs() < 1e-9);
    assert!(!verdict.is_coinjoin);
}
