//! CoinJoin classifier
//!
//! Scores a transaction against weighted structural signals and compares the
//! clamped score with the configured confidence threshold:
//! - **equal outputs** - at least `min_equal_outputs` outputs of one value,
//!   backed by as many distinct input clusters
//! - **participants** - at least `min_participants` distinct input clusters
//! - **denomination** - the equal-output value is a known mixing denomination
//! - **dominant input** - one cluster funds more than `dominant_input_ratio`
//!   of the inputs (negative signal)
//!
//! Classification is a pure function of the transaction and the cluster view
//! supplied for its inputs.

pub mod patterns;

use crate::config::ClassifierConfig;
use crate::graph::ClusterView;
use crate::types::{CoinJoinVerdict, MixPattern, Signal, SignalKind, TxRecord};
use patterns::{dominant_cluster_share, input_cluster_values, is_whirlpool, largest_equal_output_group};
use tracing::debug;

pub struct CoinJoinClassifier {
    config: ClassifierConfig,
}

impl CoinJoinClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    pub fn classify(&self, tx: &TxRecord, clusters: &impl ClusterView) -> CoinJoinVerdict {
        if tx.is_coinbase() {
            return CoinJoinVerdict {
                txid: tx.txid,
                is_coinjoin: false,
                confidence: 0.0,
                pattern: MixPattern::None,
                participants: 0,
                anonymity_set: 1,
                denomination: None,
                signals: Vec::new(),
            };
        }

        let cluster_values = input_cluster_values(tx, clusters);
        let participants = cluster_values.len();
        let group = largest_equal_output_group(tx);
        let (anonymity_set, denomination) = match group {
            Some(g) if g.count >= 2 => (g.count, Some(g.value)),
            _ => (1, None),
        };

        let mut signals = Vec::new();

        if anonymity_set >= self.config.min_equal_outputs
            && participants >= self.config.min_equal_outputs
        {
            // Full weight only when every equal output can map to its own input cluster
            let coverage = (participants as f64 / anonymity_set as f64).min(1.0);
            signals.push(Signal {
                kind: SignalKind::EqualOutputs,
                contribution: self.config.equal_output_weight * coverage,
            });
        }

        if participants >= self.config.min_participants {
            signals.push(Signal {
                kind: SignalKind::ParticipantCount,
                contribution: self.config.participant_weight,
            });
        }

        let denomination_match = denomination
            .map(|value| self.config.denominations.contains(&value))
            .unwrap_or(false);
        if denomination_match {
            signals.push(Signal {
                kind: SignalKind::DenominationMatch,
                contribution: self.config.denomination_weight,
            });
        }

        if let Some(share) = dominant_cluster_share(&cluster_values) {
            if share > self.config.dominant_input_ratio {
                signals.push(Signal {
                    kind: SignalKind::DominantInput,
                    contribution: -self.config.dominant_input_penalty,
                });
            }
        }

        let raw_score: f64 = signals.iter().map(|s| s.contribution).sum();
        let confidence = raw_score.clamp(0.0, 1.0);
        let is_coinjoin = confidence >= self.config.confidence_threshold;

        let fired = |kind: SignalKind| signals.iter().any(|s| s.kind == kind);
        let pattern = if !is_coinjoin {
            MixPattern::None
        } else if is_whirlpool(tx, &self.config.whirlpool_denominations) {
            MixPattern::Whirlpool
        } else if fired(SignalKind::DenominationMatch) {
            MixPattern::FixedDenomination
        } else if fired(SignalKind::EqualOutputs) {
            MixPattern::EqualOutput
        } else {
            MixPattern::None
        };

        debug!(
            "Classified {}: score {:.3}, pattern {}, participants {}, anonymity set {}",
            tx.txid, confidence, pattern, participants, anonymity_set
        );

        CoinJoinVerdict {
            txid: tx.txid,
            is_coinjoin,
            confidence,
            pattern,
            participants,
            anonymity_set,
            denomination,
            signals,
        }
    }
}

impl Default for CoinJoinClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}
