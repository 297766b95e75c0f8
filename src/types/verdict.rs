use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural mixing pattern recognised by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MixPattern {
    None,
    EqualOutput,
    FixedDenomination,
    Whirlpool,
}

impl fmt::Display for MixPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MixPattern::None => "none",
            MixPattern::EqualOutput => "equal_output",
            MixPattern::FixedDenomination => "fixed_denomination",
            MixPattern::Whirlpool => "whirlpool",
        };
        f.write_str(name)
    }
}

/// Classifier rule that contributed to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    EqualOutputs,
    ParticipantCount,
    DenominationMatch,
    DominantInput,
}

/// A fired rule and the (signed) weight it added to the score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub contribution: f64,
}

/// CoinJoin classification for a single transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinJoinVerdict {
    pub txid: Txid,
    pub is_coinjoin: bool,
    /// Clamped weighted score in [0, 1]
    pub confidence: f64,
    pub pattern: MixPattern,
    /// Distinct input clusters
    pub participants: usize,
    /// Count of equal-value outputs in the largest equal-value group (>= 1)
    pub anonymity_set: usize,
    /// Value of that equal-value group, when one exists
    pub denomination: Option<u64>,
    pub signals: Vec<Signal>,
}

impl CoinJoinVerdict {
    /// Factor applied to taint crossing this transaction under the dilute policy
    pub fn dilution_factor(&self) -> f64 {
        1.0 / self.anonymity_set.max(1) as f64
    }
}
