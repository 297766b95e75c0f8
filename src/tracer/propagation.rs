//! Value-weighted taint propagation and fan-out selection
//!
//! Taint is the estimated share of a node's value that originated from the
//! seed. At each transaction the traced side's tainted value is pooled and
//! spread across the other side in proportion to value:
//!
//! - forward: `f = sum(t_i * v_i) / total_in`, every output receives `f`
//! - backward: `g = sum(t_j * w_j) / total_out`, every input receives `g`
//!
//! Edge values are integer floors of `v * w / total`, so a source never
//! passes on more than it holds.

use crate::config::MixingPolicy;
use crate::types::CoinJoinVerdict;

/// A traced node entering the transaction: its value and taint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contribution {
    pub value: u64,
    pub taint: f64,
}

/// Next-hop candidate on the far side of the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    /// Output index (forward) or input index (backward)
    pub index: u32,
    pub value: u64,
}

/// Split of candidates under the fan-out cap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutSelection {
    pub followed: Vec<Candidate>,
    pub truncated: Vec<Candidate>,
}

/// How a transaction's verdict changes propagation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixingEffect {
    /// Ordinary transaction
    Propagate,
    /// Mixing transaction under the dilute policy: scale taint by `factor`
    Dilute { factor: f64 },
    /// Mixing transaction under the stop policy
    Boundary,
}

pub fn mixing_effect(verdict: &CoinJoinVerdict, policy: MixingPolicy) -> MixingEffect {
    if !verdict.is_coinjoin {
        return MixingEffect::Propagate;
    }
    match policy {
        MixingPolicy::Stop => MixingEffect::Boundary,
        MixingPolicy::Dilute => MixingEffect::Dilute {
            factor: verdict.dilution_factor(),
        },
    }
}

impl MixingEffect {
    /// Confidence attached to edges crossing the transaction
    pub fn confidence(&self) -> f64 {
        match self {
            MixingEffect::Dilute { factor } => *factor,
            MixingEffect::Propagate | MixingEffect::Boundary => 1.0,
        }
    }

    fn scale(&self, taint: f64) -> f64 {
        match self {
            MixingEffect::Dilute { factor } => taint * factor,
            MixingEffect::Propagate | MixingEffect::Boundary => taint,
        }
    }
}

/// Taint carried to every node on the far side of the transaction
///
/// `total` is the full value of the traced side (all inputs when tracing
/// forward, all outputs when tracing backward), so untraced co-spent value
/// dilutes the result.
pub fn pooled_taint(contributions: &[Contribution], total: u64, effect: MixingEffect) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let tainted: f64 = contributions
        .iter()
        .map(|c| c.taint * c.value as f64)
        .sum();
    effect.scale((tainted / total as f64).clamp(0.0, 1.0))
}

/// Value attributed to the edge from a source of `source_value` to a
/// candidate of `candidate_value`, out of `total`
pub fn edge_value(source_value: u64, candidate_value: u64, total: u64) -> u64 {
    if total == 0 {
        return 0;
    }
    ((source_value as u128 * candidate_value as u128) / total as u128) as u64
}

/// Fraction of the source carried by an edge to `candidate_value`
pub fn edge_share(candidate_value: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (candidate_value as f64 / total as f64).min(1.0)
}

/// Keep the `max_fanout` highest-value candidates (index breaks ties)
///
/// Both halves come back in ascending index order.
pub fn select_fanout(candidates: &[Candidate], max_fanout: usize) -> FanoutSelection {
    let mut ranked = candidates.to_vec();
    ranked.sort_by(|a, b| b.value.cmp(&a.value).then(a.index.cmp(&b.index)));

    let split = max_fanout.min(ranked.len());
    let mut truncated = ranked.split_off(split);
    let mut followed = ranked;
    followed.sort_by_key(|c| c.index);
    truncated.sort_by_key(|c| c.index);

    FanoutSelection {
        followed,
        truncated,
    }
}
