//! Per-session record of which transaction spent each UTXO

use crate::errors::IntegrityViolation;
use crate::types::TxRecord;
use bitcoin::{OutPoint, Txid};
use std::collections::HashMap;

/// Spend relationships observed while expanding one trace
///
/// A UTXO is spent by at most one transaction; a second, different spender
/// seen in the same trace is a `DoubleSpend`.
#[derive(Debug, Default)]
pub struct SpendRegistry {
    spent_by: HashMap<OutPoint, Txid>,
}

impl SpendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `tx` as the spender of each of its inputs, all-or-nothing
    pub fn register(&mut self, tx: &TxRecord) -> Result<(), IntegrityViolation> {
        for outpoint in tx.spent_outpoints() {
            if let Some(first) = self.spent_by.get(outpoint) {
                if *first != tx.txid {
                    return Err(IntegrityViolation::DoubleSpend {
                        outpoint: *outpoint,
                        first: *first,
                        second: tx.txid,
                    });
                }
            }
        }
        for outpoint in tx.spent_outpoints() {
            self.spent_by.insert(*outpoint, tx.txid);
        }
        Ok(())
    }

    pub fn spender_of(&self, outpoint: &OutPoint) -> Option<Txid> {
        self.spent_by.get(outpoint).copied()
    }

    pub fn len(&self) -> usize {
        self.spent_by.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spent_by.is_empty()
    }
}
