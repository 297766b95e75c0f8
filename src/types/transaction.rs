//! Ledger records as supplied by the data gateway
//!
//! Records are immutable once fetched. Input prevout values and owners are
//! optional because some backends (Bitcoin Core without verbosity 2) only
//! report the referenced outpoint; the graph builder fills them in.

use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

/// Confirmation details for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockPosition {
    pub height: u32,
    /// Index of the transaction within its block, when known
    pub position: Option<u32>,
    /// Block timestamp (unix seconds), when known
    pub time: Option<i64>,
}

/// A transaction input referencing a prior output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxInput {
    pub previous_output: OutPoint,
    #[serde(default)]
    pub value: Option<u64>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub script_pubkey: Option<String>,
    #[serde(default)]
    pub coinbase: bool,
}

impl TxInput {
    pub fn is_resolved(&self) -> bool {
        self.coinbase || self.value.is_some()
    }

    /// Owner key of the funding output (address, or script when no address decodes)
    pub fn owner(&self) -> Option<String> {
        owner_key(self.address.as_deref(), self.script_pubkey.as_deref())
    }
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxOutput {
    pub index: u32,
    pub value: u64,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub script_pubkey: String,
}

impl TxOutput {
    pub fn owner(&self) -> String {
        owner_key(self.address.as_deref(), Some(&self.script_pubkey))
            .unwrap_or_else(|| "script:".to_string())
    }
}

/// Address when one is known, otherwise the hex script prefixed with `script:`
pub fn owner_key(address: Option<&str>, script_pubkey: Option<&str>) -> Option<String> {
    match (address, script_pubkey) {
        (Some(address), _) if !address.is_empty() => Some(address.to_string()),
        (_, Some(script)) => Some(format!("script:{}", script)),
        _ => None,
    }
}

/// A transaction record fetched from the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRecord {
    pub txid: Txid,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    #[serde(default)]
    pub block: Option<BlockPosition>,
    #[serde(default)]
    pub fee: Option<u64>,
}

impl TxRecord {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.first().map(|i| i.coinbase).unwrap_or(false)
    }

    pub fn height(&self) -> Option<u32> {
        self.block.map(|b| b.height)
    }

    /// All inputs carry their prevout value (coinbase inputs count as resolved)
    pub fn inputs_resolved(&self) -> bool {
        self.inputs.iter().all(TxInput::is_resolved)
    }

    /// Sum of input values; `None` while any non-coinbase input is unresolved
    pub fn total_input_value(&self) -> Option<u64> {
        if self.is_coinbase() {
            return Some(self.total_output_value());
        }
        self.inputs
            .iter()
            .map(|i| i.value)
            .try_fold(0u64, |acc, v| v.map(|v| acc.saturating_add(v)))
    }

    pub fn total_output_value(&self) -> u64 {
        self.outputs
            .iter()
            .fold(0u64, |acc, o| acc.saturating_add(o.value))
    }

    /// Fee reported by the gateway, or derived from resolved inputs
    pub fn fee(&self) -> Option<u64> {
        if self.is_coinbase() {
            return Some(0);
        }
        self.fee.or_else(|| {
            self.total_input_value()
                .map(|inputs| inputs.saturating_sub(self.total_output_value()))
        })
    }

    pub fn output(&self, vout: u32) -> Option<&TxOutput> {
        self.outputs.iter().find(|o| o.index == vout)
    }

    pub fn outpoint(&self, vout: u32) -> OutPoint {
        OutPoint::new(self.txid, vout)
    }

    /// Input index that consumes `outpoint`, if any
    pub fn spends(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs
            .iter()
            .position(|i| !i.coinbase && i.previous_output == *outpoint)
    }

    /// Outpoints consumed by this transaction (empty for coinbase)
    pub fn spent_outpoints(&self) -> impl Iterator<Item = &OutPoint> {
        self.inputs
            .iter()
            .filter(|i| !i.coinbase)
            .map(|i| &i.previous_output)
    }
}

/// Spend status of an output as reported by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpendStatus {
    Unspent,
    Spent { txid: Txid },
}

/// An output together with its spend status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub owner: String,
    pub spend: SpendStatus,
}

impl Utxo {
    pub fn is_spent(&self) -> bool {
        matches!(self.spend, SpendStatus::Spent { .. })
    }

    pub fn spending_txid(&self) -> Option<Txid> {
        match self.spend {
            SpendStatus::Spent { txid } => Some(txid),
            SpendStatus::Unspent => None,
        }
    }
}
