//! In-memory ledger snapshot gateway
//!
//! Serves a frozen set of transactions, with spender and address indexes
//! derived at construction. Latency, transient failures and spender
//! overrides can be injected to exercise retry, budget and integrity paths.

use crate::errors::{AppError, AppResult, GatewayError, GatewayResult};
use crate::gateway::ChainGateway;
use crate::types::{SpendStatus, TxRecord};
use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// On-disk snapshot format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub transactions: Vec<TxRecord>,
}

#[derive(Default)]
struct Faults {
    latency: Option<Duration>,
    transient: HashMap<Txid, usize>,
    spender_overrides: HashMap<OutPoint, SpendStatus>,
}

/// Gateway backed by an in-memory ledger snapshot
#[derive(Clone)]
pub struct MemoryGateway {
    transactions: Arc<BTreeMap<Txid, TxRecord>>,
    spenders: Arc<HashMap<OutPoint, Txid>>,
    address_history: Arc<HashMap<String, Vec<Txid>>>,
    faults: Arc<Mutex<Faults>>,
    calls: Arc<AtomicU64>,
}

impl MemoryGateway {
    pub fn new(transactions: impl IntoIterator<Item = TxRecord>) -> Self {
        let transactions: BTreeMap<Txid, TxRecord> =
            transactions.into_iter().map(|tx| (tx.txid, tx)).collect();

        let mut spenders = HashMap::new();
        let mut touched: HashMap<String, BTreeSet<(u32, u32, Txid)>> = HashMap::new();
        for tx in transactions.values() {
            for outpoint in tx.spent_outpoints() {
                // First spender wins; conflicting spends are exposed via the records themselves
                spenders.entry(*outpoint).or_insert(tx.txid);
            }
            let order = (
                tx.height().unwrap_or(u32::MAX),
                tx.block.and_then(|b| b.position).unwrap_or(u32::MAX),
                tx.txid,
            );
            let owners = tx
                .outputs
                .iter()
                .filter_map(|o| o.address.clone())
                .chain(tx.inputs.iter().filter_map(|i| i.address.clone()));
            for address in owners {
                touched.entry(address).or_default().insert(order);
            }
        }

        let address_history = touched
            .into_iter()
            .map(|(address, txs)| (address, txs.into_iter().map(|(_, _, txid)| txid).collect()))
            .collect();

        Self {
            transactions: Arc::new(transactions),
            spenders: Arc::new(spenders),
            address_history: Arc::new(address_history),
            faults: Arc::new(Mutex::new(Faults::default())),
            calls: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load a JSON ledger snapshot from disk
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: LedgerSnapshot = serde_json::from_str(&content).map_err(|e| {
            AppError::InvalidData(format!(
                "Failed to parse ledger snapshot {}: {}",
                path.display(),
                e
            ))
        })?;
        info!(
            "Loaded ledger snapshot {} with {} transactions",
            path.display(),
            snapshot.transactions.len()
        );
        Ok(Self::new(snapshot.transactions))
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Total gateway calls served (including injected failures)
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Delay every call by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.lock_faults().latency = Some(latency);
        self
    }

    /// Fail the next `count` fetches of `txid` with a transient error
    pub fn fail_transiently(&self, txid: Txid, count: usize) {
        self.lock_faults().transient.insert(txid, count);
    }

    /// Report `status` for `outpoint` regardless of the snapshot contents
    pub fn override_spender(&self, outpoint: OutPoint, status: SpendStatus) {
        self.lock_faults().spender_overrides.insert(outpoint, status);
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn simulate_latency(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let latency = self.lock_faults().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn take_transient_failure(&self, txid: &Txid) -> bool {
        let mut faults = self.lock_faults();
        match faults.transient.get_mut(txid) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

impl ChainGateway for MemoryGateway {
    fn backend(&self) -> &'static str {
        "snapshot"
    }

    async fn get_transaction(&self, txid: &Txid) -> GatewayResult<TxRecord> {
        self.simulate_latency().await;
        if self.take_transient_failure(txid) {
            debug!("Injected transient failure for {}", txid);
            return Err(GatewayError::Transient {
                operation: format!("get_transaction({})", txid),
                message: "injected failure".to_string(),
            });
        }
        self.transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("transaction {}", txid),
            })
    }

    async fn get_address_history(&self, address: &str) -> GatewayResult<Vec<Txid>> {
        self.simulate_latency().await;
        Ok(self
            .address_history
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_spending_transaction(&self, outpoint: &OutPoint) -> GatewayResult<SpendStatus> {
        self.simulate_latency().await;
        if let Some(status) = self.lock_faults().spender_overrides.get(outpoint) {
            return Ok(*status);
        }
        let creator = self
            .transactions
            .get(&outpoint.txid)
            .ok_or_else(|| GatewayError::NotFound {
                what: format!("transaction {}", outpoint.txid),
            })?;
        if creator.output(outpoint.vout).is_none() {
            return Err(GatewayError::NotFound {
                what: format!("output {}", outpoint),
            });
        }
        Ok(match self.spenders.get(outpoint) {
            Some(txid) => SpendStatus::Spent { txid: *txid },
            None => SpendStatus::Unspent,
        })
    }
}
