//! Transaction Graph Builder
//!
//! Fetches ledger records through a [`ChainGateway`], memoizes them with
//! single-flight caches and materializes UTXOs and spend relationships on
//! demand. Every gateway call goes through the retry policy and a shared
//! concurrency limit.
//!
//! The builder is meant to be constructed once and shared (`Arc`) by any
//! number of trace sessions. It holds nothing but immutable cached records;
//! per-trace state such as the spend registry lives in the session.

use crate::config::GatewayConfig;
use crate::errors::{GatewayError, GatewayResult, IntegrityViolation, TraceError, TraceResult};
use crate::gateway::{with_retry, ChainGateway, RetryPolicy};
use crate::graph::cache::{CacheStats, SingleFlightCache};
use crate::types::{SpendStatus, TxRecord, Utxo};
use bitcoin::{OutPoint, Txid};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

pub type TransactionCache = SingleFlightCache<Txid, Arc<TxRecord>>;
pub type SpendCache = SingleFlightCache<OutPoint, SpendStatus>;

/// Fetches, validates and caches ledger data for the tracer
pub struct TxGraphBuilder<G> {
    gateway: Arc<G>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    /// Records exactly as the gateway returned them
    raw: TransactionCache,
    /// Records with every input's prevout value and owner filled in
    resolved: TransactionCache,
    spends: SpendCache,
}

impl<G: ChainGateway> TxGraphBuilder<G> {
    pub fn new(gateway: G, config: &GatewayConfig) -> Self {
        Self::with_policy(
            Arc::new(gateway),
            RetryPolicy::from_config(config),
            config.concurrent_requests,
        )
    }

    pub fn with_policy(gateway: Arc<G>, retry: RetryPolicy, concurrent_requests: usize) -> Self {
        Self {
            gateway,
            retry,
            permits: Arc::new(Semaphore::new(concurrent_requests.max(1))),
            raw: TransactionCache::new(),
            resolved: TransactionCache::new(),
            spends: SpendCache::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Hit/miss counters of the raw transaction cache
    pub fn cache_stats(&self) -> CacheStats {
        self.raw.get_stats()
    }

    pub fn cached_transactions(&self) -> usize {
        self.raw.size()
    }

    async fn call<T, F, Fut>(&self, operation: &str, call: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let _permit = self.permits.acquire().await.map_err(|_| {
            GatewayError::ConnectionFailed("gateway request permits closed".to_string())
        })?;
        with_retry(&self.retry, operation, call).await
    }

    /// Fetch a transaction record, sharing concurrent fetches of the same txid
    pub async fn fetch_transaction(&self, txid: &Txid) -> TraceResult<Arc<TxRecord>> {
        self.raw
            .get_or_fetch(txid, || async {
                let operation = format!("get_transaction({})", txid);
                let tx = self
                    .call(&operation, || self.gateway.get_transaction(txid))
                    .await?;

                if tx.txid != *txid {
                    return Err(TraceError::Unresolved(format!(
                        "{} gateway returned {} for {}",
                        self.gateway.backend(),
                        tx.txid,
                        txid
                    )));
                }
                if tx.spent_outpoints().any(|outpoint| outpoint.txid == tx.txid) {
                    warn!("Transaction {} spends its own output", txid);
                    return Err(IntegrityViolation::SelfReference { txid: *txid }.into());
                }
                Ok::<_, TraceError>(Arc::new(tx))
            })
            .await
    }

    /// Fetch a transaction with all input values and owners resolved
    ///
    /// Inputs the gateway left bare are hydrated from their funding
    /// transactions. A non-coinbase transaction creating more value than it
    /// consumes is rejected.
    pub async fn fetch_resolved(&self, txid: &Txid) -> TraceResult<Arc<TxRecord>> {
        self.resolved
            .get_or_fetch(txid, || async {
                let raw = self.fetch_transaction(txid).await?;
                let tx = if raw.inputs_resolved() {
                    raw
                } else {
                    Arc::new(self.hydrate_inputs(&raw).await?)
                };
                check_balance(&tx)?;
                Ok::<_, TraceError>(tx)
            })
            .await
    }

    async fn hydrate_inputs(&self, raw: &TxRecord) -> TraceResult<TxRecord> {
        let funding_txids: BTreeSet<Txid> = raw
            .inputs
            .iter()
            .filter(|input| !input.is_resolved())
            .map(|input| input.previous_output.txid)
            .collect();
        debug!(
            "Hydrating {} from {} funding transactions",
            raw.txid,
            funding_txids.len()
        );

        let funding: HashMap<Txid, Arc<TxRecord>> =
            try_join_all(funding_txids.iter().map(|txid| async move {
                self.fetch_transaction(txid).await.map(|tx| (*txid, tx))
            }))
            .await?
            .into_iter()
            .collect();

        let mut tx = raw.clone();
        for input in tx.inputs.iter_mut().filter(|input| !input.is_resolved()) {
            let outpoint = input.previous_output;
            let output = funding
                .get(&outpoint.txid)
                .and_then(|funder| funder.output(outpoint.vout))
                .ok_or(IntegrityViolation::OutputMissing { outpoint })?;
            input.value = Some(output.value);
            input.address = output.address.clone();
            input.script_pubkey = Some(output.script_pubkey.clone());
        }
        Ok(tx)
    }

    /// Resolve an outpoint to its value, owner and spend status
    pub async fn resolve_outpoint(&self, outpoint: &OutPoint) -> TraceResult<Utxo> {
        let creator = self.fetch_transaction(&outpoint.txid).await?;
        let output = creator
            .output(outpoint.vout)
            .ok_or(IntegrityViolation::OutputMissing {
                outpoint: *outpoint,
            })?;

        let spend = self
            .spends
            .get_or_fetch(outpoint, || async {
                let operation = format!("get_spending_transaction({})", outpoint);
                self.call(&operation, || self.gateway.get_spending_transaction(outpoint))
                    .await
                    .map_err(TraceError::from)
            })
            .await?;

        if let SpendStatus::Spent { txid } = spend {
            if txid == outpoint.txid {
                return Err(IntegrityViolation::SelfReference { txid }.into());
            }
        }

        Ok(Utxo {
            outpoint: *outpoint,
            value: output.value,
            owner: output.owner(),
            spend,
        })
    }

    /// Resolve an outpoint and, when spent, fetch the (resolved) spending transaction
    ///
    /// The spender must actually consume the outpoint; a gateway pointing
    /// elsewhere is reported as `SpenderMismatch`.
    pub async fn fetch_spender(
        &self,
        outpoint: &OutPoint,
    ) -> TraceResult<(Utxo, Option<Arc<TxRecord>>)> {
        let utxo = self.resolve_outpoint(outpoint).await?;
        let Some(spender) = utxo.spending_txid() else {
            return Ok((utxo, None));
        };

        let tx = self.fetch_resolved(&spender).await?;
        if tx.spends(outpoint).is_none() {
            warn!("{} reported as spending {} but has no such input", spender, outpoint);
            return Err(IntegrityViolation::SpenderMismatch {
                outpoint: *outpoint,
                claimed: spender,
            }
            .into());
        }
        Ok((utxo, Some(tx)))
    }

    /// Txids touching `address`, oldest first
    pub async fn address_history(&self, address: &str) -> TraceResult<Vec<Txid>> {
        let operation = format!("get_address_history({})", address);
        self.call(&operation, || self.gateway.get_address_history(address))
            .await
            .map_err(TraceError::from)
    }
}

fn check_balance(tx: &TxRecord) -> Result<(), IntegrityViolation> {
    if tx.is_coinbase() {
        return Ok(());
    }
    let outputs = tx.total_output_value();
    match tx.total_input_value() {
        Some(inputs) if inputs < outputs => Err(IntegrityViolation::ValueImbalance {
            txid: tx.txid,
            inputs,
            outputs,
        }),
        _ => Ok(()),
    }
}
