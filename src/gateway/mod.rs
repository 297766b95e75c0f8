//! Blockchain data gateway integration module
//!
//! This module provides the narrow read-only interface the engine consumes:
//! - **ChainGateway** - capability trait (transaction, address history, spender)
//! - **BitcoinCoreGateway** - Bitcoin Core JSON-RPC adapter (`corepc-client`)
//! - **EsploraGateway** - Electrs/Esplora REST adapter (`reqwest`)
//! - **MemoryGateway** - frozen ledger snapshot held in memory
//! - **Retry** - exponential backoff and per-call timeout wrappers
//!
//! Adapters are selected from configuration through [`GatewayClient`].

pub mod bitcoin_core;
pub mod esplora;
pub mod memory;
pub mod retry;

use crate::config::{GatewayBackend, GatewayConfig};
use crate::errors::{AppError, AppResult, GatewayResult};
use crate::types::{SpendStatus, TxRecord};
use bitcoin::{OutPoint, Txid};
use std::future::Future;
use tracing::info;

// Re-export main types
pub use bitcoin_core::BitcoinCoreGateway;
pub use esplora::EsploraGateway;
pub use memory::{LedgerSnapshot, MemoryGateway};
pub use retry::{calculate_next_backoff, with_retry, RetryPolicy};

/// Read-only, idempotent access to ledger data
///
/// Calls may fail transiently; callers own retry and timeout policy.
pub trait ChainGateway: Send + Sync + 'static {
    /// Short backend name for logs and error messages
    fn backend(&self) -> &'static str;

    fn get_transaction(
        &self,
        txid: &Txid,
    ) -> impl Future<Output = GatewayResult<TxRecord>> + Send;

    /// Txids touching `address`, oldest first
    fn get_address_history(
        &self,
        address: &str,
    ) -> impl Future<Output = GatewayResult<Vec<Txid>>> + Send;

    fn get_spending_transaction(
        &self,
        outpoint: &OutPoint,
    ) -> impl Future<Output = GatewayResult<SpendStatus>> + Send;
}

/// Gateway adapter chosen by `gateway.backend`
pub enum GatewayClient {
    BitcoinCore(BitcoinCoreGateway),
    Esplora(EsploraGateway),
    Snapshot(MemoryGateway),
}

impl ChainGateway for GatewayClient {
    fn backend(&self) -> &'static str {
        match self {
            GatewayClient::BitcoinCore(g) => g.backend(),
            GatewayClient::Esplora(g) => g.backend(),
            GatewayClient::Snapshot(g) => g.backend(),
        }
    }

    async fn get_transaction(&self, txid: &Txid) -> GatewayResult<TxRecord> {
        match self {
            GatewayClient::BitcoinCore(g) => g.get_transaction(txid).await,
            GatewayClient::Esplora(g) => g.get_transaction(txid).await,
            GatewayClient::Snapshot(g) => g.get_transaction(txid).await,
        }
    }

    async fn get_address_history(&self, address: &str) -> GatewayResult<Vec<Txid>> {
        match self {
            GatewayClient::BitcoinCore(g) => g.get_address_history(address).await,
            GatewayClient::Esplora(g) => g.get_address_history(address).await,
            GatewayClient::Snapshot(g) => g.get_address_history(address).await,
        }
    }

    async fn get_spending_transaction(&self, outpoint: &OutPoint) -> GatewayResult<SpendStatus> {
        match self {
            GatewayClient::BitcoinCore(g) => g.get_spending_transaction(outpoint).await,
            GatewayClient::Esplora(g) => g.get_spending_transaction(outpoint).await,
            GatewayClient::Snapshot(g) => g.get_spending_transaction(outpoint).await,
        }
    }
}

/// Build the configured gateway adapter, verifying connectivity where the backend allows
pub async fn connect(config: &GatewayConfig) -> AppResult<GatewayClient> {
    let client = match config.backend {
        GatewayBackend::BitcoinCore => {
            let gateway = BitcoinCoreGateway::new(config)?;
            gateway.test_connection().await?;
            GatewayClient::BitcoinCore(gateway)
        }
        GatewayBackend::Esplora => GatewayClient::Esplora(EsploraGateway::new(config)?),
        GatewayBackend::Snapshot => {
            let path = config.snapshot_path.as_ref().ok_or_else(|| {
                AppError::Config("gateway.snapshot_path is required".to_string())
            })?;
            GatewayClient::Snapshot(MemoryGateway::load(path)?)
        }
    };

    info!("Using {} gateway", client.backend());
    Ok(client)
}
