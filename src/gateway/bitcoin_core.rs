//! Bitcoin Core JSON-RPC adapter
//!
//! Uses the blocking `corepc-client` on tokio's blocking pool. Core keeps no
//! address or spender index, so address history is unsupported and spenders
//! can only be reported as "unspent" (output still in the UTXO set).

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult, GatewayError, GatewayResult};
use crate::gateway::ChainGateway;
use crate::types::{BlockPosition, SpendStatus, TxInput, TxOutput, TxRecord};
use bitcoin::{Amount, OutPoint, Txid};
use corepc_client::client_sync::{v28::Client, Auth};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct RawTransaction {
    txid: String,
    vin: Vec<RawVin>,
    vout: Vec<RawVout>,
    #[serde(default)]
    blockhash: Option<String>,
    #[serde(default)]
    blocktime: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u32>,
    #[serde(default)]
    coinbase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVout {
    value: f64,
    n: u32,
    #[serde(rename = "scriptPubKey")]
    script_pubkey: RawScriptPubKey,
}

#[derive(Debug, Deserialize)]
struct RawScriptPubKey {
    hex: String,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    height: u32,
    tx: Vec<String>,
}

/// Block hash -> (height, ordered txids)
type BlockIndex = HashMap<String, Arc<(u32, Vec<String>)>>;

/// Gateway over a Bitcoin Core node's JSON-RPC interface
#[derive(Clone)]
pub struct BitcoinCoreGateway {
    client: Arc<Client>,
    blocks: Arc<Mutex<BlockIndex>>,
}

impl BitcoinCoreGateway {
    pub fn new(config: &GatewayConfig) -> AppResult<Self> {
        let auth = Auth::UserPass(config.username.clone(), config.password.clone());
        let client = Client::new_with_auth(&config.url, auth).map_err(|e| {
            AppError::Config(format!("Failed to create Bitcoin RPC client: {}", e))
        })?;

        Ok(Self {
            client: Arc::new(client),
            blocks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Verify the node answers `getblockchaininfo`
    pub async fn test_connection(&self) -> GatewayResult<()> {
        let client = Arc::clone(&self.client);
        let info = tokio::task::spawn_blocking(move || client.get_blockchain_info())
            .await
            .map_err(|e| GatewayError::ConnectionFailed(format!("Connection test task failed: {}", e)))?
            .map_err(|e| {
                GatewayError::ConnectionFailed(format!(
                    "Failed to connect to Bitcoin RPC - check URL, credentials, and that Bitcoin Core is running: {}",
                    e
                ))
            })?;
        info!(
            "Bitcoin Core connection established - chain: {}, blocks: {}",
            info.chain, info.blocks
        );
        Ok(())
    }

    async fn call<T>(&self, method: &'static str, args: Vec<Value>, what: String) -> GatewayResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let client = Arc::clone(&self.client);
        tokio::task::spawn_blocking(move || client.call::<T>(method, &args))
            .await
            .map_err(|e| GatewayError::Transient {
                operation: method.to_string(),
                message: format!("Task execution error: {}", e),
            })?
            .map_err(|e| classify_rpc_error(method, &what, e.to_string()))
    }

    async fn block(&self, hash: &str) -> GatewayResult<Arc<(u32, Vec<String>)>> {
        let cached = self
            .blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(hash)
            .cloned();
        if let Some(block) = cached {
            return Ok(block);
        }

        let raw: RawBlock = self
            .call("getblock", vec![json!(hash), json!(1)], format!("block {}", hash))
            .await?;
        let block = Arc::new((raw.height, raw.tx));
        self.blocks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(hash.to_string(), Arc::clone(&block));
        Ok(block)
    }
}

/// Map node errors onto the gateway taxonomy
fn classify_rpc_error(method: &str, what: &str, message: String) -> GatewayError {
    if message.contains("No such mempool or blockchain transaction")
        || message.contains("Invalid or non-wallet transaction id")
        || message.contains("Block not found")
    {
        debug!("{} not found (non-retryable): {}", what, message);
        return GatewayError::NotFound {
            what: what.to_string(),
        };
    }
    GatewayError::Transient {
        operation: method.to_string(),
        message,
    }
}

fn parse_txid(raw: &str) -> GatewayResult<Txid> {
    Txid::from_str(raw).map_err(|e| GatewayError::InvalidResponse(format!("bad txid {}: {}", raw, e)))
}

fn convert(raw: RawTransaction, block: Option<BlockPosition>) -> GatewayResult<TxRecord> {
    let txid = parse_txid(&raw.txid)?;
    let coinbase = raw.vin.first().map(|v| v.coinbase.is_some()).unwrap_or(false);

    let inputs = raw
        .vin
        .into_iter()
        .map(|vin| match (vin.coinbase, vin.txid, vin.vout) {
            (Some(_), _, _) => Ok(TxInput {
                previous_output: OutPoint::null(),
                value: None,
                address: None,
                script_pubkey: None,
                coinbase: true,
            }),
            (None, Some(prev), Some(vout)) => Ok(TxInput {
                previous_output: OutPoint::new(parse_txid(&prev)?, vout),
                value: None,
                address: None,
                script_pubkey: None,
                coinbase: false,
            }),
            _ => Err(GatewayError::InvalidResponse(format!(
                "input of {} has neither coinbase nor prevout",
                txid
            ))),
        })
        .collect::<GatewayResult<Vec<_>>>()?;

    let outputs = raw
        .vout
        .into_iter()
        .map(|vout| {
            let value = Amount::from_btc(vout.value).map_err(|e| {
                GatewayError::InvalidResponse(format!("bad amount in {}:{}: {}", txid, vout.n, e))
            })?;
            Ok(TxOutput {
                index: vout.n,
                value: value.to_sat(),
                address: vout.script_pubkey.address,
                script_pubkey: vout.script_pubkey.hex,
            })
        })
        .collect::<GatewayResult<Vec<_>>>()?;

    Ok(TxRecord {
        txid,
        inputs,
        outputs,
        block,
        fee: if coinbase { Some(0) } else { None },
    })
}

impl ChainGateway for BitcoinCoreGateway {
    fn backend(&self) -> &'static str {
        "bitcoin_core"
    }

    async fn get_transaction(&self, txid: &Txid) -> GatewayResult<TxRecord> {
        let raw: RawTransaction = self
            .call(
                "getrawtransaction",
                vec![json!(txid.to_string()), json!(true)],
                format!("transaction {}", txid),
            )
            .await?;

        let block = match raw.blockhash.as_deref() {
            Some(hash) => {
                let block = self.block(hash).await?;
                Some(BlockPosition {
                    height: block.0,
                    position: block.1.iter().position(|t| *t == raw.txid).map(|p| p as u32),
                    time: raw.blocktime,
                })
            }
            None => None,
        };

        convert(raw, block)
    }

    async fn get_address_history(&self, _address: &str) -> GatewayResult<Vec<Txid>> {
        Err(GatewayError::Unsupported {
            backend: "bitcoin_core",
            capability: "address history",
        })
    }

    async fn get_spending_transaction(&self, outpoint: &OutPoint) -> GatewayResult<SpendStatus> {
        let txout: Option<Value> = self
            .call(
                "gettxout",
                vec![
                    json!(outpoint.txid.to_string()),
                    json!(outpoint.vout),
                    json!(true),
                ],
                format!("output {}", outpoint),
            )
            .await?;

        match txout {
            Some(_) => Ok(SpendStatus::Unspent),
            None => Err(GatewayError::Unsupported {
                backend: "bitcoin_core",
                capability: "spender lookup for spent outputs",
            }),
        }
    }
}
