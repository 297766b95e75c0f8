//! Electrs/Esplora REST adapter
//!
//! Esplora reports prevouts, fees, confirmation status and spenders directly,
//! so it is the backend that supports every capability the tracer needs.

use crate::config::GatewayConfig;
use crate::errors::{AppError, AppResult, GatewayError, GatewayResult};
use crate::gateway::ChainGateway;
use crate::types::{BlockPosition, SpendStatus, TxInput, TxOutput, TxRecord};
use bitcoin::{OutPoint, Txid};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Esplora returns at most this many confirmed transactions per history page
const CHAIN_PAGE_SIZE: usize = 25;

#[derive(Debug, Deserialize)]
struct EsploraTx {
    txid: String,
    vin: Vec<EsploraVin>,
    vout: Vec<EsploraVout>,
    #[serde(default)]
    fee: Option<u64>,
    status: EsploraStatus,
}

#[derive(Debug, Deserialize)]
struct EsploraVin {
    txid: String,
    vout: u32,
    #[serde(default)]
    prevout: Option<EsploraVout>,
    #[serde(default)]
    is_coinbase: bool,
}

#[derive(Debug, Deserialize)]
struct EsploraVout {
    scriptpubkey: String,
    #[serde(default)]
    scriptpubkey_address: Option<String>,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct EsploraStatus {
    confirmed: bool,
    #[serde(default)]
    block_height: Option<u32>,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    block_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EsploraOutspend {
    spent: bool,
    #[serde(default)]
    txid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EsploraHistoryEntry {
    txid: String,
    status: EsploraStatus,
}

/// Gateway over an Electrs/Esplora HTTP API
#[derive(Clone)]
pub struct EsploraGateway {
    http: reqwest::Client,
    base_url: String,
    max_history_pages: usize,
    /// Block hash -> ordered txids, for in-block positions
    block_txids: Arc<Mutex<HashMap<String, Arc<Vec<String>>>>>,
}

impl EsploraGateway {
    pub fn new(config: &GatewayConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AppError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            max_history_pages: config.max_history_pages.max(1),
            block_txids: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str, what: &str) -> GatewayResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.http.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    timeout_ms: 0,
                    operation: format!("GET {}", path),
                }
            } else {
                GatewayError::Transient {
                    operation: format!("GET {}", path),
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::BAD_REQUEST {
            return Err(GatewayError::NotFound {
                what: what.to_string(),
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::Transient {
                operation: format!("GET {}", path),
                message: format!("HTTP {}", status),
            });
        }
        if !status.is_success() {
            return Err(GatewayError::InvalidResponse(format!(
                "GET {} returned HTTP {}",
                path, status
            )));
        }

        response.json::<T>().await.map_err(|e| {
            GatewayError::InvalidResponse(format!("Failed to decode {}: {}", path, e))
        })
    }

    async fn block_position(&self, block_hash: &str, txid: &str) -> GatewayResult<Option<u32>> {
        let cached = self
            .block_txids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(block_hash)
            .cloned();

        let txids = match cached {
            Some(txids) => txids,
            None => {
                let fetched: Vec<String> = self
                    .get_json(
                        &format!("/block/{}/txids", block_hash),
                        &format!("block {}", block_hash),
                    )
                    .await?;
                let fetched = Arc::new(fetched);
                self.block_txids
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(block_hash.to_string(), Arc::clone(&fetched));
                fetched
            }
        };

        Ok(txids.iter().position(|t| t == txid).map(|p| p as u32))
    }

    fn convert(&self, raw: EsploraTx, position: Option<u32>) -> GatewayResult<TxRecord> {
        let txid = parse_txid(&raw.txid)?;
        let coinbase = raw.vin.first().map(|v| v.is_coinbase).unwrap_or(false);

        let inputs = raw
            .vin
            .into_iter()
            .map(|vin| {
                let previous_output = if vin.is_coinbase {
                    OutPoint::null()
                } else {
                    OutPoint::new(parse_txid(&vin.txid)?, vin.vout)
                };
                Ok(TxInput {
                    previous_output,
                    value: vin.prevout.as_ref().map(|p| p.value),
                    address: vin
                        .prevout
                        .as_ref()
                        .and_then(|p| p.scriptpubkey_address.clone()),
                    script_pubkey: vin.prevout.map(|p| p.scriptpubkey),
                    coinbase: vin.is_coinbase,
                })
            })
            .collect::<GatewayResult<Vec<_>>>()?;

        let outputs = raw
            .vout
            .into_iter()
            .enumerate()
            .map(|(index, vout)| TxOutput {
                index: index as u32,
                value: vout.value,
                address: vout.scriptpubkey_address,
                script_pubkey: vout.scriptpubkey,
            })
            .collect();

        let block = match (raw.status.confirmed, raw.status.block_height) {
            (true, Some(height)) => Some(BlockPosition {
                height,
                position,
                time: raw.status.block_time,
            }),
            _ => None,
        };

        Ok(TxRecord {
            txid,
            inputs,
            outputs,
            block,
            fee: if coinbase { Some(0) } else { raw.fee },
        })
    }
}

fn parse_txid(raw: &str) -> GatewayResult<Txid> {
    Txid::from_str(raw).map_err(|e| GatewayError::InvalidResponse(format!("bad txid {}: {}", raw, e)))
}

impl ChainGateway for EsploraGateway {
    fn backend(&self) -> &'static str {
        "esplora"
    }

    async fn get_transaction(&self, txid: &Txid) -> GatewayResult<TxRecord> {
        let raw: EsploraTx = self
            .get_json(&format!("/tx/{}", txid), &format!("transaction {}", txid))
            .await?;

        let position = match (&raw.status.block_hash, raw.status.confirmed) {
            (Some(hash), true) => self.block_position(hash, &raw.txid).await?,
            _ => None,
        };
        self.convert(raw, position)
    }

    async fn get_address_history(&self, address: &str) -> GatewayResult<Vec<Txid>> {
        let what = format!("address {}", address);
        // First page includes mempool entries followed by the newest confirmed ones
        let mut entries: Vec<EsploraHistoryEntry> = self
            .get_json(&format!("/address/{}/txs", address), &what)
            .await?;
        let mut confirmed_in_page = entries.iter().filter(|e| e.status.confirmed).count();
        let mut pages = 1;

        while confirmed_in_page >= CHAIN_PAGE_SIZE && pages < self.max_history_pages {
            let Some(last) = entries.last() else { break };
            let page: Vec<EsploraHistoryEntry> = self
                .get_json(
                    &format!("/address/{}/txs/chain/{}", address, last.txid),
                    &what,
                )
                .await?;
            confirmed_in_page = page.len();
            pages += 1;
            entries.extend(page);
        }

        // Esplora lists newest first
        let mut txids = entries
            .iter()
            .map(|e| parse_txid(&e.txid))
            .collect::<GatewayResult<Vec<_>>>()?;
        txids.reverse();
        Ok(txids)
    }

    async fn get_spending_transaction(&self, outpoint: &OutPoint) -> GatewayResult<SpendStatus> {
        let outspend: EsploraOutspend = self
            .get_json(
                &format!("/tx/{}/outspend/{}", outpoint.txid, outpoint.vout),
                &format!("output {}", outpoint),
            )
            .await?;

        match (outspend.spent, outspend.txid) {
            (false, _) => Ok(SpendStatus::Unspent),
            (true, Some(txid)) => Ok(SpendStatus::Spent {
                txid: parse_txid(&txid)?,
            }),
            (true, None) => Err(GatewayError::InvalidResponse(format!(
                "outspend for {} is spent without a spender",
                outpoint
            ))),
        }
    }
}
