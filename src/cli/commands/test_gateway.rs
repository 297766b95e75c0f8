use super::GatewayArgs;
use crate::errors::{AppError, AppResult};
use crate::gateway::{self, ChainGateway};
use crate::graph::TxGraphBuilder;
use crate::utils::currency::format_sats_as_btc;
use bitcoin::Txid;
use clap::Args;
use std::str::FromStr;
use tracing::{error, info};

/// Test blockchain data gateway connectivity
#[derive(Args)]
pub struct TestGatewayCommand {
    /// Fetch this transaction through the gateway as a smoke test
    #[arg(long)]
    pub txid: Option<String>,

    #[command(flatten)]
    pub gateway: GatewayArgs,
}

impl TestGatewayCommand {
    pub async fn run(&self) -> AppResult<()> {
        info!("=== Testing Blockchain Gateway Connection ===");

        let config = self.gateway.load_config()?;
        info!("Testing {:?} gateway at: {}", config.gateway.backend, config.gateway.url);

        let client = match gateway::connect(&config.gateway).await {
            Ok(client) => client,
            Err(e) => {
                error!("Failed to create gateway client: {}", e);
                println!("Gateway connection test FAILED");
                println!("Error: {}", e);
                println!("\nTroubleshooting tips:");
                println!("1. Check that the backend (Bitcoin Core or Electrs/Esplora) is running");
                println!("2. Verify gateway.url and gateway.backend in config.toml");
                println!("3. For Bitcoin Core, ensure txindex=1 and valid RPC credentials");
                return Err(e);
            }
        };
        println!("Connected to {} gateway", client.backend());

        if let Some(txid) = &self.txid {
            let txid = Txid::from_str(txid.trim())
                .map_err(|e| AppError::InvalidData(format!("Invalid txid '{}': {}", txid, e)))?;
            let builder = TxGraphBuilder::new(client, &config.gateway);
            let tx = builder.fetch_resolved(&txid).await?;

            println!("Fetched {}", tx.txid);
            println!("  Inputs: {}", tx.inputs.len());
            println!("  Outputs: {}", tx.outputs.len());
            println!("  Output value: {}", format_sats_as_btc(tx.total_output_value()));
            match tx.fee() {
                Some(fee) => println!("  Fee: {}", format_sats_as_btc(fee)),
                None => println!("  Fee: n/a"),
            }
            match tx.height() {
                Some(height) => println!("  Confirmed at height {}", height),
                None => println!("  Unconfirmed"),
            }
        }

        println!("Gateway connection test PASSED");
        Ok(())
    }
}
