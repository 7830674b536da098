//! Gateway client and connection keeper.
//!
//! Holds the single live WebSocket connection to the network gateway. The
//! keeper task reconnects on drop after a fixed delay, forever; request
//! handlers share the client handle and fail fast while disconnected.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, U256};
use futures_util::StreamExt;
use tokio::sync::{RwLock, watch};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::ChainConfig;

/// Fixed drip per claim: 0.05 native units, in wei.
pub const DRIP_AMOUNT_WEI: u64 = 50_000_000_000_000_000;

type GatewayClient = SignerMiddleware<Provider<Ws>, LocalWallet>;

pub struct ChainClient {
    gateway_url: String,
    reconnect_delay: Duration,
    wallet: LocalWallet,
    chain_id: u64,
    live: AtomicBool,
    client: RwLock<Option<Arc<GatewayClient>>>,
}

impl ChainClient {
    pub fn new(config: &ChainConfig) -> Result<Self> {
        let key = config
            .private_key
            .as_deref()
            .context("Faucet private key is not configured")?;
        let chain_id = config.network.chain_id();
        assert!(chain_id > 0, "Chain ID must be positive");
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .context("Invalid faucet private key")?
            .with_chain_id(chain_id);

        Ok(Self {
            gateway_url: config.gateway_url().to_string(),
            reconnect_delay: config.reconnect_delay(),
            wallet,
            chain_id,
            live: AtomicBool::new(false),
            client: RwLock::new(None),
        })
    }

    pub fn is_live(&self) -> bool {
        self.live.load(AtomicOrdering::SeqCst)
    }

    pub fn faucet_address(&self) -> Address {
        self.wallet.address()
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn current(&self) -> Result<Arc<GatewayClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| anyhow!("Gateway connection is not live"))
    }

    pub async fn transaction_count(&self, address: Address) -> Result<U256> {
        let client = self.current().await?;
        client
            .get_transaction_count(address, None)
            .await
            .context("RPC call eth_getTransactionCount failed")
    }

    pub async fn balance(&self, address: Address) -> Result<U256> {
        let client = self.current().await?;
        client
            .get_balance(address, None)
            .await
            .context("RPC call eth_getBalance failed")
    }

    /// Signs and broadcasts the fixed drip to `recipient`, returning the
    /// transaction hash without waiting for a receipt.
    pub async fn send_drip(&self, recipient: Address) -> Result<String> {
        let client = self.current().await?;
        let tx = TransactionRequest::pay(recipient, U256::from(DRIP_AMOUNT_WEI));
        let pending = client
            .send_transaction(tx, None)
            .await
            .context("Failed to broadcast drip transaction")?;
        let tx_hash = *pending;
        Ok(format!("{tx_hash:#x}"))
    }

    /// Connection keeper loop. Connects, marks the client live, blocks until
    /// the socket drops, then retries after the fixed delay. No backoff
    /// growth, no retry cap.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("Starting gateway connection keeper for {}", self.gateway_url);
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect().await {
                Ok(provider) => {
                    info!(chain_id = self.chain_id, "Gateway connection established");
                    tokio::select! {
                        _ = self.watch_connection(provider) => {
                            self.mark_offline().await;
                            warn!("Gateway connection lost");
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                self.mark_offline().await;
                                break;
                            }
                        }
                    }
                }
                Err(err) => warn!("Gateway connection attempt failed: {err:#}"),
            }

            tokio::select! {
                _ = sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Gateway connection keeper stopped");
        Ok(())
    }

    async fn connect(&self) -> Result<Provider<Ws>> {
        let provider = Provider::<Ws>::connect(self.gateway_url.as_str())
            .await
            .with_context(|| format!("Failed to connect to gateway {}", self.gateway_url))?;
        let client = Arc::new(SignerMiddleware::new(provider.clone(), self.wallet.clone()));
        *self.client.write().await = Some(client);
        self.live.store(true, AtomicOrdering::SeqCst);
        Ok(provider)
    }

    /// Resolves once the underlying socket is gone.
    async fn watch_connection(&self, provider: Provider<Ws>) {
        match provider.subscribe_blocks().await {
            Ok(mut blocks) => while blocks.next().await.is_some() {},
            Err(err) => warn!("Block subscription failed: {err:#}"),
        }
    }

    async fn mark_offline(&self) {
        self.live.store(false, AtomicOrdering::SeqCst);
        *self.client.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Network;

    fn test_config() -> ChainConfig {
        ChainConfig {
            network: Network::Testnet,
            gateway_url: None,
            private_key: Some(
                "0x0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
            ),
            reconnect_delay_ms: Some(500),
        }
    }

    #[test]
    fn drip_amount_bounds() {
        assert!(DRIP_AMOUNT_WEI > 0);
        // Below one whole native unit
        assert!(u128::from(DRIP_AMOUNT_WEI) < 1_000_000_000_000_000_000u128);
    }

    #[test]
    fn wallet_derivation() {
        let client = ChainClient::new(&test_config()).expect("client builds");
        assert!(!client.is_live());
        assert_eq!(client.chain_id(), Network::Testnet.chain_id());
        // Well-known address for private key 0x...01
        assert_eq!(
            format!("{:#x}", client.faucet_address()),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn rejects_malformed_private_key() {
        let mut config = test_config();
        config.private_key = Some("not-a-key".to_string());
        assert!(ChainClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn mark_offline_clears_liveness() {
        let client = ChainClient::new(&test_config()).expect("client builds");

        client.live.store(true, AtomicOrdering::SeqCst);
        assert!(client.is_live());

        client.mark_offline().await;
        assert!(!client.is_live());
        assert!(client.client.read().await.is_none());
        assert!(client.transaction_count(Address::zero()).await.is_err());
    }

    #[tokio::test]
    async fn calls_fail_while_disconnected() {
        let client = ChainClient::new(&test_config()).expect("client builds");
        let err = client
            .transaction_count(Address::zero())
            .await
            .expect_err("offline client must fail");
        assert!(err.to_string().contains("not live"));

        let err = client
            .send_drip(Address::zero())
            .await
            .expect_err("offline drip must fail");
        assert!(err.to_string().contains("not live"));
    }
}
