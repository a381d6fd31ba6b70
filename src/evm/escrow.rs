use std::time::{Duration, Instant};

use alloy::eips::eip2718::Encodable2718 as _;
use alloy::network::{EthereumWallet, TransactionBuilder as _};
use alloy::primitives::{Address, B256, U256};
use alloy::providers::{Provider as _, RootProvider};
use alloy::rpc::types::{Filter, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::{SolCall as _, SolEvent as _};
use alloy::transports::http::{Client, Http};
use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;

use super::contract::BtcSettlement;
use super::{EscrowState, EvmEscrow};
use crate::config::EvmConfig;
use crate::error::ChainError;

/// Gas limit generous enough for every settlement-contract operation.
const ESCROW_GAS_LIMIT: u64 = 300_000;

/// EVM adapter over a JSON-RPC endpoint and a local signing key.
pub struct EvmEscrowClient {
    provider: RootProvider<Http<Client>>,
    wallet: EthereumWallet,
    wallet_address: Address,
    contract: Address,
    chain_id: u64,
    poll_interval: Duration,
}

impl EvmEscrowClient {
    pub fn connect(cfg: &EvmConfig, poll_interval: Duration) -> Result<Self, ChainError> {
        let url: Url = cfg
            .rpc_url
            .parse()
            .map_err(|e| ChainError::Unrecoverable(format!("parse evm rpc url: {e}")))?;
        let provider = RootProvider::new_http(url);

        let signer: PrivateKeySigner = cfg
            .private_key
            .trim_start_matches("0x")
            .parse()
            .map_err(|e| ChainError::Unrecoverable(format!("parse evm private key: {e}")))?;
        let wallet_address = signer.address();

        let contract: Address = cfg
            .settlement_contract
            .parse()
            .map_err(|e| ChainError::Unrecoverable(format!("parse settlement contract: {e}")))?;

        info!(resolver = %wallet_address, contract = %contract, "evm adapter ready");
        Ok(Self {
            provider,
            wallet: EthereumWallet::from(signer),
            wallet_address,
            contract,
            chain_id: cfg.chain_id,
            poll_interval,
        })
    }

    /// Signs and broadcasts a contract call. The nonce is fetched `pending`
    /// so consecutive submissions pipeline; the gas price is the node's
    /// suggestion and the gas limit a fixed constant.
    async fn submit(&self, calldata: Vec<u8>, value: U256) -> Result<B256, ChainError> {
        let nonce = self
            .provider
            .get_transaction_count(self.wallet_address)
            .pending()
            .await
            .map_err(transient)?;
        let gas_price = self.provider.get_gas_price().await.map_err(transient)?;

        let request = TransactionRequest::default()
            .with_from(self.wallet_address)
            .with_to(self.contract)
            .with_nonce(nonce)
            .with_chain_id(self.chain_id)
            .with_gas_limit(ESCROW_GAS_LIMIT)
            .with_gas_price(gas_price)
            .with_value(value)
            .with_input(calldata);

        let envelope = request
            .build(&self.wallet)
            .await
            .map_err(|e| ChainError::Unrecoverable(format!("sign evm transaction: {e}")))?;

        let pending = self
            .provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await
            .map_err(transient)?;
        Ok(*pending.tx_hash())
    }
}

#[async_trait]
impl EvmEscrow for EvmEscrowClient {
    async fn escrow_state(&self, secret_hash: [u8; 32]) -> Result<EscrowState, ChainError> {
        let call = BtcSettlement::escrowsCall {
            secretHash: B256::from(secret_hash),
        };
        let request = TransactionRequest::default()
            .with_to(self.contract)
            .with_input(call.abi_encode());
        let raw = self.provider.call(&request).await.map_err(transient)?;
        let entry = BtcSettlement::escrowsCall::abi_decode_returns(&raw, true)
            .map_err(|e| ChainError::Inconsistent(format!("decode escrow entry: {e}")))?;
        Ok(EscrowState {
            exists: entry.user != Address::ZERO,
            claimed: entry.claimed,
            refunded: entry.refunded,
        })
    }

    async fn current_block(&self) -> Result<u64, ChainError> {
        self.provider.get_block_number().await.map_err(transient)
    }

    async fn create_escrow(
        &self,
        secret_hash: [u8; 32],
        user: Address,
        token: Address,
        amount: U256,
        timelock: u64,
    ) -> Result<B256, ChainError> {
        let calldata = BtcSettlement::createEscrowCall {
            secretHash: B256::from(secret_hash),
            user,
            token,
            amount,
            timelock: U256::from(timelock),
        }
        .abi_encode();
        // the zero token denotes the native coin, carried as call value
        let value = if token == Address::ZERO { amount } else { U256::ZERO };
        let tx_hash = self.submit(calldata, value).await?;
        info!(secret_hash = %hex::encode(secret_hash), %tx_hash, "escrow creation broadcast");
        Ok(tx_hash)
    }

    async fn claim_escrow(
        &self,
        secret_hash: [u8; 32],
        secret: [u8; 32],
    ) -> Result<B256, ChainError> {
        let calldata = BtcSettlement::claimEscrowCall {
            secretHash: B256::from(secret_hash),
            secret: B256::from(secret),
        }
        .abi_encode();
        self.submit(calldata, U256::ZERO).await
    }

    async fn refund_escrow(&self, secret_hash: [u8; 32]) -> Result<B256, ChainError> {
        let calldata = BtcSettlement::refundEscrowCall {
            secretHash: B256::from(secret_hash),
        }
        .abi_encode();
        let tx_hash = self.submit(calldata, U256::ZERO).await?;
        info!(secret_hash = %hex::encode(secret_hash), %tx_hash, "escrow refund broadcast");
        Ok(tx_hash)
    }

    async fn wait_for_inclusion(
        &self,
        tx_hash: B256,
        deadline: Instant,
    ) -> Result<(), ChainError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status() {
                        return Ok(());
                    }
                    return Err(ChainError::Unrecoverable(format!(
                        "evm transaction {tx_hash} reverted"
                    )));
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(%tx_hash, error = %err, "receipt lookup failed, retrying");
                }
            }
            if Instant::now() >= deadline {
                return Err(ChainError::RpcUnavailable(format!(
                    "transaction {tx_hash} not mined before deadline"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn wait_secret_revealed(
        &self,
        secret_hash: [u8; 32],
        from_block: u64,
        deadline: Instant,
    ) -> Result<[u8; 32], ChainError> {
        let topic = B256::from(secret_hash);
        loop {
            // the filter always starts at from_block, so history missed
            // during a disconnect is re-read before live logs
            let filter = Filter::new()
                .address(self.contract)
                .event_signature(BtcSettlement::SecretRevealed::SIGNATURE_HASH)
                .topic1(topic)
                .from_block(from_block);

            match self.provider.get_logs(&filter).await {
                Ok(logs) => {
                    if let Some(log) = logs.into_iter().next() {
                        let decoded = log
                            .log_decode::<BtcSettlement::SecretRevealed>()
                            .map_err(|e| {
                                ChainError::Inconsistent(format!(
                                    "decode SecretRevealed log: {e}"
                                ))
                            })?;
                        debug!(secret_hash = %hex::encode(secret_hash), "secret revealed on chain");
                        return Ok(decoded.inner.data.secret.0);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "log poll failed, retrying");
                }
            }

            if Instant::now() >= deadline {
                return Err(ChainError::ClaimTimeout);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn transient<E: std::fmt::Display>(err: E) -> ChainError {
    ChainError::RpcUnavailable(err.to_string())
}
