use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bitcoin::{Address, Amount, Txid};
use bitcoincore_rpc::{Auth, Client, RpcApi as _, jsonrpc};
use tokio::task;
use tracing::{debug, info};

use super::{BitcoinChain, FundingOutpoint, RedeemRequest, htlc};
use crate::config::BtcConfig;
use crate::error::ChainError;

/// Bitcoin Core RPC adapter. One instance is shared by all swap tasks; the
/// blocking RPC client is hopped onto the blocking thread pool per call.
pub struct BitcoinCoreAdapter {
    client: Arc<Client>,
    poll_interval: Duration,
    redeem_fee_sats: u64,
}

impl BitcoinCoreAdapter {
    pub fn connect(
        cfg: &BtcConfig,
        poll_interval: Duration,
        redeem_fee_sats: u64,
    ) -> Result<Self, ChainError> {
        let url = format!("http://{}", cfg.rpc_host);
        let auth = Auth::UserPass(cfg.rpc_user.clone(), cfg.rpc_pass.clone());
        let client = Client::new(&url, auth).map_err(map_rpc_error)?;
        Ok(Self {
            client: Arc::new(client),
            poll_interval,
            redeem_fee_sats,
        })
    }

    async fn with_client<T, F>(&self, op: F) -> Result<T, ChainError>
    where
        T: Send + 'static,
        F: FnOnce(&Client) -> Result<T, bitcoincore_rpc::Error> + Send + 'static,
    {
        let client = self.client.clone();
        task::spawn_blocking(move || op(&client).map_err(map_rpc_error))
            .await
            .map_err(|e| ChainError::Unrecoverable(format!("join rpc task: {e}")))?
    }
}

#[async_trait]
impl BitcoinChain for BitcoinCoreAdapter {
    async fn find_deposit(
        &self,
        address: &Address,
        expected_sats: u64,
        min_confs: u32,
        deadline: Instant,
    ) -> Result<FundingOutpoint, ChainError> {
        // watch-only import so listunspent covers the HTLC script
        let watch = address.clone();
        self.with_client(move |c| c.import_address(&watch, Some("htlc-watch"), Some(false)))
            .await?;

        let expected = Amount::from_sat(expected_sats);
        loop {
            let scan = address.clone();
            let unspent = self
                .with_client(move |c| {
                    c.list_unspent(Some(0), None, Some(&[&scan]), Some(true), None)
                })
                .await?;

            // strict equality: over- and under-payments never match
            if let Some(entry) = unspent
                .iter()
                .find(|u| u.amount == expected && u.confirmations >= min_confs)
            {
                info!(
                    txid = %entry.txid,
                    vout = entry.vout,
                    confirmations = entry.confirmations,
                    "htlc deposit matched"
                );
                return Ok(FundingOutpoint {
                    txid: entry.txid,
                    vout: entry.vout,
                    value_sats: entry.amount.to_sat(),
                });
            }

            if Instant::now() >= deadline {
                return Err(ChainError::DepositTimeout);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn redeem_htlc(&self, request: RedeemRequest) -> Result<Txid, ChainError> {
        let tx = htlc::build_redeem_tx(&request, self.redeem_fee_sats)?;
        debug!(mode = ?request.mode, txid = %tx.compute_txid(), "broadcasting htlc redemption");
        self.with_client(move |c| c.send_raw_transaction(&tx)).await
    }

    async fn send_to_address(
        &self,
        destination: &Address,
        amount_sats: u64,
    ) -> Result<Txid, ChainError> {
        let destination = destination.clone();
        self.with_client(move |c| {
            c.send_to_address(
                &destination,
                Amount::from_sat(amount_sats),
                None,
                None,
                None,
                None,
                None,
                None,
            )
        })
        .await
    }

    async fn wait_for_confirmations(
        &self,
        txid: Txid,
        depth: u32,
        deadline: Instant,
    ) -> Result<u32, ChainError> {
        loop {
            let lookup = self
                .with_client(move |c| c.get_raw_transaction_info(&txid, None))
                .await;

            match lookup {
                Ok(info) => {
                    let confirmations = info.confirmations.unwrap_or(0);
                    if confirmations >= depth {
                        return Ok(confirmations);
                    }
                }
                // the node may not know the tx yet right after broadcast
                Err(err) if err.is_transient() => {
                    debug!(%txid, error = %err, "confirmation lookup failed, retrying");
                }
                Err(err) => return Err(err),
            }

            if Instant::now() >= deadline {
                return Err(ChainError::Unrecoverable(format!(
                    "timed out waiting for {depth} confirmations of {txid}"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn is_outpoint_unspent(&self, txid: Txid, vout: u32) -> Result<bool, ChainError> {
        let entry = self
            .with_client(move |c| c.get_tx_out(&txid, vout, Some(true)))
            .await?;
        Ok(entry.is_some())
    }
}

fn map_rpc_error(err: bitcoincore_rpc::Error) -> ChainError {
    match &err {
        bitcoincore_rpc::Error::JsonRpc(jsonrpc::Error::Rpc(rpc)) => match rpc.code {
            // RPC_WALLET_INSUFFICIENT_FUNDS
            -6 => ChainError::InsufficientWalletBalance,
            // RPC_VERIFY_{ERROR,REJECTED,ALREADY_IN_CHAIN}
            -25 | -26 | -27 => ChainError::ScriptEvalFailed(rpc.message.clone()),
            _ => ChainError::RpcUnavailable(err.to_string()),
        },
        _ => ChainError::RpcUnavailable(err.to_string()),
    }
}
