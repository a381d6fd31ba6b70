pub mod htlc;
pub mod rpc;

use std::time::Instant;

use async_trait::async_trait;
use bitcoin::secp256k1::SecretKey;
use bitcoin::{Address, ScriptBuf, Txid};

use crate::error::ChainError;

/// The HTLC funding output as discovered on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingOutpoint {
    pub txid: Txid,
    pub vout: u32,
    pub value_sats: u64,
}

/// Which HTLC branch a redemption spends.
#[derive(Clone, PartialEq, Eq)]
pub enum RedeemMode {
    Claim { preimage: [u8; 32] },
    Refund,
}

impl std::fmt::Debug for RedeemMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedeemMode::Claim { .. } => f.write_str("Claim"),
            RedeemMode::Refund => f.write_str("Refund"),
        }
    }
}

/// Everything needed to spend an HTLC output to a destination.
#[derive(Clone)]
pub struct RedeemRequest {
    pub funding: FundingOutpoint,
    pub redeem_script: ScriptBuf,
    pub destination: Address,
    pub key: SecretKey,
    pub mode: RedeemMode,
    /// Absolute locktime committed by the script; consumed only by the
    /// refund branch.
    pub locktime: u64,
}

/// Bitcoin-side operations the coordinator depends on. Implementations must
/// be safe for concurrent use by many swap tasks.
#[async_trait]
pub trait BitcoinChain: Send + Sync + 'static {
    /// Scans mempool and blocks for the first output paying exactly
    /// `expected_sats` to `address` with at least `min_confs` confirmations.
    /// Over- and under-payments never match. Fails with `DepositTimeout`
    /// once `deadline` passes.
    async fn find_deposit(
        &self,
        address: &Address,
        expected_sats: u64,
        min_confs: u32,
        deadline: Instant,
    ) -> Result<FundingOutpoint, ChainError>;

    /// Builds, signs and broadcasts the redemption of an HTLC output.
    async fn redeem_htlc(&self, request: RedeemRequest) -> Result<Txid, ChainError>;

    /// Plain wallet-funded spend, used for the outbound BTC payout.
    async fn send_to_address(
        &self,
        destination: &Address,
        amount_sats: u64,
    ) -> Result<Txid, ChainError>;

    /// Polls until `txid` has at least `depth` confirmations.
    async fn wait_for_confirmations(
        &self,
        txid: Txid,
        depth: u32,
        deadline: Instant,
    ) -> Result<u32, ChainError>;

    /// Whether the output is still in the UTXO set or mempool-spendable.
    async fn is_outpoint_unspent(&self, txid: Txid, vout: u32) -> Result<bool, ChainError>;
}
