pub mod coordinator;
pub mod refund;
pub mod service;
pub mod store;

use std::time::{SystemTime, UNIX_EPOCH};

use alloy::primitives::{Address as EvmAddress, U256};
use anyhow::Result;
use bitcoin::secp256k1::PublicKey;
use bitcoin::{Address as BtcAddress, Network, ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::bitcoin::htlc::HtlcSpec;
use crate::config::SwapPolicy;
use crate::secret::{Secret, sha256};

/// Lifecycle states of a swap. Transitions follow a fixed DAG; see
/// [`SwapStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapStatus {
    PendingDeposit,
    BtcConfirmed,
    EvmFulfilled,
    EvmClaimed,
    BtcWithdrawn,
    Completed,
    Expired,
    Refunded,
    Error,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SwapStatus::Completed | SwapStatus::Expired | SwapStatus::Refunded | SwapStatus::Error
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle DAG. Terminal
    /// states have no outgoing edges; any non-terminal state may fail into
    /// `Error`.
    pub fn can_transition_to(self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        match (self, next) {
            (from, Error) => !from.is_terminal(),
            (PendingDeposit, BtcConfirmed | Expired) => true,
            (BtcConfirmed, EvmFulfilled) => true,
            (EvmFulfilled, EvmClaimed | Refunded) => true,
            (EvmClaimed, BtcWithdrawn) => true,
            (BtcWithdrawn, Completed) => true,
            _ => false,
        }
    }

    /// Human-readable progress line for the status endpoint.
    pub fn message(self) -> &'static str {
        match self {
            SwapStatus::PendingDeposit => "waiting for the BTC deposit",
            SwapStatus::BtcConfirmed => "BTC deposit confirmed, funding the escrow",
            SwapStatus::EvmFulfilled => "escrow funded, waiting for the claim",
            SwapStatus::EvmClaimed => "escrow claimed, settling the BTC leg",
            SwapStatus::BtcWithdrawn => "BTC sent, waiting for finality",
            SwapStatus::Completed => "swap completed",
            SwapStatus::Expired => "deposit window elapsed without a matching deposit",
            SwapStatus::Refunded => "escrow refunded after the claim window elapsed",
            SwapStatus::Error => "swap failed; operator attention required",
        }
    }
}

impl std::fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SwapStatus::PendingDeposit => "PENDING_DEPOSIT",
            SwapStatus::BtcConfirmed => "BTC_CONFIRMED",
            SwapStatus::EvmFulfilled => "EVM_FULFILLED",
            SwapStatus::EvmClaimed => "EVM_CLAIMED",
            SwapStatus::BtcWithdrawn => "BTC_WITHDRAWN",
            SwapStatus::Completed => "COMPLETED",
            SwapStatus::Expired => "EXPIRED",
            SwapStatus::Refunded => "REFUNDED",
            SwapStatus::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// How the BTC leg settles once the secret is revealed: by claiming the
/// user-funded HTLC, or by paying out to the user's destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapDirection {
    BtcInbound,
    BtcOutbound,
}

/// The authoritative record of one swap. Created by the facade, mutated only
/// by the coordinator assigned to it (plus the refund worker once terminal).
#[derive(Debug, Clone)]
pub struct SwapRecord {
    pub id: String,
    pub status: SwapStatus,
    pub direction: SwapDirection,
    pub secret: Secret,
    pub secret_hash: [u8; 32],
    pub btc_htlc_script: ScriptBuf,
    pub btc_deposit_address: BtcAddress,
    pub btc_amount_sats: u64,
    pub btc_destination_address: Option<BtcAddress>,
    pub user_btc_refund_pubkey: PublicKey,
    pub resolver_btc_pubkey: PublicKey,
    pub user_evm_address: EvmAddress,
    /// The zero address denotes the native coin.
    pub evm_token: EvmAddress,
    pub evm_amount: U256,
    /// Absolute unix-second locktime of the HTLC refund branch.
    pub btc_locktime: u64,
    /// Absolute unix-second timelock of the EVM escrow.
    pub evm_locktime: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub btc_funding_txid: Option<Txid>,
    pub btc_funding_vout: Option<u32>,
    /// Chain height recorded when the escrow was created; log scans start
    /// here so a restart never misses the reveal.
    pub evm_escrow_block: Option<u64>,
    pub btc_redeem_txid: Option<Txid>,
    /// A failed or refunded swap left the deposit to the user's refund
    /// branch; the watcher reports on it until the user reclaims.
    pub btc_refund_due: bool,
    pub btc_refund_reclaimed: bool,
}

/// Request-side inputs for a new swap record.
pub struct NewSwap {
    pub direction: SwapDirection,
    pub secret: Secret,
    pub secret_hash: [u8; 32],
    pub btc_amount_sats: u64,
    pub btc_destination_address: Option<BtcAddress>,
    pub user_btc_refund_pubkey: PublicKey,
    pub resolver_btc_pubkey: PublicKey,
    pub user_evm_address: EvmAddress,
    pub evm_token: EvmAddress,
    pub evm_amount: U256,
}

impl SwapRecord {
    /// Builds a record with all derived fields, enforcing the creation-time
    /// invariants: the stored hash is the digest of the stored secret, the
    /// deposit address commits to the exact stored script, and the EVM
    /// timelock expires a full safety margin before the BTC refund branch
    /// opens.
    pub fn create(
        params: NewSwap,
        policy: &SwapPolicy,
        network: Network,
        now: u64,
    ) -> Result<Self> {
        anyhow::ensure!(
            sha256(params.secret.preimage()) == params.secret_hash,
            "secret hash does not match secret"
        );
        anyhow::ensure!(params.btc_amount_sats > 0, "btc amount must be positive");
        if params.direction == SwapDirection::BtcOutbound {
            anyhow::ensure!(
                params.btc_destination_address.is_some(),
                "outbound swap requires a btc destination address"
            );
        }

        let btc_locktime = now + policy.btc_lock_duration_secs;
        let evm_locktime = now + policy.evm_lock_duration_secs;
        anyhow::ensure!(
            btc_locktime > now + policy.evm_safety_margin_secs,
            "btc locktime inside the safety margin"
        );
        anyhow::ensure!(
            evm_locktime < btc_locktime - policy.evm_safety_margin_secs,
            "evm timelock must expire a safety margin before the btc refund opens"
        );

        let spec = HtlcSpec {
            secret_hash: params.secret_hash,
            claim_pubkey: params.resolver_btc_pubkey,
            refund_pubkey: params.user_btc_refund_pubkey,
            locktime: btc_locktime,
        };
        let btc_htlc_script = spec.redeem_script();
        let btc_deposit_address = spec.p2sh_address(network)?;

        Ok(Self {
            id: swap_id(&params.secret_hash),
            status: SwapStatus::PendingDeposit,
            direction: params.direction,
            secret: params.secret,
            secret_hash: params.secret_hash,
            btc_htlc_script,
            btc_deposit_address,
            btc_amount_sats: params.btc_amount_sats,
            btc_destination_address: params.btc_destination_address,
            user_btc_refund_pubkey: params.user_btc_refund_pubkey,
            resolver_btc_pubkey: params.resolver_btc_pubkey,
            user_evm_address: params.user_evm_address,
            evm_token: params.evm_token,
            evm_amount: params.evm_amount,
            btc_locktime,
            evm_locktime,
            created_at: now,
            expires_at: now + policy.deposit_window_secs,
            btc_funding_txid: None,
            btc_funding_vout: None,
            evm_escrow_block: None,
            btc_redeem_txid: None,
            btc_refund_due: false,
            btc_refund_reclaimed: false,
        })
    }
}

/// Swap ids are derived from the secret hash, like the escrow key itself.
pub fn swap_id(secret_hash: &[u8; 32]) -> String {
    format!("swap-{}", hex::encode(&secret_hash[..8]))
}

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
