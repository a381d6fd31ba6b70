#![allow(dead_code)]

pub mod bitcoind;
pub mod mock;
pub mod port;
pub mod wait;

use std::sync::Arc;
use std::time::Duration;

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Network};

use btc_evm_swap::config::{ResolverWallet, SwapPolicy};
use btc_evm_swap::secret::{Secret, sha256};
use btc_evm_swap::swap::store::{MemoryStore, SwapStore as _};
use btc_evm_swap::swap::{NewSwap, SwapDirection, SwapRecord, SwapStatus, unix_now};

pub const ALL_STATUSES: [SwapStatus; 9] = [
    SwapStatus::PendingDeposit,
    SwapStatus::BtcConfirmed,
    SwapStatus::EvmFulfilled,
    SwapStatus::EvmClaimed,
    SwapStatus::BtcWithdrawn,
    SwapStatus::Completed,
    SwapStatus::Expired,
    SwapStatus::Refunded,
    SwapStatus::Error,
];

/// Whether `to` is reachable from `from` along lifecycle DAG edges. Status
/// observers may miss intermediate states, so observed successions only have
/// to be reachable, not adjacent.
pub fn dag_reachable(from: SwapStatus, to: SwapStatus) -> bool {
    if from == to {
        return true;
    }
    ALL_STATUSES
        .iter()
        .any(|mid| from.can_transition_to(*mid) && dag_reachable(*mid, to))
}

pub fn keypair(seed: u8) -> (SecretKey, PublicKey) {
    let secp = Secp256k1::new();
    let key = SecretKey::from_slice(&[seed; 32]).expect("seed key");
    (key, key.public_key(&secp))
}

pub fn test_wallet(network: Network) -> ResolverWallet {
    let (key, pubkey) = keypair(1);
    let address = Address::p2pkh(bitcoin::PublicKey::new(pubkey).pubkey_hash(), network);
    ResolverWallet { key, address }
}

/// Policy with production semantics but test-speed clocks. Lock durations
/// are overridden per scenario.
pub fn test_policy() -> SwapPolicy {
    SwapPolicy {
        deposit_window_secs: 10,
        btc_lock_duration_secs: 60,
        evm_lock_duration_secs: 30,
        evm_safety_margin_secs: 1,
        min_deposit_confs: 1,
        finality_depth: 1,
        redeem_fee_sats: 1_000,
        retry_cap: 2,
        btc_poll_interval: Duration::from_millis(10),
        evm_poll_interval: Duration::from_millis(10),
        evm_inclusion_timeout: Duration::from_secs(2),
        btc_finality_timeout: Duration::from_secs(5),
    }
}

/// Builds a valid record through the production constructor and seeds it
/// into a store.
pub fn seeded_record(
    store: &Arc<MemoryStore>,
    policy: &SwapPolicy,
    direction: SwapDirection,
    secret_seed: u8,
) -> SwapRecord {
    let secret = Secret::from_bytes([secret_seed; 32]);
    let secret_hash = sha256(secret.preimage());
    let (_, user_pubkey) = keypair(2);
    let wallet = test_wallet(Network::Regtest);

    let destination = match direction {
        SwapDirection::BtcOutbound => Some(wallet.address.clone()),
        SwapDirection::BtcInbound => None,
    };

    let record = SwapRecord::create(
        NewSwap {
            direction,
            secret,
            secret_hash,
            btc_amount_sats: 50_000,
            btc_destination_address: destination,
            user_btc_refund_pubkey: user_pubkey,
            resolver_btc_pubkey: wallet.public_key(),
            user_evm_address: "0x742d35cc6b29d7d8a1b8d8d0c3b7f12345678901"
                .parse()
                .expect("user evm address"),
            evm_token: alloy::primitives::Address::ZERO,
            evm_amount: alloy::primitives::U256::from(500_000_000_000_000u64),
        },
        policy,
        Network::Regtest,
        unix_now(),
    )
    .expect("create swap record");

    store.put(record.clone()).expect("seed record");
    record
}

/// Samples a swap's status until it reaches a terminal state, returning the
/// distinct states in observation order.
pub fn observe_statuses(
    store: Arc<MemoryStore>,
    swap_id: String,
) -> tokio::task::JoinHandle<Vec<SwapStatus>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        loop {
            if let Ok(record) = store.get(&swap_id) {
                if seen.last() != Some(&record.status) {
                    seen.push(record.status);
                }
                if record.status.is_terminal() {
                    return seen;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
}
