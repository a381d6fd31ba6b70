use std::time::Duration;

use anyhow::{Context as _, Result};
use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};
use bitcoin::{Address, Network};

/// Bitcoin Core endpoint and resolver wallet settings.
#[derive(Debug, Clone)]
pub struct BtcConfig {
    /// `host:port` of the node RPC, e.g. `localhost:18443`.
    pub rpc_host: String,
    pub rpc_user: String,
    pub rpc_pass: String,
    pub network: Network,
}

/// EVM endpoint, signing key and settlement contract.
#[derive(Debug, Clone)]
pub struct EvmConfig {
    pub rpc_url: String,
    /// Hex-encoded resolver hot-wallet key, `0x` prefix optional.
    pub private_key: String,
    pub chain_id: u64,
    /// 20-byte address of the deployed settlement contract.
    pub settlement_contract: String,
}

/// The resolver's Bitcoin identity: the key that signs HTLC spends and the
/// wallet address that receives claimed and refunded outputs.
#[derive(Clone)]
pub struct ResolverWallet {
    pub key: SecretKey,
    pub address: Address,
}

impl ResolverWallet {
    pub fn from_parts(privkey_hex: &str, address: &str, network: Network) -> Result<Self> {
        let raw = hex::decode(privkey_hex.trim_start_matches("0x"))
            .context("decode resolver btc private key hex")?;
        let key = SecretKey::from_slice(&raw).context("parse resolver btc private key")?;
        let address = address
            .parse::<Address<_>>()
            .context("parse resolver btc address")?
            .require_network(network)
            .context("resolver btc address network mismatch")?;
        Ok(Self { key, address })
    }

    pub fn public_key(&self) -> PublicKey {
        let secp = Secp256k1::new();
        self.key.public_key(&secp)
    }
}

impl std::fmt::Debug for ResolverWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Timing and fee policy for the swap lifecycle.
#[derive(Debug, Clone)]
pub struct SwapPolicy {
    /// How long the user has to fund the HTLC.
    pub deposit_window_secs: u64,
    /// Distance of the BTC refund locktime from swap creation.
    pub btc_lock_duration_secs: u64,
    /// Distance of the EVM escrow timelock from swap creation.
    pub evm_lock_duration_secs: u64,
    /// The EVM leg must be unwindable this long before the BTC refund
    /// branch opens.
    pub evm_safety_margin_secs: u64,
    /// Confirmations required before a deposit counts.
    pub min_deposit_confs: u32,
    /// Confirmations after which the BTC payout is treated as final.
    pub finality_depth: u32,
    /// Fixed fee deducted from HTLC redemption transactions.
    pub redeem_fee_sats: u64,
    /// Transient-failure retries before a phase gives up.
    pub retry_cap: u32,
    pub btc_poll_interval: Duration,
    pub evm_poll_interval: Duration,
    /// How long to wait for an EVM transaction to be mined.
    pub evm_inclusion_timeout: Duration,
    /// How long to wait for BTC payout finality.
    pub btc_finality_timeout: Duration,
}

impl SwapPolicy {
    pub fn for_network(network: Network) -> Self {
        Self {
            deposit_window_secs: 3_600,
            btc_lock_duration_secs: 86_400,
            evm_lock_duration_secs: 43_200,
            evm_safety_margin_secs: 3_600,
            min_deposit_confs: 1,
            finality_depth: if network == Network::Bitcoin { 3 } else { 1 },
            redeem_fee_sats: 1_000,
            retry_cap: 3,
            btc_poll_interval: Duration::from_secs(5),
            evm_poll_interval: Duration::from_secs(5),
            evm_inclusion_timeout: Duration::from_secs(120),
            btc_finality_timeout: Duration::from_secs(3_600),
        }
    }
}

/// Fixed-rate pricing hook behind the quote endpoint.
#[derive(Debug, Clone)]
pub struct QuotePolicy {
    /// Exchange rate: wei of the EVM asset per satoshi.
    pub wei_per_sat: u128,
    /// Flat resolver fee, reported in wei.
    pub fee_wei: u128,
    pub estimated_time_secs: u32,
}

impl Default for QuotePolicy {
    fn default() -> Self {
        Self {
            // 1e10 wei/sat puts 1 BTC at par with 1 ether
            wei_per_sat: 10_000_000_000,
            fee_wei: 50_000_000_000_000_000,
            estimated_time_secs: 300,
        }
    }
}

/// Maps the `BTC_NETWORK` setting onto address parameters.
pub fn parse_network(name: &str) -> Result<Network> {
    match name.to_ascii_lowercase().as_str() {
        "mainnet" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        other => anyhow::bail!("unknown bitcoin network: {other}"),
    }
}
