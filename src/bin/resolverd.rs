use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Parser as _;
use tracing::info;

use btc_evm_swap::bitcoin::rpc::BitcoinCoreAdapter;
use btc_evm_swap::config::{
    BtcConfig, EvmConfig, QuotePolicy, ResolverWallet, SwapPolicy, parse_network,
};
use btc_evm_swap::evm::escrow::EvmEscrowClient;
use btc_evm_swap::swap::refund::spawn_refund_watcher;
use btc_evm_swap::swap::service::{ResolverConfig, ResolverService, router};
use btc_evm_swap::swap::store::MemoryStore;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "BTC_RPC_HOST", default_value = "localhost:18443")]
    btc_rpc_host: String,

    #[arg(long, env = "BTC_RPC_USER")]
    btc_rpc_user: String,

    #[arg(long, env = "BTC_RPC_PASS")]
    btc_rpc_pass: String,

    /// Wallet address receiving claimed and refunded outputs and funding
    /// outbound payouts.
    #[arg(long, env = "BTC_RESOLVER_ADDRESS")]
    btc_resolver_address: String,

    /// Hex-encoded key behind the HTLC claim branch.
    #[arg(long, env = "BTC_RESOLVER_PRIVKEY")]
    btc_resolver_privkey: String,

    #[arg(long, env = "BTC_NETWORK", default_value = "regtest")]
    btc_network: String,

    #[arg(long, env = "EVM_RPC_URL")]
    evm_rpc_url: String,

    #[arg(long, env = "EVM_PRIVATE_KEY")]
    evm_private_key: String,

    #[arg(long, env = "EVM_CHAIN_ID")]
    evm_chain_id: u64,

    #[arg(long, env = "EVM_SETTLEMENT_CONTRACT")]
    evm_settlement_contract: String,

    /// Fixed quote rate: wei of the EVM asset per satoshi.
    #[arg(long, env = "WEI_PER_SAT", default_value_t = 10_000_000_000u128)]
    wei_per_sat: u128,

    /// Flat resolver fee reported by the quote endpoint, in wei.
    #[arg(long, env = "QUOTE_FEE_WEI", default_value_t = 50_000_000_000_000_000u128)]
    quote_fee_wei: u128,

    #[arg(long, default_value_t = 5)]
    refund_poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    btc_evm_swap::logging::init().ok();
    let args = Args::parse();

    let network = parse_network(&args.btc_network)?;
    let wallet = ResolverWallet::from_parts(
        &args.btc_resolver_privkey,
        &args.btc_resolver_address,
        network,
    )
    .context("load resolver btc wallet")?;
    let policy = SwapPolicy::for_network(network);

    let btc_cfg = BtcConfig {
        rpc_host: args.btc_rpc_host,
        rpc_user: args.btc_rpc_user,
        rpc_pass: args.btc_rpc_pass,
        network,
    };
    let evm_cfg = EvmConfig {
        rpc_url: args.evm_rpc_url,
        private_key: args.evm_private_key,
        chain_id: args.evm_chain_id,
        settlement_contract: args.evm_settlement_contract,
    };

    let btc = Arc::new(
        BitcoinCoreAdapter::connect(&btc_cfg, policy.btc_poll_interval, policy.redeem_fee_sats)
            .context("connect bitcoin rpc")?,
    );
    let evm = Arc::new(
        EvmEscrowClient::connect(&evm_cfg, policy.evm_poll_interval).context("connect evm rpc")?,
    );
    let store = Arc::new(MemoryStore::new());

    let cfg = ResolverConfig {
        network,
        evm_chain_id: args.evm_chain_id,
        wallet,
        swap: policy,
        quote: QuotePolicy {
            wei_per_sat: args.wei_per_sat,
            fee_wei: args.quote_fee_wei,
            ..QuotePolicy::default()
        },
    };
    let service = Arc::new(ResolverService::new(
        cfg,
        store.clone(),
        btc.clone(),
        evm.clone(),
    ));

    spawn_refund_watcher(
        store,
        btc,
        Duration::from_secs(args.refund_poll_interval_secs),
    );

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port))
        .await
        .context("bind listen port")?;
    info!(port = args.port, "resolver http api listening");

    let shutdown_service = service.clone();
    axum::serve(listener, router(service))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received; halting coordinators");
            shutdown_service.trigger_shutdown();
        })
        .await
        .context("serve http api")?;

    Ok(())
}
