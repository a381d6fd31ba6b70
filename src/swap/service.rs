use std::collections::HashMap;
use std::str::FromStr as _;
use std::sync::{Arc, Mutex};

use alloy::primitives::{Address as EvmAddress, U256};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bitcoin::{Address as BtcAddress, Network};
use bitcoin::secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use super::coordinator::Coordinator;
use super::store::{StoreError, SwapStore};
use super::{NewSwap, SwapDirection, SwapRecord, SwapStatus, unix_now};
use crate::bitcoin::BitcoinChain;
use crate::config::{QuotePolicy, ResolverWallet, SwapPolicy};
use crate::evm::EvmEscrow;
use crate::secret::Secret;

/// Chain id used on the wire to denote the Bitcoin side of a pair.
pub const BITCOIN_CHAIN_ID: u64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    pub from_chain_id: u64,
    pub from_token_address: String,
    pub to_chain_id: u64,
    pub to_token_address: String,
    /// Amount of the source asset in its smallest unit, as a decimal string.
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_destination_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub to_token_amount: String,
    pub fee: String,
    pub estimated_time: u32,
    pub quote_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub quote_id: String,
    /// Hex-encoded 33-byte compressed point for the HTLC refund branch.
    pub user_btc_refund_pubkey: String,
    pub user_evm_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btc_destination_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub swap_id: String,
    pub btc_deposit_address: String,
    /// Unix seconds after which the deposit address expires.
    pub expires_at: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatusResponse {
    pub swap_id: String,
    pub status: SwapStatus,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unsupported swap pair")]
    InvalidPair,

    #[error("unknown or expired quote")]
    UnknownQuote,

    #[error("invalid address or key: {0}")]
    BadAddress(String),

    #[error("swap not found")]
    NotFound,

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::InvalidPair | ServiceError::BadAddress(_) | ServiceError::UnknownQuote => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::NotFound => StatusCode::NOT_FOUND,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// A priced pair retained between `quote` and `initiate`.
#[derive(Debug, Clone)]
struct QuoteEntry {
    direction: SwapDirection,
    btc_amount_sats: u64,
    evm_amount_wei: U256,
    evm_token: EvmAddress,
    btc_destination_address: Option<String>,
}

#[derive(Clone)]
pub struct ResolverConfig {
    pub network: Network,
    pub evm_chain_id: u64,
    pub wallet: ResolverWallet,
    pub swap: SwapPolicy,
    pub quote: QuotePolicy,
}

/// The facade: allocates swaps, spawns their coordinators and answers
/// status reads. Transport-agnostic; [`router`] binds it to HTTP.
pub struct ResolverService<S, B, E> {
    cfg: ResolverConfig,
    store: Arc<S>,
    btc: Arc<B>,
    evm: Arc<E>,
    quotes: Mutex<HashMap<String, QuoteEntry>>,
    shutdown: watch::Sender<bool>,
}

impl<S, B, E> ResolverService<S, B, E>
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    pub fn new(cfg: ResolverConfig, store: Arc<S>, btc: Arc<B>, evm: Arc<E>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            cfg,
            store,
            btc,
            evm,
            quotes: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    /// Asks every running coordinator to persist its state and stop.
    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn store(&self) -> Arc<S> {
        self.store.clone()
    }

    /// Prices a pair at the configured fixed rate and retains the quote for
    /// a later `initiate`.
    pub fn quote(&self, request: &QuoteRequest) -> Result<QuoteResponse, ServiceError> {
        let (direction, evm_token_str) = if request.from_chain_id == BITCOIN_CHAIN_ID
            && request.to_chain_id == self.cfg.evm_chain_id
        {
            (SwapDirection::BtcInbound, &request.to_token_address)
        } else if request.from_chain_id == self.cfg.evm_chain_id
            && request.to_chain_id == BITCOIN_CHAIN_ID
        {
            (SwapDirection::BtcOutbound, &request.from_token_address)
        } else {
            return Err(ServiceError::InvalidPair);
        };

        let evm_token = EvmAddress::from_str(evm_token_str)
            .map_err(|e| ServiceError::BadAddress(format!("evm token: {e}")))?;

        let wei_per_sat = U256::from(self.cfg.quote.wei_per_sat);
        let (btc_amount_sats, evm_amount_wei, to_token_amount) = match direction {
            SwapDirection::BtcInbound => {
                let sats: u64 = request
                    .amount
                    .parse()
                    .map_err(|_| ServiceError::InvalidPair)?;
                let wei = U256::from(sats) * wei_per_sat;
                (sats, wei, wei.to_string())
            }
            SwapDirection::BtcOutbound => {
                let wei: U256 = request
                    .amount
                    .parse()
                    .map_err(|_| ServiceError::InvalidPair)?;
                let sats = u64::try_from(wei / wei_per_sat)
                    .map_err(|_| ServiceError::InvalidPair)?;
                (sats, wei, sats.to_string())
            }
        };
        if btc_amount_sats == 0 {
            return Err(ServiceError::InvalidPair);
        }

        let quote_id = Uuid::new_v4().to_string();
        let entry = QuoteEntry {
            direction,
            btc_amount_sats,
            evm_amount_wei,
            evm_token,
            btc_destination_address: request.btc_destination_address.clone(),
        };
        self.quotes
            .lock()
            .expect("quote map lock poisoned")
            .insert(quote_id.clone(), entry);

        info!(%quote_id, ?direction, btc_amount_sats, "quote issued");
        Ok(QuoteResponse {
            to_token_amount,
            fee: self.cfg.quote.fee_wei.to_string(),
            estimated_time: self.cfg.quote.estimated_time_secs,
            quote_id,
        })
    }

    /// Allocates a new swap from a prior quote, persists the record and
    /// spawns its coordinator.
    pub fn initiate(&self, request: &SwapRequest) -> Result<SwapResponse, ServiceError> {
        let quote = self
            .quotes
            .lock()
            .expect("quote map lock poisoned")
            .get(&request.quote_id)
            .cloned()
            .ok_or(ServiceError::UnknownQuote)?;

        let user_btc_refund_pubkey = parse_compressed_pubkey(&request.user_btc_refund_pubkey)?;
        let user_evm_address = EvmAddress::from_str(&request.user_evm_address)
            .map_err(|e| ServiceError::BadAddress(format!("evm address: {e}")))?;

        let destination = request
            .btc_destination_address
            .as_ref()
            .or(quote.btc_destination_address.as_ref());
        let btc_destination_address = match (quote.direction, destination) {
            (SwapDirection::BtcOutbound, None) => {
                return Err(ServiceError::BadAddress(
                    "btc destination address required for outbound swaps".to_string(),
                ));
            }
            (_, Some(addr)) => Some(parse_btc_address(addr, self.cfg.network)?),
            (_, None) => None,
        };

        let (secret, secret_hash) = Secret::generate()
            .map_err(|e| ServiceError::Internal(format!("generate secret: {e:#}")))?;

        let record = SwapRecord::create(
            NewSwap {
                direction: quote.direction,
                secret,
                secret_hash,
                btc_amount_sats: quote.btc_amount_sats,
                btc_destination_address,
                user_btc_refund_pubkey,
                resolver_btc_pubkey: self.cfg.wallet.public_key(),
                user_evm_address,
                evm_token: quote.evm_token,
                evm_amount: quote.evm_amount_wei,
            },
            &self.cfg.swap,
            self.cfg.network,
            unix_now(),
        )
        .map_err(|e| ServiceError::Internal(format!("create swap record: {e:#}")))?;

        let response = SwapResponse {
            swap_id: record.id.clone(),
            btc_deposit_address: record.btc_deposit_address.to_string(),
            expires_at: record.expires_at,
        };

        self.store.put(record).map_err(|e| match e {
            StoreError::AlreadyExists(id) => {
                warn!(swap_id = %id, "secret hash collision on insert");
                ServiceError::Internal("swap id collision".to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        })?;

        Coordinator::new(
            self.store.clone(),
            self.btc.clone(),
            self.evm.clone(),
            self.cfg.swap.clone(),
            self.cfg.wallet.clone(),
            self.shutdown.subscribe(),
        )
        .spawn(response.swap_id.clone());

        info!(
            swap_id = %response.swap_id,
            deposit_address = %response.btc_deposit_address,
            "swap initiated"
        );
        Ok(response)
    }

    pub fn status(&self, swap_id: &str) -> Result<SwapStatusResponse, ServiceError> {
        let record = self.store.get(swap_id).map_err(|e| match e {
            StoreError::NotFound(_) => ServiceError::NotFound,
            other => ServiceError::Internal(other.to_string()),
        })?;
        Ok(SwapStatusResponse {
            swap_id: record.id.clone(),
            status: record.status,
            message: record.status.message().to_string(),
        })
    }
}

fn parse_compressed_pubkey(hex_str: &str) -> Result<PublicKey, ServiceError> {
    let raw = hex::decode(hex_str.trim_start_matches("0x"))
        .map_err(|e| ServiceError::BadAddress(format!("btc refund pubkey: {e}")))?;
    if raw.len() != 33 {
        return Err(ServiceError::BadAddress(
            "btc refund pubkey must be a 33-byte compressed point".to_string(),
        ));
    }
    PublicKey::from_slice(&raw).map_err(|e| ServiceError::BadAddress(format!("btc refund pubkey: {e}")))
}

fn parse_btc_address(addr: &str, network: Network) -> Result<BtcAddress, ServiceError> {
    addr.parse::<BtcAddress<_>>()
        .map_err(|e| ServiceError::BadAddress(format!("btc address: {e}")))?
        .require_network(network)
        .map_err(|e| ServiceError::BadAddress(format!("btc address: {e}")))
}

/// Binds the facade to its HTTP surface.
pub fn router<S, B, E>(service: Arc<ResolverService<S, B, E>>) -> Router
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    Router::new()
        .route("/quote", post(quote_handler::<S, B, E>))
        .route("/swap/initiate", post(initiate_handler::<S, B, E>))
        .route("/swap/status/:swap_id", get(status_handler::<S, B, E>))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

async fn quote_handler<S, B, E>(
    State(service): State<Arc<ResolverService<S, B, E>>>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<QuoteResponse>, ServiceError>
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    service.quote(&request).map(Json)
}

async fn initiate_handler<S, B, E>(
    State(service): State<Arc<ResolverService<S, B, E>>>,
    Json(request): Json<SwapRequest>,
) -> Result<Json<SwapResponse>, ServiceError>
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    service.initiate(&request).map(Json)
}

async fn status_handler<S, B, E>(
    State(service): State<Arc<ResolverService<S, B, E>>>,
    Path(swap_id): Path<String>,
) -> Result<Json<SwapStatusResponse>, ServiceError>
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    service.status(&swap_id).map(Json)
}
