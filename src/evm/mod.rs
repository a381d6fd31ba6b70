pub mod contract;
pub mod escrow;

use std::time::Instant;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;

use crate::error::ChainError;

/// What the settlement contract currently records for a secret hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscrowState {
    pub exists: bool,
    pub claimed: bool,
    pub refunded: bool,
}

/// EVM-side operations the coordinator depends on. Implementations must be
/// safe for concurrent use by many swap tasks.
#[async_trait]
pub trait EvmEscrow: Send + Sync + 'static {
    async fn escrow_state(&self, secret_hash: [u8; 32]) -> Result<EscrowState, ChainError>;

    /// Current chain height; recorded before escrow creation so later log
    /// scans can start from it.
    async fn current_block(&self) -> Result<u64, ChainError>;

    /// Broadcasts the escrow creation and returns the transaction hash
    /// without waiting for inclusion.
    async fn create_escrow(
        &self,
        secret_hash: [u8; 32],
        user: Address,
        token: Address,
        amount: U256,
        timelock: u64,
    ) -> Result<B256, ChainError>;

    /// Claims an escrow with its preimage. Only valid before the timelock
    /// and while unclaimed; reverts otherwise.
    async fn claim_escrow(&self, secret_hash: [u8; 32], secret: [u8; 32])
    -> Result<B256, ChainError>;

    /// Refunds an escrow after its timelock. Reverts if already claimed.
    async fn refund_escrow(&self, secret_hash: [u8; 32]) -> Result<B256, ChainError>;

    /// Polls until the transaction is mined; fails `Unrecoverable` on revert.
    async fn wait_for_inclusion(&self, tx_hash: B256, deadline: Instant)
    -> Result<(), ChainError>;

    /// Returns the preimage from the first `SecretRevealed` log whose indexed
    /// topic matches `secret_hash`, scanning history from `from_block` before
    /// following the live chain. Fails with `ClaimTimeout` at the deadline.
    async fn wait_secret_revealed(
        &self,
        secret_hash: [u8; 32],
        from_block: u64,
        deadline: Instant,
    ) -> Result<[u8; 32], ChainError>;
}
