use std::time::Duration;

use thiserror::Error;

/// Failure taxonomy shared by both chain adapters and the coordinator.
///
/// `RpcUnavailable` is the only transient kind: callers retry it with
/// [`retry_backoff`] up to a cap and then promote to `Unrecoverable`.
/// The two timeout kinds drive the state machine to its timeout terminals
/// (`Expired`, `Refunded`); `Inconsistent` means on-chain reality disagrees
/// with the swap record and is never auto-recovered.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    #[error("deposit window elapsed")]
    DepositTimeout,

    #[error("claim window elapsed")]
    ClaimTimeout,

    #[error("htlc output of {funding_sats} sat cannot cover the {fee_sats} sat fee")]
    InsufficientFunds { funding_sats: u64, fee_sats: u64 },

    #[error("resolver wallet balance too low")]
    InsufficientWalletBalance,

    #[error("node rejected script: {0}")]
    ScriptEvalFailed(String),

    #[error("on-chain state disagrees with swap record: {0}")]
    Inconsistent(String),

    #[error("{0}")]
    Unrecoverable(String),
}

impl ChainError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::RpcUnavailable(_))
    }
}

/// Exponential backoff for transient failures: 2^attempt seconds, capped.
pub fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.min(6))
}
