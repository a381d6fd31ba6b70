use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::B256;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::store::SwapStore;
use super::{SwapDirection, SwapRecord, SwapStatus, unix_now};
use crate::bitcoin::{BitcoinChain, FundingOutpoint, RedeemMode, RedeemRequest};
use crate::config::{ResolverWallet, SwapPolicy};
use crate::error::{ChainError, retry_backoff};
use crate::evm::EvmEscrow;
use crate::secret::sha256;

/// Outcome of one phase: the record advanced (possibly to a terminal state),
/// or shutdown was requested and the current state is already persisted.
enum Phase {
    Advanced,
    Halted,
}

enum ClaimOutcome {
    Claimed,
    Refunded,
}

/// Drives a single swap through the lifecycle DAG. One coordinator task is
/// spawned per swap; every phase persists its transition before the task
/// moves on, so a killed process resumes from the last committed state.
pub struct Coordinator<S, B, E> {
    store: Arc<S>,
    btc: Arc<B>,
    evm: Arc<E>,
    policy: SwapPolicy,
    wallet: ResolverWallet,
    shutdown: watch::Receiver<bool>,
}

impl<S, B, E> Coordinator<S, B, E>
where
    S: SwapStore,
    B: BitcoinChain,
    E: EvmEscrow,
{
    pub fn new(
        store: Arc<S>,
        btc: Arc<B>,
        evm: Arc<E>,
        policy: SwapPolicy,
        wallet: ResolverWallet,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            btc,
            evm,
            policy,
            wallet,
            shutdown,
        }
    }

    pub fn spawn(self, swap_id: String) {
        tokio::spawn(async move {
            self.run(swap_id).await;
        });
    }

    /// Runs the swap to a terminal state (or to a clean halt on shutdown)
    /// and returns the final observed status. Re-entrant: each phase
    /// inspects on-chain state before acting, so replaying from any
    /// persisted snapshot converges on the same terminal.
    pub async fn run(self, swap_id: String) -> SwapStatus {
        let mut shutdown = self.shutdown.clone();
        info!(swap_id = %swap_id, "swap lifecycle started");

        loop {
            let record = match self.store.get(&swap_id) {
                Ok(record) => record,
                Err(err) => {
                    error!(swap_id = %swap_id, error = %err, "cannot load swap record");
                    return SwapStatus::Error;
                }
            };

            if record.status.is_terminal() {
                info!(swap_id = %swap_id, status = %record.status, "swap reached terminal state");
                return record.status;
            }

            let step = match record.status {
                SwapStatus::PendingDeposit => self.await_deposit(&mut shutdown, &record).await,
                SwapStatus::BtcConfirmed => self.fulfill_escrow(&mut shutdown, &record).await,
                SwapStatus::EvmFulfilled => self.await_claim(&mut shutdown, &record).await,
                SwapStatus::EvmClaimed => self.settle_btc_leg(&mut shutdown, &record).await,
                SwapStatus::BtcWithdrawn => self.await_btc_finality(&mut shutdown, &record).await,
                terminal => return terminal,
            };

            match step {
                Ok(Phase::Advanced) => {}
                Ok(Phase::Halted) => {
                    info!(swap_id = %swap_id, "shutdown requested; state persisted");
                    return self
                        .store
                        .get(&swap_id)
                        .map(|r| r.status)
                        .unwrap_or(SwapStatus::Error);
                }
                Err(err) => return self.fail(&swap_id, &err),
            }
        }
    }

    /// Phase 1: wait for the user's deposit until `expires_at`.
    async fn await_deposit(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        record: &SwapRecord,
    ) -> Result<Phase, ChainError> {
        let deadline = deadline_at(record.expires_at);
        tokio::select! {
            _ = halted(shutdown) => Ok(Phase::Halted),
            found = self.btc.find_deposit(
                &record.btc_deposit_address,
                record.btc_amount_sats,
                self.policy.min_deposit_confs,
                deadline,
            ) => match found {
                Ok(outpoint) => {
                    info!(swap_id = %record.id, txid = %outpoint.txid, "btc deposit confirmed");
                    self.transition(&record.id, |r| {
                        r.btc_funding_txid = Some(outpoint.txid);
                        r.btc_funding_vout = Some(outpoint.vout);
                        r.status = SwapStatus::BtcConfirmed;
                    })?;
                    Ok(Phase::Advanced)
                }
                Err(ChainError::DepositTimeout) => {
                    warn!(swap_id = %record.id, "deposit window elapsed");
                    self.transition(&record.id, |r| r.status = SwapStatus::Expired)?;
                    Ok(Phase::Advanced)
                }
                Err(err) => Err(err),
            },
        }
    }

    /// Phase 2: mirror the deposit with an escrow entry on the EVM chain.
    /// Skips submission when the escrow already exists (restart recovery).
    async fn fulfill_escrow(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        record: &SwapRecord,
    ) -> Result<Phase, ChainError> {
        let work = async {
            let scan_from = self
                .with_retries("read chain height", || self.evm.current_block())
                .await?;

            let mut attempt = 0;
            loop {
                let state = self
                    .with_retries("query escrow", || self.evm.escrow_state(record.secret_hash))
                    .await?;
                if state.exists {
                    break;
                }

                let submit = async {
                    let tx_hash = self
                        .evm
                        .create_escrow(
                            record.secret_hash,
                            record.user_evm_address,
                            record.evm_token,
                            record.evm_amount,
                            record.evm_locktime,
                        )
                        .await?;
                    self.evm
                        .wait_for_inclusion(tx_hash, Instant::now() + self.policy.evm_inclusion_timeout)
                        .await
                };
                match submit.await {
                    Ok(()) => break,
                    Err(err) if err.is_transient() && attempt < self.policy.retry_cap => {
                        warn!(
                            swap_id = %record.id,
                            attempt,
                            error = %err,
                            "escrow creation failed, retrying"
                        );
                        tokio::time::sleep(retry_backoff(attempt)).await;
                        attempt += 1;
                    }
                    Err(err) if err.is_transient() => {
                        return Err(ChainError::Unrecoverable(format!(
                            "escrow creation retries exhausted: {err}"
                        )));
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(scan_from)
        };

        tokio::select! {
            _ = halted(shutdown) => Ok(Phase::Halted),
            out = work => {
                let scan_from = out?;
                self.transition(&record.id, |r| {
                    r.evm_escrow_block = r.evm_escrow_block.or(Some(scan_from));
                    r.status = SwapStatus::EvmFulfilled;
                })?;
                info!(swap_id = %record.id, "evm escrow fulfilled");
                Ok(Phase::Advanced)
            }
        }
    }

    /// Phase 3: wait for the user's claim to reveal the secret, pivoting to
    /// the escrow refund when the claim window closes first.
    async fn await_claim(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        record: &SwapRecord,
    ) -> Result<Phase, ChainError> {
        let work = async {
            let state = self
                .with_retries("query escrow", || self.evm.escrow_state(record.secret_hash))
                .await?;
            if state.refunded {
                return Ok(ClaimOutcome::Refunded);
            }

            let from_block = record.evm_escrow_block.unwrap_or(0);
            let deadline = deadline_at(
                record
                    .evm_locktime
                    .saturating_sub(self.policy.evm_safety_margin_secs),
            );
            match self
                .evm
                .wait_secret_revealed(record.secret_hash, from_block, deadline)
                .await
            {
                Ok(revealed) => {
                    if sha256(&revealed) != record.secret_hash {
                        return Err(ChainError::Inconsistent(
                            "revealed preimage does not hash to the committed secret hash"
                                .to_string(),
                        ));
                    }
                    Ok(ClaimOutcome::Claimed)
                }
                Err(ChainError::ClaimTimeout) => {
                    warn!(swap_id = %record.id, "claim window elapsed, refunding escrow");
                    let until_unlock = record.evm_locktime.saturating_sub(unix_now());
                    tokio::time::sleep(Duration::from_secs(until_unlock)).await;

                    self.submit_confirmed("escrow refund", || {
                        self.evm.refund_escrow(record.secret_hash)
                    })
                    .await?;
                    Ok(ClaimOutcome::Refunded)
                }
                Err(err) => Err(err),
            }
        };

        tokio::select! {
            _ = halted(shutdown) => Ok(Phase::Halted),
            out = work => match out? {
                ClaimOutcome::Claimed => {
                    info!(swap_id = %record.id, "secret revealed by evm claim");
                    self.transition(&record.id, |r| r.status = SwapStatus::EvmClaimed)?;
                    Ok(Phase::Advanced)
                }
                ClaimOutcome::Refunded => {
                    self.transition(&record.id, |r| {
                        if r.btc_funding_txid.is_some() {
                            r.btc_refund_due = true;
                        }
                        r.status = SwapStatus::Refunded;
                    })?;
                    Ok(Phase::Advanced)
                }
            },
        }
    }

    /// Phase 4: settle the BTC leg with the revealed preimage.
    async fn settle_btc_leg(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        record: &SwapRecord,
    ) -> Result<Phase, ChainError> {
        let work = async {
            match record.direction {
                SwapDirection::BtcInbound => {
                    let (txid, vout) = record
                        .btc_funding_txid
                        .zip(record.btc_funding_vout)
                        .ok_or_else(|| {
                            ChainError::Inconsistent(
                                "claiming an htlc with no recorded funding outpoint".to_string(),
                            )
                        })?;
                    let request = RedeemRequest {
                        funding: FundingOutpoint {
                            txid,
                            vout,
                            value_sats: record.btc_amount_sats,
                        },
                        redeem_script: record.btc_htlc_script.clone(),
                        destination: self.wallet.address.clone(),
                        key: self.wallet.key,
                        mode: RedeemMode::Claim {
                            preimage: *record.secret.preimage(),
                        },
                        locktime: record.btc_locktime,
                    };
                    self.with_retries("claim htlc", || self.btc.redeem_htlc(request.clone()))
                        .await
                }
                SwapDirection::BtcOutbound => {
                    let destination = record.btc_destination_address.clone().ok_or_else(|| {
                        ChainError::Inconsistent(
                            "outbound swap without a destination address".to_string(),
                        )
                    })?;
                    self.with_retries("send btc payout", || {
                        self.btc.send_to_address(&destination, record.btc_amount_sats)
                    })
                    .await
                }
            }
        };

        tokio::select! {
            _ = halted(shutdown) => Ok(Phase::Halted),
            out = work => {
                let txid = out?;
                info!(swap_id = %record.id, %txid, "btc leg settled");
                self.transition(&record.id, |r| {
                    r.btc_redeem_txid = Some(txid);
                    r.status = SwapStatus::BtcWithdrawn;
                })?;
                Ok(Phase::Advanced)
            }
        }
    }

    /// Phase 5: wait for finality depth on the BTC settlement transaction.
    async fn await_btc_finality(
        &self,
        shutdown: &mut watch::Receiver<bool>,
        record: &SwapRecord,
    ) -> Result<Phase, ChainError> {
        let txid = record.btc_redeem_txid.ok_or_else(|| {
            ChainError::Inconsistent("awaiting finality with no settlement txid".to_string())
        })?;
        let deadline = Instant::now() + self.policy.btc_finality_timeout;

        tokio::select! {
            _ = halted(shutdown) => Ok(Phase::Halted),
            confs = self.btc.wait_for_confirmations(txid, self.policy.finality_depth, deadline) => {
                let confirmations = confs?;
                info!(swap_id = %record.id, confirmations, "btc settlement final");
                self.transition(&record.id, |r| r.status = SwapStatus::Completed)?;
                Ok(Phase::Advanced)
            }
        }
    }

    fn fail(&self, swap_id: &str, err: &ChainError) -> SwapStatus {
        error!(swap_id = %swap_id, error = %err, "swap failed");
        let result = self.store.update(swap_id, |r| {
            // a funded HTLC is left to the user's refund branch; record the
            // intent so the watcher tracks the reclaim
            if r.btc_funding_txid.is_some() {
                r.btc_refund_due = true;
            }
            r.status = SwapStatus::Error;
        });
        if let Err(store_err) = result {
            error!(swap_id = %swap_id, error = %store_err, "cannot persist failure state");
        }
        SwapStatus::Error
    }

    fn transition(
        &self,
        swap_id: &str,
        mutate: impl FnOnce(&mut SwapRecord),
    ) -> Result<SwapRecord, ChainError> {
        self.store
            .update(swap_id, mutate)
            .map_err(|e| ChainError::Unrecoverable(format!("persist swap state: {e}")))
    }

    /// Bounded retry for transient failures, promoting to `Unrecoverable`
    /// once the cap is reached.
    async fn with_retries<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ChainError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.retry_cap => {
                    warn!(attempt, error = %err, "{what} failed, retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(ChainError::Unrecoverable(format!(
                        "{what}: retries exhausted: {err}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Broadcast-then-confirm with the same retry policy.
    async fn submit_confirmed<F, Fut>(&self, what: &str, mut submit: F) -> Result<(), ChainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<B256, ChainError>>,
    {
        let mut attempt = 0;
        loop {
            let result = async {
                let tx_hash = submit().await?;
                self.evm
                    .wait_for_inclusion(tx_hash, Instant::now() + self.policy.evm_inclusion_timeout)
                    .await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(err) if err.is_transient() && attempt < self.policy.retry_cap => {
                    warn!(attempt, error = %err, "{what} failed, retrying");
                    tokio::time::sleep(retry_backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(ChainError::Unrecoverable(format!(
                        "{what}: retries exhausted: {err}"
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Resolves once shutdown is requested; pends forever if the shutdown
/// channel is gone (the task then simply runs to completion).
async fn halted(shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    loop {
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
        if *shutdown.borrow() {
            return;
        }
    }
}

/// Converts an absolute unix-second deadline into a monotonic instant.
fn deadline_at(unix_secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(unix_secs.saturating_sub(unix_now()))
}
