use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use alloy::primitives::{Address as EvmAddress, B256, U256};
use async_trait::async_trait;
use bitcoin::hashes::Hash as _;
use bitcoin::{Address, Txid};

use btc_evm_swap::bitcoin::{BitcoinChain, FundingOutpoint, RedeemMode, RedeemRequest};
use btc_evm_swap::error::ChainError;
use btc_evm_swap::evm::{EscrowState, EvmEscrow};
use btc_evm_swap::secret::sha256;
use btc_evm_swap::swap::unix_now;

const MOCK_POLL: Duration = Duration::from_millis(5);

pub fn test_txid(n: u8) -> Txid {
    Txid::from_byte_array([n; 32])
}

/// Bitcoin chain double: deposits are registered by the test, spends are
/// captured for assertions, confirmations are instant.
#[derive(Default)]
pub struct MockBitcoin {
    deposits: Mutex<HashMap<String, FundingOutpoint>>,
    spent: Mutex<HashSet<(Txid, u32)>>,
    pub redeems: Mutex<Vec<RedeemRequest>>,
    pub sends: Mutex<Vec<(String, u64)>>,
    next_txid: AtomicU32,
}

impl MockBitcoin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an output paying `value_sats` to `address`.
    pub fn deposit(&self, address: &Address, value_sats: u64) -> FundingOutpoint {
        let outpoint = FundingOutpoint {
            txid: self.fresh_txid(),
            vout: 0,
            value_sats,
        };
        self.deposits
            .lock()
            .unwrap()
            .insert(address.to_string(), outpoint);
        outpoint
    }

    pub fn claimed_preimages(&self) -> Vec<[u8; 32]> {
        self.redeems
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| match r.mode {
                RedeemMode::Claim { preimage } => Some(preimage),
                RedeemMode::Refund => None,
            })
            .collect()
    }

    /// Marks an output as spent, as the user's own refund-branch reclaim
    /// would.
    pub fn mark_spent(&self, txid: Txid, vout: u32) {
        self.spent.lock().unwrap().insert((txid, vout));
    }

    fn fresh_txid(&self) -> Txid {
        let n = self.next_txid.fetch_add(1, Ordering::SeqCst);
        test_txid(100 + n as u8)
    }
}

#[async_trait]
impl BitcoinChain for MockBitcoin {
    async fn find_deposit(
        &self,
        address: &Address,
        expected_sats: u64,
        _min_confs: u32,
        deadline: Instant,
    ) -> Result<FundingOutpoint, ChainError> {
        loop {
            let found = self
                .deposits
                .lock()
                .unwrap()
                .get(&address.to_string())
                .copied();
            // strict equality, like the real adapter
            if let Some(outpoint) = found {
                if outpoint.value_sats == expected_sats {
                    return Ok(outpoint);
                }
            }
            if Instant::now() >= deadline {
                return Err(ChainError::DepositTimeout);
            }
            tokio::time::sleep(MOCK_POLL).await;
        }
    }

    async fn redeem_htlc(&self, request: RedeemRequest) -> Result<Txid, ChainError> {
        self.redeems.lock().unwrap().push(request);
        Ok(self.fresh_txid())
    }

    async fn send_to_address(
        &self,
        destination: &Address,
        amount_sats: u64,
    ) -> Result<Txid, ChainError> {
        self.sends
            .lock()
            .unwrap()
            .push((destination.to_string(), amount_sats));
        Ok(self.fresh_txid())
    }

    async fn wait_for_confirmations(
        &self,
        _txid: Txid,
        depth: u32,
        _deadline: Instant,
    ) -> Result<u32, ChainError> {
        Ok(depth)
    }

    async fn is_outpoint_unspent(&self, txid: Txid, vout: u32) -> Result<bool, ChainError> {
        Ok(!self.spent.lock().unwrap().contains(&(txid, vout)))
    }
}

#[derive(Debug, Clone)]
pub struct MockEscrowEntry {
    pub user: EvmAddress,
    pub amount: U256,
    pub timelock: u64,
    pub claimed: bool,
    pub refunded: bool,
}

/// Settlement contract double with the contract's own guard conditions.
#[derive(Default)]
pub struct MockEvm {
    escrows: Mutex<HashMap<[u8; 32], MockEscrowEntry>>,
    revealed: Mutex<HashMap<[u8; 32], ([u8; 32], u64)>>,
    block: AtomicU64,
    /// Remaining `create_escrow` calls to fail with a transient error.
    pub create_failures: AtomicU32,
}

impl MockEvm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escrow(&self, secret_hash: &[u8; 32]) -> Option<MockEscrowEntry> {
        self.escrows.lock().unwrap().get(secret_hash).cloned()
    }

    /// Simulates the user's claim with the checks the contract enforces:
    /// matching digest, live timelock, not already settled.
    pub fn user_claims(&self, secret_hash: [u8; 32], secret: [u8; 32]) -> Result<(), String> {
        let mut escrows = self.escrows.lock().unwrap();
        let entry = escrows
            .get_mut(&secret_hash)
            .ok_or("escrow does not exist")?;
        if sha256(&secret) != secret_hash {
            return Err("preimage does not match".to_string());
        }
        if unix_now() >= entry.timelock {
            return Err("timelock elapsed".to_string());
        }
        if entry.claimed || entry.refunded {
            return Err("already settled".to_string());
        }
        entry.claimed = true;
        let at_block = self.block.fetch_add(1, Ordering::SeqCst) + 1;
        self.revealed
            .lock()
            .unwrap()
            .insert(secret_hash, (secret, at_block));
        Ok(())
    }

    /// Writes a reveal without any contract checks, simulating a buggy or
    /// hostile escrow implementation.
    pub fn force_reveal(&self, secret_hash: [u8; 32], secret: [u8; 32]) {
        let at_block = self.block.fetch_add(1, Ordering::SeqCst) + 1;
        self.revealed
            .lock()
            .unwrap()
            .insert(secret_hash, (secret, at_block));
    }
}

#[async_trait]
impl EvmEscrow for MockEvm {
    async fn escrow_state(&self, secret_hash: [u8; 32]) -> Result<EscrowState, ChainError> {
        Ok(self
            .escrows
            .lock()
            .unwrap()
            .get(&secret_hash)
            .map(|e| EscrowState {
                exists: true,
                claimed: e.claimed,
                refunded: e.refunded,
            })
            .unwrap_or_default())
    }

    async fn current_block(&self) -> Result<u64, ChainError> {
        Ok(self.block.load(Ordering::SeqCst))
    }

    async fn create_escrow(
        &self,
        secret_hash: [u8; 32],
        user: EvmAddress,
        _token: EvmAddress,
        amount: U256,
        timelock: u64,
    ) -> Result<B256, ChainError> {
        if self
            .create_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(ChainError::RpcUnavailable("injected failure".to_string()));
        }

        let mut escrows = self.escrows.lock().unwrap();
        if escrows.contains_key(&secret_hash) {
            return Err(ChainError::Unrecoverable("escrow already exists".to_string()));
        }
        escrows.insert(
            secret_hash,
            MockEscrowEntry {
                user,
                amount,
                timelock,
                claimed: false,
                refunded: false,
            },
        );
        self.block.fetch_add(1, Ordering::SeqCst);
        Ok(B256::from(secret_hash))
    }

    async fn claim_escrow(
        &self,
        secret_hash: [u8; 32],
        secret: [u8; 32],
    ) -> Result<B256, ChainError> {
        self.user_claims(secret_hash, secret)
            .map_err(|e| ChainError::Unrecoverable(format!("claim reverted: {e}")))?;
        Ok(B256::from(secret_hash))
    }

    async fn refund_escrow(&self, secret_hash: [u8; 32]) -> Result<B256, ChainError> {
        let mut escrows = self.escrows.lock().unwrap();
        let entry = escrows
            .get_mut(&secret_hash)
            .ok_or_else(|| ChainError::Unrecoverable("refund reverted: no escrow".to_string()))?;
        if unix_now() < entry.timelock {
            return Err(ChainError::Unrecoverable(
                "refund reverted: timelock live".to_string(),
            ));
        }
        if entry.claimed {
            return Err(ChainError::Unrecoverable(
                "refund reverted: already claimed".to_string(),
            ));
        }
        entry.refunded = true;
        self.block.fetch_add(1, Ordering::SeqCst);
        Ok(B256::from(secret_hash))
    }

    async fn wait_for_inclusion(
        &self,
        _tx_hash: B256,
        _deadline: Instant,
    ) -> Result<(), ChainError> {
        Ok(())
    }

    async fn wait_secret_revealed(
        &self,
        secret_hash: [u8; 32],
        from_block: u64,
        deadline: Instant,
    ) -> Result<[u8; 32], ChainError> {
        loop {
            let found = self.revealed.lock().unwrap().get(&secret_hash).copied();
            if let Some((secret, at_block)) = found {
                if at_block >= from_block {
                    return Ok(secret);
                }
            }
            if Instant::now() >= deadline {
                return Err(ChainError::ClaimTimeout);
            }
            tokio::time::sleep(MOCK_POLL).await;
        }
    }
}
