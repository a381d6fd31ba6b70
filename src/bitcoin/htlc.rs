use anyhow::{Context as _, Result};
use bitcoin::absolute::LockTime;
use bitcoin::blockdata::opcodes;
use bitcoin::blockdata::script::{Builder, Instruction};
use bitcoin::hashes::Hash as _;
use bitcoin::script::PushBytesBuf;
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::Version;
use bitcoin::{
    Address, Amount, Network, OutPoint, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut,
    Witness,
};

use super::{RedeemMode, RedeemRequest};
use crate::error::ChainError;

/// The four values an HTLC redeem script commits to.
///
/// ```text
/// OP_IF
///     OP_SHA256 <secret_hash> OP_EQUALVERIFY <claim_pubkey>
/// OP_ELSE
///     <locktime> OP_CHECKLOCKTIMEVERIFY OP_DROP <refund_pubkey>
/// OP_ENDIF
/// OP_CHECKSIG
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtlcSpec {
    pub secret_hash: [u8; 32],
    pub claim_pubkey: PublicKey,
    pub refund_pubkey: PublicKey,
    /// Absolute locktime in unix seconds, consumed by CLTV.
    pub locktime: u64,
}

impl HtlcSpec {
    pub fn redeem_script(&self) -> ScriptBuf {
        Builder::new()
            .push_opcode(opcodes::all::OP_IF)
            .push_opcode(opcodes::all::OP_SHA256)
            .push_slice(self.secret_hash)
            .push_opcode(opcodes::all::OP_EQUALVERIFY)
            .push_slice(self.claim_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ELSE)
            .push_int(self.locktime as i64)
            .push_opcode(opcodes::all::OP_CLTV)
            .push_opcode(opcodes::all::OP_DROP)
            .push_slice(self.refund_pubkey.serialize())
            .push_opcode(opcodes::all::OP_ENDIF)
            .push_opcode(opcodes::all::OP_CHECKSIG)
            .into_script()
    }

    /// The P2SH address the user funds: `Base58Check(version || HASH160(script))`.
    pub fn p2sh_address(&self, network: Network) -> Result<Address> {
        Address::p2sh(&self.redeem_script(), network).context("redeem script exceeds p2sh limits")
    }

    /// Inverse of [`HtlcSpec::redeem_script`], recovering all four fields.
    pub fn parse_redeem_script(script: &Script) -> Result<Self> {
        fn next_instruction<'a>(
            iter: &mut impl Iterator<
                Item = std::result::Result<Instruction<'a>, bitcoin::script::Error>,
            >,
        ) -> Result<Instruction<'a>> {
            iter.next()
                .transpose()
                .map_err(|e| anyhow::anyhow!("decode redeem script instruction: {e}"))?
                .context("unexpected end of redeem script")
        }

        fn expect_op(actual: Instruction<'_>, expected: bitcoin::Opcode) -> Result<()> {
            match actual {
                Instruction::Op(op) if op == expected => Ok(()),
                other => {
                    anyhow::bail!("unexpected instruction: expected {expected:?}, got {other:?}")
                }
            }
        }

        fn expect_push<const N: usize>(actual: Instruction<'_>) -> Result<[u8; N]> {
            match actual {
                Instruction::PushBytes(bytes) if bytes.len() == N => {
                    let mut out = [0u8; N];
                    out.copy_from_slice(bytes.as_bytes());
                    Ok(out)
                }
                other => {
                    anyhow::bail!("unexpected instruction: expected push of {N} bytes, got {other:?}")
                }
            }
        }

        fn parse_script_num(actual: Instruction<'_>) -> Result<i64> {
            match actual {
                Instruction::PushBytes(bytes) => decode_script_num(bytes.as_bytes()),
                Instruction::Op(op) => {
                    let code = op.to_u8();
                    let one = opcodes::all::OP_PUSHNUM_1.to_u8();
                    let sixteen = opcodes::all::OP_PUSHNUM_16.to_u8();
                    if (one..=sixteen).contains(&code) {
                        return Ok(i64::from(code - one + 1));
                    }
                    anyhow::bail!("unexpected opcode where script number expected: {op:?}");
                }
            }
        }

        fn decode_script_num(bytes: &[u8]) -> Result<i64> {
            if bytes.is_empty() {
                return Ok(0);
            }
            anyhow::ensure!(bytes.len() <= 8, "script number too large: {} bytes", bytes.len());

            let mut magnitude = bytes.to_vec();
            let negative = magnitude.last().is_some_and(|b| (b & 0x80) != 0);
            if let Some(last) = magnitude.last_mut() {
                *last &= 0x7f;
            }

            let mut value: i64 = 0;
            for (i, b) in magnitude.iter().enumerate() {
                value |= (*b as i64) << (8 * i);
            }
            Ok(if negative { -value } else { value })
        }

        let mut iter = script.instructions_minimal();

        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_IF)?;
        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_SHA256)?;
        let secret_hash = expect_push::<32>(next_instruction(&mut iter)?)?;
        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_EQUALVERIFY)?;
        let claim_pubkey = PublicKey::from_slice(&expect_push::<33>(next_instruction(&mut iter)?)?)
            .context("parse claim pubkey")?;

        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_ELSE)?;
        let locktime = parse_script_num(next_instruction(&mut iter)?)?;
        anyhow::ensure!(locktime >= 0, "negative locktime in redeem script");
        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_CLTV)?;
        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_DROP)?;
        let refund_pubkey = PublicKey::from_slice(&expect_push::<33>(next_instruction(&mut iter)?)?)
            .context("parse refund pubkey")?;

        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_ENDIF)?;
        expect_op(next_instruction(&mut iter)?, opcodes::all::OP_CHECKSIG)?;
        anyhow::ensure!(
            iter.next().is_none(),
            "unexpected trailing instructions in redeem script"
        );

        Ok(Self {
            secret_hash,
            claim_pubkey,
            refund_pubkey,
            locktime: locktime as u64,
        })
    }
}

/// Claim-branch scriptSig: `<sig> <preimage> OP_TRUE <script>`.
pub fn claim_script_sig(
    signature: &[u8],
    preimage: &[u8; 32],
    redeem_script: &Script,
) -> Result<ScriptBuf, ChainError> {
    Ok(Builder::new()
        .push_slice(push_bytes(signature)?)
        .push_slice(*preimage)
        .push_opcode(opcodes::OP_TRUE)
        .push_slice(push_bytes(redeem_script.as_bytes())?)
        .into_script())
}

/// Refund-branch scriptSig: `<sig> OP_FALSE <script>`.
pub fn refund_script_sig(
    signature: &[u8],
    redeem_script: &Script,
) -> Result<ScriptBuf, ChainError> {
    Ok(Builder::new()
        .push_slice(push_bytes(signature)?)
        .push_opcode(opcodes::OP_FALSE)
        .push_slice(push_bytes(redeem_script.as_bytes())?)
        .into_script())
}

fn push_bytes(data: &[u8]) -> Result<PushBytesBuf, ChainError> {
    PushBytesBuf::try_from(data.to_vec())
        .map_err(|e| ChainError::Unrecoverable(format!("push exceeds script element size: {e}")))
}

/// Builds and signs the 1-in/1-out redemption of an HTLC output.
///
/// Refund spends set `nLockTime` to the committed locktime and zero the
/// input sequence so CLTV evaluates; claim spends leave both untouched.
pub fn build_redeem_tx(request: &RedeemRequest, fee_sats: u64) -> Result<Transaction, ChainError> {
    let funding = request.funding;
    if funding.value_sats <= fee_sats {
        return Err(ChainError::InsufficientFunds {
            funding_sats: funding.value_sats,
            fee_sats,
        });
    }

    let (lock_time, sequence) = match request.mode {
        RedeemMode::Claim { .. } => (LockTime::ZERO, Sequence::MAX),
        RedeemMode::Refund => {
            let n = u32::try_from(request.locktime).map_err(|_| {
                ChainError::Unrecoverable(format!("locktime out of range: {}", request.locktime))
            })?;
            (LockTime::from_consensus(n), Sequence::ZERO)
        }
    };

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time,
        input: vec![TxIn {
            previous_output: OutPoint::new(funding.txid, funding.vout),
            script_sig: ScriptBuf::new(),
            sequence,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(funding.value_sats - fee_sats),
            script_pubkey: request.destination.script_pubkey(),
        }],
    };

    let sighash_type = EcdsaSighashType::All;
    let sighash = SighashCache::new(&tx)
        .legacy_signature_hash(0, &request.redeem_script, sighash_type.to_u32())
        .map_err(|e| ChainError::Unrecoverable(format!("compute sighash: {e}")))?;

    let secp = Secp256k1::new();
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = secp.sign_ecdsa(&message, &request.key);
    let mut signature_bytes = signature.serialize_der().to_vec();
    signature_bytes.push(sighash_type.to_u32() as u8);

    tx.input[0].script_sig = match &request.mode {
        RedeemMode::Claim { preimage } => {
            claim_script_sig(&signature_bytes, preimage, &request.redeem_script)?
        }
        RedeemMode::Refund => refund_script_sig(&signature_bytes, &request.redeem_script)?,
    };

    Ok(tx)
}
