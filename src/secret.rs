use anyhow::{Context as _, Result};
use rand::RngCore as _;
use rand::rngs::OsRng;
use sha2::{Digest as _, Sha256};

pub const SECRET_LEN: usize = 32;

/// A 32-byte swap preimage.
///
/// The buffer is zeroed on drop and never printed. The only permitted egress
/// of the raw bytes is the preimage push in the Bitcoin claim-branch
/// scriptSig, which happens after the user has already revealed the value on
/// the EVM chain.
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
    /// Draws a fresh preimage from the OS RNG and returns it with its
    /// SHA-256 digest. Fails only if the system RNG does, which is fatal to
    /// the caller.
    pub fn generate() -> Result<(Self, [u8; 32])> {
        let mut buf = [0u8; SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut buf)
            .context("read system entropy source")?;
        let hash = sha256(&buf);
        Ok((Self(buf), hash))
    }

    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    pub fn preimage(&self) -> &[u8; SECRET_LEN] {
        &self.0
    }
}

impl Clone for Secret {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Secret {}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        for byte in self.0.iter_mut() {
            // volatile so the wipe survives optimization
            unsafe { std::ptr::write_volatile(byte, 0) };
        }
    }
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
