//! Zeroizing containers for secret material
//!
//! The guardian's challenge seed and exported private keys live in these
//! wrappers so their memory is cleared on drop.

use crate::errors::{GatekeepError, Result};
use secrecy::{ExposeSecret, Secret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// A wrapper for sensitive byte arrays that automatically zeros memory on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct SecureBytes {
    inner: Vec<u8>,
}

impl SecureBytes {
    pub fn new(data: Vec<u8>) -> Self {
        Self { inner: data }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn expose(&self) -> &[u8] {
        &self.inner
    }

    pub fn zeroize_now(&mut self) {
        self.inner.zeroize();
    }
}

impl From<Vec<u8>> for SecureBytes {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

/// Secret seed from which verification codes are derived
pub struct ChallengeSeed(Secret<Vec<u8>>);

/// Seeds shorter than this are rejected
pub const MIN_SEED_LEN: usize = 16;

impl ChallengeSeed {
    pub fn new(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < MIN_SEED_LEN {
            return Err(GatekeepError::ConfigError(format!(
                "challenge seed must be at least {} bytes, got {}",
                MIN_SEED_LEN,
                bytes.len()
            )));
        }
        Ok(Self(Secret::new(bytes)))
    }

    /// Parse a hex-encoded seed; the intermediate buffer is zeroized
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let trimmed = hex_seed.trim();
        let mut bytes = hex::decode(trimmed.strip_prefix("0x").unwrap_or(trimmed))?;
        let seed = Self::new(bytes.clone());
        bytes.zeroize();
        seed
    }

    /// Random seed, used when none is configured
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(Secret::new(bytes))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ChallengeSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChallengeSeed([REDACTED])")
    }
}
