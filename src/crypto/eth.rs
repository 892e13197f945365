//! secp256k1 / keccak utilities
//!
//! Provides:
//! - 20-byte addresses and 32-byte hashes with checksummed hex encoding
//! - Message signing (EIP-191) used for booster signatures
//! - Signer recovery from recoverable signatures

use crate::errors::{GatekeepError, Result};
use crate::security::SecureBytes;
use k256::{
    ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey},
    SecretKey,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// A 20-byte account or participant address
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub const fn zero() -> Self {
        Self([0u8; 20])
    }

    /// Address derived from the low byte, handy for fixtures
    pub const fn repeat_byte(b: u8) -> Self {
        Self([b; 20])
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Derive the address of a public key
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(false);
        // Skip the 0x04 prefix and hash the remaining 64 bytes
        let hash = Keccak256::digest(&point.as_bytes()[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        Self(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&checksum_address(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self> {
        parse_address(s).map(Address)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A 32-byte keccak digest (operation ids, participant hashes)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First four bytes as hex, for log lines and cancellation references
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32(0x{})", self.short())
    }
}

impl FromStr for Hash32 {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 64 {
            return Err(GatekeepError::InvalidFormat(
                "Hash must be 64 hex chars".to_string(),
            ));
        }
        let bytes = hex::decode(s)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash32(out))
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// secp256k1 key pair for a signing participant
pub struct EthKeyPair {
    signing_key: SigningKey,
}

impl EthKeyPair {
    /// Create a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut rand::thread_rng()),
        }
    }

    /// Create from raw private key bytes (32 bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(GatekeepError::InvalidFormat(format!(
                "Expected 32 bytes, got {}",
                bytes.len()
            )));
        }

        let secret_key = SecretKey::from_slice(bytes)
            .map_err(|e| GatekeepError::InvalidFormat(e.to_string()))?;

        Ok(Self {
            signing_key: SigningKey::from(secret_key),
        })
    }

    pub fn address(&self) -> Address {
        Address::from_verifying_key(self.signing_key.verifying_key())
    }

    /// Sign a 32-byte prehash
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<EthSignature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .map_err(|e| GatekeepError::InvalidBoostSignature(e.to_string()))?;

        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);

        Ok(EthSignature {
            r,
            s,
            v: recovery_id.to_byte(),
        })
    }

    /// Sign a message with EIP-191 personal sign
    pub fn sign_message(&self, message: &[u8]) -> Result<EthSignature> {
        self.sign_hash(&hash_message(message))
    }

    /// Export the private key bytes
    pub fn private_key_bytes(&self) -> SecureBytes {
        SecureBytes::new(self.signing_key.to_bytes().to_vec())
    }
}

/// Recoverable signature (r, s, v)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct EthSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub v: u8,
}

impl EthSignature {
    /// r || s || v, 65 bytes
    pub fn to_bytes(&self) -> [u8; 65] {
        let mut sig = [0u8; 65];
        sig[0..32].copy_from_slice(&self.r);
        sig[32..64].copy_from_slice(&self.s);
        sig[64] = self.v;
        sig
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 65 {
            return Err(GatekeepError::InvalidBoostSignature(format!(
                "Expected 65 bytes, got {}",
                bytes.len()
            )));
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[0..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self { r, s, v: bytes[64] })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }
}

impl fmt::Debug for EthSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EthSignature(0x{})", self.to_hex())
    }
}

impl Serialize for EthSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", self.to_hex()))
    }
}

impl<'de> Deserialize<'de> for EthSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        EthSignature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

/// Recover the signer of an EIP-191 message
pub fn recover_message_signer(message: &[u8], signature: &EthSignature) -> Result<Address> {
    recover_hash_signer(&hash_message(message), signature)
}

/// Recover the signer of a 32-byte prehash
pub fn recover_hash_signer(hash: &[u8; 32], signature: &EthSignature) -> Result<Address> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);

    let sig = Signature::from_slice(&rs)
        .map_err(|e| GatekeepError::InvalidBoostSignature(e.to_string()))?;

    // Accept both raw (0/1) and legacy (27/28) recovery bytes
    let v = if signature.v >= 27 {
        signature.v - 27
    } else {
        signature.v
    };
    let recovery_id = RecoveryId::from_byte(v)
        .ok_or_else(|| GatekeepError::InvalidBoostSignature(format!("bad recovery id {}", v)))?;

    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .map_err(|e| GatekeepError::InvalidBoostSignature(e.to_string()))?;

    Ok(Address::from_verifying_key(&key))
}

/// Hash a message according to EIP-191 (personal sign)
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Compute keccak256 hash
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

/// Convert an address to checksummed format (EIP-55)
pub fn checksum_address(address: &[u8; 20]) -> String {
    let addr_hex = hex::encode(address);
    let hash = hex::encode(Keccak256::digest(addr_hex.as_bytes()));

    let mut result = String::with_capacity(42);
    result.push_str("0x");

    for (c, h) in addr_hex.chars().zip(hash.chars()) {
        if c.is_ascii_alphabetic() && h >= '8' {
            result.push(c.to_ascii_uppercase());
        } else {
            result.push(c);
        }
    }

    result
}

/// Parse a hex address string to bytes
pub fn parse_address(addr: &str) -> Result<[u8; 20]> {
    let addr = addr.strip_prefix("0x").unwrap_or(addr);

    if addr.len() != 40 {
        return Err(GatekeepError::InvalidFormat(
            "Address must be 40 hex chars".to_string(),
        ));
    }

    let bytes = hex::decode(addr)?;
    let mut result = [0u8; 20];
    result.copy_from_slice(&bytes);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_checksum() {
        // Test vector from EIP-55
        let addr = hex::decode("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let mut address = [0u8; 20];
        address.copy_from_slice(&addr);

        let checksummed = checksum_address(&address);
        assert_eq!(checksummed, "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn test_address_parse_display() {
        let addr: Address = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed".parse().unwrap();
        assert_eq!(addr.to_string(), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert!("0x1234".parse::<Address>().is_err());
    }

    #[test]
    fn test_sign_and_recover() {
        let keypair = EthKeyPair::generate();
        let message = b"boost me";

        let sig = keypair.sign_message(message).unwrap();
        assert!(sig.v <= 1);

        let recovered = recover_message_signer(message, &sig).unwrap();
        assert_eq!(recovered, keypair.address());

        let other = recover_message_signer(b"different", &sig).unwrap();
        assert_ne!(other, keypair.address());
    }

    #[test]
    fn test_signature_serde() {
        let keypair = EthKeyPair::from_bytes(&[7u8; 32]).unwrap();
        let sig = keypair.sign_message(b"x").unwrap();
        let json = serde_json::to_string(&sig).unwrap();
        let back: EthSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn test_from_bytes() {
        let private_key =
            hex::decode("0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef")
                .unwrap();

        let keypair = EthKeyPair::from_bytes(&private_key).unwrap();
        assert_eq!(keypair.address().to_string().len(), 42);
        assert!(EthKeyPair::from_bytes(&[1u8; 31]).is_err());
        assert_eq!(keypair.private_key_bytes().expose(), private_key.as_slice());
    }
}
