//! Call data helpers: method selectors and token-transfer decoding

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Leading four bytes of call data
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector(pub [u8; 4]);

/// `transfer(address,uint256)`
pub const TRANSFER_SELECTOR: Selector = Selector([0xa9, 0x05, 0x9c, 0xbb]);

/// `transferFrom(address,address,uint256)`
pub const TRANSFER_FROM_SELECTOR: Selector = Selector([0x23, 0xb8, 0x72, 0xdd]);

/// Selectors recognized as token transfers
pub const TOKEN_TRANSFER_SELECTORS: [Selector; 2] = [TRANSFER_SELECTOR, TRANSFER_FROM_SELECTOR];

impl Selector {
    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    /// Selector of `data`, if it has one
    pub fn of(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&data[..4]);
        Some(Self(sel))
    }

    pub fn is_token_transfer(&self) -> bool {
        TOKEN_TRANSFER_SELECTORS.contains(self)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Selector({})", self)
    }
}

impl FromStr for Selector {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.len() != 8 {
            return Err(GatekeepError::InvalidFormat(
                "Selector must be 8 hex chars".to_string(),
            ));
        }
        let bytes = hex::decode(s)?;
        let mut sel = [0u8; 4];
        sel.copy_from_slice(&bytes);
        Ok(Self(sel))
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A decoded token transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTransfer {
    pub from: Option<Address>,
    pub to: Address,
    pub amount: u128,
}

fn word_address(word: &[u8]) -> Option<Address> {
    if word[..12].iter().any(|b| *b != 0) {
        return None;
    }
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&word[12..32]);
    Some(Address(addr))
}

fn word_amount(word: &[u8]) -> Option<u128> {
    // Amounts beyond u128 are not representable here
    if word[..16].iter().any(|b| *b != 0) {
        return None;
    }
    let mut amount = [0u8; 16];
    amount.copy_from_slice(&word[16..32]);
    Some(u128::from_be_bytes(amount))
}

/// Decode `transfer` / `transferFrom` call data
pub fn decode_token_transfer(data: &[u8]) -> Option<TokenTransfer> {
    let selector = Selector::of(data)?;
    let args = &data[4..];
    if selector == TRANSFER_SELECTOR && args.len() == 64 {
        return Some(TokenTransfer {
            from: None,
            to: word_address(&args[..32])?,
            amount: word_amount(&args[32..64])?,
        });
    }
    if selector == TRANSFER_FROM_SELECTOR && args.len() == 96 {
        return Some(TokenTransfer {
            from: Some(word_address(&args[..32])?),
            to: word_address(&args[32..64])?,
            amount: word_amount(&args[64..96])?,
        });
    }
    None
}

/// Encode `transfer(to, amount)` call data
pub fn encode_token_transfer(to: &Address, amount: u128) -> Vec<u8> {
    let mut data = Vec::with_capacity(68);
    data.extend_from_slice(TRANSFER_SELECTOR.as_bytes());
    data.extend_from_slice(&[0u8; 12]);
    data.extend_from_slice(to.as_bytes());
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&amount.to_be_bytes());
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_transfer() {
        let to = Address::repeat_byte(0x42);
        let data = encode_token_transfer(&to, 1_000);
        assert_eq!(Selector::of(&data), Some(TRANSFER_SELECTOR));

        let decoded = decode_token_transfer(&data).unwrap();
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.amount, 1_000);
        assert_eq!(decoded.from, None);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        assert!(decode_token_transfer(&[]).is_none());
        assert!(decode_token_transfer(&TRANSFER_SELECTOR.0).is_none());

        let mut dirty = encode_token_transfer(&Address::repeat_byte(1), 5);
        dirty[4] = 0xff; // garbage in the address padding
        assert!(decode_token_transfer(&dirty).is_none());
    }

    #[test]
    fn test_selector_parse() {
        let sel: Selector = "0xa9059cbb".parse().unwrap();
        assert_eq!(sel, TRANSFER_SELECTOR);
        assert!(sel.is_token_transfer());
        assert!("0xa9".parse::<Selector>().is_err());
    }
}
