//! Participants and their identity hashes
//!
//! The vault never stores a participant directly, only
//! `keccak256(address || permLevel)`. Changing the address, the level or any
//! permission bit yields a different hash, so the participant is unknown
//! until re-added.

use crate::crypto::{keccak256, Address, Hash32};
use crate::errors::Result;
use crate::vault::permissions::{PermLevel, Permissions};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity hash of a participant
pub type ParticipantHash = Hash32;

/// An `(address, permLevel)` pair
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Participant {
    pub address: Address,
    pub perm_level: PermLevel,
}

impl Participant {
    pub fn new(address: Address, permissions: Permissions, level: u8) -> Result<Self> {
        Ok(Self {
            address,
            perm_level: PermLevel::new(permissions, level)?,
        })
    }

    pub fn with_perm_level(address: Address, perm_level: PermLevel) -> Self {
        Self {
            address,
            perm_level,
        }
    }

    pub fn level(&self) -> u8 {
        self.perm_level.level()
    }

    pub fn permissions(&self) -> Permissions {
        self.perm_level.permissions()
    }

    pub fn hash(&self) -> ParticipantHash {
        participant_hash(&self.address, self.perm_level)
    }
}

impl fmt::Debug for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Participant({}, {:?})", self.address, self.perm_level)
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.perm_level.level())
    }
}

/// `keccak256(address || permLevel_be)`
pub fn participant_hash(address: &Address, perm_level: PermLevel) -> ParticipantHash {
    let mut buf = [0u8; 22];
    buf[..20].copy_from_slice(address.as_bytes());
    buf[20..].copy_from_slice(&perm_level.to_be_bytes());
    Hash32(keccak256(&buf))
}
