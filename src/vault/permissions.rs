//! Permission bits, composite roles and the packed `PermLevel`

use crate::errors::{GatekeepError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr};

/// Number of low bits of a `PermLevel` holding permissions
pub const PERMISSION_BITS: u32 = 11;

/// Highest encodable level
pub const MAX_LEVEL: u8 = 31;

/// A set of permission bits
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u16);

const NAMES: [(Permissions, &str); 11] = [
    (Permissions::SPEND, "SPEND"),
    (Permissions::UNFREEZE, "UNFREEZE"),
    (Permissions::CHANGE_PARTICIPANTS, "CHANGE_PARTICIPANTS"),
    (Permissions::CHANGE_OWNER, "CHANGE_OWNER"),
    (Permissions::CHANGE_BYPASS, "CHANGE_BYPASS"),
    (Permissions::CHANGE_SETTINGS, "CHANGE_SETTINGS"),
    (Permissions::SIGN_BOOSTS, "SIGN_BOOSTS"),
    (Permissions::EXECUTE_BOOSTS, "EXECUTE_BOOSTS"),
    (Permissions::FREEZE, "FREEZE"),
    (Permissions::CANCEL, "CANCEL"),
    (Permissions::APPROVE, "APPROVE"),
];

impl Permissions {
    pub const NONE: Self = Self(0);
    pub const SPEND: Self = Self(1 << 0);
    pub const UNFREEZE: Self = Self(1 << 1);
    pub const CHANGE_PARTICIPANTS: Self = Self(1 << 2);
    pub const CHANGE_OWNER: Self = Self(1 << 3);
    pub const CHANGE_BYPASS: Self = Self(1 << 4);
    pub const CHANGE_SETTINGS: Self = Self(1 << 5);
    pub const SIGN_BOOSTS: Self = Self(1 << 6);
    pub const EXECUTE_BOOSTS: Self = Self(1 << 7);
    pub const FREEZE: Self = Self(1 << 8);
    pub const CANCEL: Self = Self(1 << 9);
    pub const APPROVE: Self = Self(1 << 10);

    pub const ALL: Self = Self((1 << PERMISSION_BITS) - 1);

    pub const CHANGE_CONFIG: Self = Self(
        Self::UNFREEZE.0 | Self::CHANGE_PARTICIPANTS.0 | Self::CHANGE_BYPASS.0 | Self::CHANGE_SETTINGS.0,
    );
    pub const OWNER: Self = Self(
        Self::SPEND.0 | Self::CANCEL.0 | Self::FREEZE.0 | Self::CHANGE_CONFIG.0 | Self::SIGN_BOOSTS.0,
    );
    pub const ADMIN: Self =
        Self(Self::CHANGE_OWNER.0 | Self::EXECUTE_BOOSTS.0 | Self::APPROVE.0 | Self::FREEZE.0);
    pub const WATCHDOG: Self = Self(Self::CANCEL.0 | Self::FREEZE.0 | Self::APPROVE.0);

    pub const fn bits(self) -> u16 {
        self.0
    }

    /// Rejects bits outside the 11-bit permission mask
    pub fn from_bits(bits: u16) -> Option<Self> {
        if bits & !Self::ALL.0 != 0 {
            None
        } else {
            Some(Self(bits))
        }
    }

    pub const fn contains(self, required: Self) -> bool {
        self.0 & required.0 == required.0
    }

    /// The bits of `required` this set lacks
    pub const fn missing(self, required: Self) -> Self {
        Self(required.0 & !self.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse a single bit or role name (`OWNER`, `ADMIN`, `WATCHDOG`,
    /// `CHANGE_CONFIG`, `ALL`), case-insensitive
    pub fn from_name(name: &str) -> Result<Self> {
        let upper = name.trim().to_uppercase();
        let role = match upper.as_str() {
            "OWNER" => Some(Self::OWNER),
            "ADMIN" => Some(Self::ADMIN),
            "WATCHDOG" => Some(Self::WATCHDOG),
            "CHANGE_CONFIG" => Some(Self::CHANGE_CONFIG),
            "ALL" => Some(Self::ALL),
            _ => None,
        };
        role.or_else(|| NAMES.iter().find(|(_, n)| *n == upper).map(|(p, _)| *p))
            .ok_or_else(|| GatekeepError::InvalidConfig(format!("unknown permission: {}", name)))
    }

    /// Union of several names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        names
            .iter()
            .try_fold(Self::NONE, |acc, name| Ok(acc | Self::from_name(name.as_ref())?))
    }

    pub fn names(self) -> Vec<&'static str> {
        NAMES
            .iter()
            .filter(|(p, _)| self.contains(*p))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        f.write_str(&self.names().join("|"))
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Permissions({})", self)
    }
}

/// `(level << 11) | permissions`, the identity-scoping value of a participant
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermLevel(u16);

impl PermLevel {
    pub fn new(permissions: Permissions, level: u8) -> Result<Self> {
        if level > MAX_LEVEL {
            return Err(GatekeepError::InvalidConfig(format!(
                "level {} exceeds maximum {}",
                level, MAX_LEVEL
            )));
        }
        Ok(Self(((level as u16) << PERMISSION_BITS) | permissions.bits()))
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn level(self) -> u8 {
        (self.0 >> PERMISSION_BITS) as u8
    }

    pub const fn permissions(self) -> Permissions {
        Permissions(self.0 & Permissions::ALL.0)
    }

    pub fn to_be_bytes(self) -> [u8; 2] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for PermLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PermLevel(level={}, {})", self.level(), self.permissions())
    }
}
