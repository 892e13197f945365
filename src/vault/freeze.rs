//! Level freezes
//!
//! One freeze at a time: every level at or below `frozen_level` is blocked
//! until `frozen_until`. Expiry is evaluated lazily at each check.

use crate::errors::{FreezeRole, GatekeepError, Result};
use serde::{Deserialize, Serialize};

/// Longest freeze a single call may impose
pub const MAX_FREEZE_INTERVAL: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FreezeState {
    pub frozen_level: u8,
    pub frozen_until: u64,
}

impl FreezeState {
    pub fn is_active(&self, now: u64) -> bool {
        now < self.frozen_until
    }

    pub fn is_frozen(&self, level: u8, now: u64) -> bool {
        self.is_active(now) && level <= self.frozen_level
    }

    /// Fail with a freeze error naming `role` if `level` is frozen
    pub fn check(&self, level: u8, now: u64, role: FreezeRole) -> Result<()> {
        if self.is_frozen(level, now) {
            return Err(GatekeepError::Frozen {
                role,
                level,
                until: self.frozen_until,
            });
        }
        Ok(())
    }

    /// Validate and install a new freeze issued by a participant at
    /// `caller_level`.
    ///
    /// A participant may only freeze levels at or below its own, and an
    /// active freeze can be raised or extended but never weakened.
    pub fn freeze(&mut self, caller_level: u8, target_level: u8, interval: u64, now: u64) -> Result<()> {
        if target_level > caller_level {
            return Err(GatekeepError::InvalidFreeze(format!(
                "cannot freeze level {} above own level {}",
                target_level, caller_level
            )));
        }
        if interval == 0 || interval > MAX_FREEZE_INTERVAL {
            return Err(GatekeepError::InvalidFreeze(format!(
                "interval {}s outside 1..={}",
                interval, MAX_FREEZE_INTERVAL
            )));
        }

        let until = now.saturating_add(interval);
        if self.is_active(now) {
            if target_level < self.frozen_level {
                return Err(GatekeepError::InvalidFreeze(format!(
                    "level {} already frozen, cannot lower to {}",
                    self.frozen_level, target_level
                )));
            }
            if until < self.frozen_until {
                return Err(GatekeepError::InvalidFreeze(format!(
                    "already frozen until {}, cannot shorten to {}",
                    self.frozen_until, until
                )));
            }
        }

        self.frozen_level = target_level;
        self.frozen_until = until;
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = 86_400;

    #[test]
    fn test_gating_by_level() {
        let mut f = FreezeState::default();
        f.freeze(3, 2, DAY, 1_000).unwrap();

        assert!(f.is_frozen(0, 1_000));
        assert!(f.is_frozen(2, 1_000));
        assert!(!f.is_frozen(3, 1_000));
    }

    #[test]
    fn test_lazy_expiry() {
        let mut f = FreezeState::default();
        f.freeze(2, 2, DAY, 0).unwrap();

        assert!(f.check(1, DAY - 1, FreezeRole::Caller).is_err());
        assert!(f.check(1, DAY, FreezeRole::Caller).is_ok());
        assert!(f.check(1, DAY + 1, FreezeRole::Caller).is_ok());
    }

    #[test]
    fn test_cannot_freeze_above_self() {
        let mut f = FreezeState::default();
        assert!(matches!(
            f.freeze(1, 2, DAY, 0),
            Err(GatekeepError::InvalidFreeze(_))
        ));
    }

    #[test]
    fn test_interval_bounds() {
        let mut f = FreezeState::default();
        assert!(f.freeze(1, 1, 0, 0).is_err());
        assert!(f.freeze(1, 1, MAX_FREEZE_INTERVAL + 1, 0).is_err());
        assert!(f.freeze(1, 1, MAX_FREEZE_INTERVAL, 0).is_ok());
    }

    #[test]
    fn test_active_freeze_not_weakened() {
        let mut f = FreezeState::default();
        f.freeze(5, 3, 10 * DAY, 0).unwrap();

        assert!(f.freeze(5, 2, 20 * DAY, 0).is_err());
        assert!(f.freeze(5, 3, DAY, 0).is_err());
        f.freeze(5, 4, 20 * DAY, 0).unwrap();
        assert_eq!(f.frozen_level, 4);

        // Once expired anything goes
        f.freeze(5, 1, DAY, 21 * DAY).unwrap();
        assert_eq!(f.frozen_level, 1);
    }
}
