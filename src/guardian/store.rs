//! Operations the guardian is tracking
//!
//! Owned by one guardian instance. Items are keyed by `(account, op_id)`;
//! an item taken for submission is absent from the store until it is
//! restored, so no other tick can submit it meanwhile.

use crate::crypto::Address;
use crate::vault::{BypassRef, ConfigAction, ConfigRef, OpId, ParticipantHash};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackedOp {
    Config(ConfigRef),
    BypassCall(BypassRef),
}

impl TrackedOp {
    /// The participant an ADD_OPERATOR_NOW request would add
    pub fn add_operator_now(&self) -> Option<ParticipantHash> {
        match self {
            TrackedOp::Config(op) if op.actions.len() == 1 => match op.actions[0] {
                ConfigAction::AddOperatorNow { participant } => Some(participant),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedItem {
    pub account: Address,
    pub op_id: OpId,
    pub due_time: u64,
    pub op: TrackedOp,
    /// When the cancel challenge went out, if it has
    pub challenged_at: Option<u64>,
}

pub type ItemKey = (Address, OpId);

#[derive(Debug, Default)]
pub struct PendingStore {
    items: HashMap<ItemKey, TrackedItem>,
    positions: HashMap<Address, u64>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every item and scan position
    pub fn reset(&mut self) {
        self.items.clear();
        self.positions.clear();
    }

    pub fn last_position(&self, account: &Address) -> u64 {
        self.positions.get(account).copied().unwrap_or(0)
    }

    /// Record that events up to `position` have been classified. Returns
    /// false, changing nothing, if the store is already past it.
    pub fn advance(&mut self, account: Address, position: u64) -> bool {
        let last = self.positions.entry(account).or_insert(0);
        if position <= *last {
            return false;
        }
        *last = position;
        true
    }

    pub fn track(&mut self, item: TrackedItem) {
        self.items.insert((item.account, item.op_id), item);
    }

    /// Drop an item resolved elsewhere
    pub fn resolve(&mut self, account: Address, op_id: OpId) -> bool {
        self.items.remove(&(account, op_id)).is_some()
    }

    /// Remove an item for submission
    pub fn take(&mut self, key: &ItemKey) -> Option<TrackedItem> {
        self.items.remove(key)
    }

    /// Put back an item whose submission failed
    pub fn restore(&mut self, item: TrackedItem) {
        self.items.entry((item.account, item.op_id)).or_insert(item);
    }

    pub fn get(&self, key: &ItemKey) -> Option<&TrackedItem> {
        self.items.get(key)
    }

    /// Mark a challenge as issued at `now`. True only for the first caller.
    pub fn mark_challenge_sent(&mut self, key: &ItemKey, now: u64) -> bool {
        match self.items.get_mut(key) {
            Some(item) if item.challenged_at.is_none() => {
                item.challenged_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Keys in a stable order
    pub fn keys(&self) -> Vec<ItemKey> {
        let mut keys: Vec<_> = self.items.keys().copied().collect();
        keys.sort();
        keys
    }

    /// Challenged items of one account with their issue times
    pub fn challenged(&self, account: &Address) -> Vec<(ItemKey, u64)> {
        let mut keys: Vec<_> = self
            .items
            .values()
            .filter(|i| i.account == *account)
            .filter_map(|i| i.challenged_at.map(|at| ((i.account, i.op_id), at)))
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
