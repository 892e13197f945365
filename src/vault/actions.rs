//! Config actions carried by a Config operation

use crate::crypto::{keccak256, Address};
use crate::policy::PolicyId;
use crate::vault::calldata::Selector;
use crate::vault::participant::ParticipantHash;
use crate::vault::permissions::Permissions;
use serde::{Deserialize, Serialize};

/// One step of a Config batch. Batches apply in order, all or nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ConfigAction {
    AddParticipant {
        participant: ParticipantHash,
    },
    RemoveParticipant {
        participant: ParticipantHash,
    },
    /// Swap one participant for another in a single step
    ChangeOwner {
        old: ParticipantHash,
        new: ParticipantHash,
    },
    Unfreeze,
    SetAcceleratedCalls {
        enabled: bool,
    },
    SetAddOperatorNow {
        enabled: bool,
    },
    /// `policy: None` removes the binding
    SetTargetPolicy {
        target: Address,
        policy: Option<PolicyId>,
    },
    SetMethodPolicy {
        selector: Selector,
        policy: Option<PolicyId>,
    },
    /// Scheduled without delay, applied only through `approve_add_operator_now`
    AddOperatorNow {
        participant: ParticipantHash,
    },
}

impl ConfigAction {
    /// Bits the scheduler (plus booster) must hold to schedule this action
    pub fn required_permissions(&self) -> Permissions {
        match self {
            ConfigAction::AddParticipant { .. }
            | ConfigAction::RemoveParticipant { .. }
            | ConfigAction::AddOperatorNow { .. } => Permissions::CHANGE_PARTICIPANTS,
            ConfigAction::ChangeOwner { .. } => Permissions::CHANGE_OWNER,
            ConfigAction::Unfreeze => Permissions::UNFREEZE,
            ConfigAction::SetAcceleratedCalls { .. } | ConfigAction::SetAddOperatorNow { .. } => {
                Permissions::CHANGE_SETTINGS
            }
            ConfigAction::SetTargetPolicy { .. } | ConfigAction::SetMethodPolicy { .. } => {
                Permissions::CHANGE_BYPASS
            }
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ConfigAction::AddParticipant { .. } => 0x01,
            ConfigAction::RemoveParticipant { .. } => 0x02,
            ConfigAction::ChangeOwner { .. } => 0x03,
            ConfigAction::Unfreeze => 0x04,
            ConfigAction::SetAcceleratedCalls { .. } => 0x05,
            ConfigAction::SetAddOperatorNow { .. } => 0x06,
            ConfigAction::SetTargetPolicy { .. } => 0x07,
            ConfigAction::SetMethodPolicy { .. } => 0x08,
            ConfigAction::AddOperatorNow { .. } => 0x09,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfigAction::AddParticipant { .. } => "ADD_PARTICIPANT",
            ConfigAction::RemoveParticipant { .. } => "REMOVE_PARTICIPANT",
            ConfigAction::ChangeOwner { .. } => "CHANGE_OWNER",
            ConfigAction::Unfreeze => "UNFREEZE",
            ConfigAction::SetAcceleratedCalls { .. } => "SET_ACCELERATED_CALLS",
            ConfigAction::SetAddOperatorNow { .. } => "SET_ADD_OPERATOR_NOW",
            ConfigAction::SetTargetPolicy { .. } => "SET_TARGET_POLICY",
            ConfigAction::SetMethodPolicy { .. } => "SET_METHOD_POLICY",
            ConfigAction::AddOperatorNow { .. } => "ADD_OPERATOR_NOW",
        }
    }

    /// Canonical bytes fed into operation and boost hashes
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.code());
        match self {
            ConfigAction::AddParticipant { participant }
            | ConfigAction::RemoveParticipant { participant }
            | ConfigAction::AddOperatorNow { participant } => {
                buf.extend_from_slice(participant.as_bytes());
            }
            ConfigAction::ChangeOwner { old, new } => {
                buf.extend_from_slice(old.as_bytes());
                buf.extend_from_slice(new.as_bytes());
            }
            ConfigAction::Unfreeze => {}
            ConfigAction::SetAcceleratedCalls { enabled }
            | ConfigAction::SetAddOperatorNow { enabled } => {
                buf.push(*enabled as u8);
            }
            ConfigAction::SetTargetPolicy { target, policy } => {
                buf.extend_from_slice(target.as_bytes());
                buf.extend_from_slice(&policy_digest(policy.as_ref()));
            }
            ConfigAction::SetMethodPolicy { selector, policy } => {
                buf.extend_from_slice(selector.as_bytes());
                buf.extend_from_slice(&policy_digest(policy.as_ref()));
            }
        }
    }

    pub fn is_unfreeze(&self) -> bool {
        matches!(self, ConfigAction::Unfreeze)
    }
}

fn policy_digest(policy: Option<&PolicyId>) -> [u8; 32] {
    match policy {
        Some(id) => keccak256(id.as_str().as_bytes()),
        None => [0u8; 32],
    }
}

/// Union of the bits needed by every action in a batch
pub fn required_permissions(actions: &[ConfigAction]) -> Permissions {
    actions
        .iter()
        .fold(Permissions::NONE, |acc, a| acc | a.required_permissions())
}

/// Canonical encoding of a whole batch, length-prefixed
pub fn encode_actions(actions: &[ConfigAction]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + actions.len() * 65);
    buf.extend_from_slice(&(actions.len() as u32).to_be_bytes());
    for action in actions {
        action.encode_into(&mut buf);
    }
    buf
}
