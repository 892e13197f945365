//! Events emitted by the vault
//!
//! The event log is the only read surface of an account. Every transition
//! appends one or more events; the projection rebuilds state from them.

use crate::crypto::Address;
use crate::policy::PolicyId;
use crate::vault::actions::ConfigAction;
use crate::vault::calldata::Selector;
use crate::vault::participant::{Participant, ParticipantHash};
use crate::vault::pending::{BypassCall, OpId};
use crate::vault::treasury::CallEffect;
use serde::{Deserialize, Serialize};

/// How an applied bypass call got past its delay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    AfterDelay,
    WithoutDelay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VaultEvent {
    ConfigInitialized {
        creator: Address,
        participants: Vec<ParticipantHash>,
        delays: Vec<u64>,
        required_approvals: Vec<u32>,
        allow_accelerated_calls: bool,
        allow_add_operator_now: bool,
        target_policies: Vec<(Address, PolicyId)>,
        method_policies: Vec<(Selector, PolicyId)>,
    },
    ConfigPending {
        op_id: OpId,
        actions: Vec<ConfigAction>,
        state_id: u64,
        scheduler: Participant,
        booster: Option<Participant>,
        due_time: u64,
    },
    ConfigApproved {
        op_id: OpId,
        approver: Participant,
        approvals: usize,
    },
    ConfigApplied {
        op_id: OpId,
        state_nonce: u64,
    },
    ConfigCancelled {
        op_id: OpId,
        canceller: Participant,
    },
    BypassCallPending {
        op_id: OpId,
        call: BypassCall,
        state_id: u64,
        scheduler: Participant,
        due_time: u64,
    },
    BypassCallApproved {
        op_id: OpId,
        approver: Participant,
        approvals: usize,
    },
    BypassCallApplied {
        op_id: OpId,
        outcome: ApplyOutcome,
        effect: CallEffect,
    },
    BypassCallCancelled {
        op_id: OpId,
        canceller: Participant,
    },
    /// A call that ran immediately without ever being pending
    BypassCallExecuted {
        caller: Participant,
        call: BypassCall,
        effect: CallEffect,
    },
    LevelFrozen {
        level: u8,
        until: u64,
        by: Participant,
    },
    /// Freeze cleared by an applied UNFREEZE action
    Unfrozen {
        op_id: OpId,
    },
}

impl VaultEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::ConfigInitialized { .. } => "ConfigInitialized",
            VaultEvent::ConfigPending { .. } => "ConfigPending",
            VaultEvent::ConfigApproved { .. } => "ConfigApproved",
            VaultEvent::ConfigApplied { .. } => "ConfigApplied",
            VaultEvent::ConfigCancelled { .. } => "ConfigCancelled",
            VaultEvent::BypassCallPending { .. } => "BypassCallPending",
            VaultEvent::BypassCallApproved { .. } => "BypassCallApproved",
            VaultEvent::BypassCallApplied { .. } => "BypassCallApplied",
            VaultEvent::BypassCallCancelled { .. } => "BypassCallCancelled",
            VaultEvent::BypassCallExecuted { .. } => "BypassCallExecuted",
            VaultEvent::LevelFrozen { .. } => "LevelFrozen",
            VaultEvent::Unfrozen { .. } => "Unfrozen",
        }
    }

    /// The pending operation this event concerns, if any
    pub fn op_id(&self) -> Option<OpId> {
        match self {
            VaultEvent::ConfigPending { op_id, .. }
            | VaultEvent::ConfigApproved { op_id, .. }
            | VaultEvent::ConfigApplied { op_id, .. }
            | VaultEvent::ConfigCancelled { op_id, .. }
            | VaultEvent::BypassCallPending { op_id, .. }
            | VaultEvent::BypassCallApproved { op_id, .. }
            | VaultEvent::BypassCallApplied { op_id, .. }
            | VaultEvent::BypassCallCancelled { op_id, .. }
            | VaultEvent::Unfrozen { op_id } => Some(*op_id),
            VaultEvent::ConfigInitialized { .. }
            | VaultEvent::BypassCallExecuted { .. }
            | VaultEvent::LevelFrozen { .. } => None,
        }
    }

    /// Applied or cancelled: the operation no longer exists
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VaultEvent::ConfigApplied { .. }
                | VaultEvent::ConfigCancelled { .. }
                | VaultEvent::BypassCallApplied { .. }
                | VaultEvent::BypassCallCancelled { .. }
        )
    }
}
