//! Engine entry points as a closed command set
//!
//! Every state change reaches the vault as an `EngineCommand` submitted by
//! an address. The sender's `perm_level` is a claim; the vault checks it
//! against the stored participant hashes before doing anything else.

use crate::crypto::{Address, EthSignature};
use crate::policy::PolicyId;
use crate::vault::actions::ConfigAction;
use crate::vault::calldata::Selector;
use crate::vault::participant::{Participant, ParticipantHash};
use crate::vault::pending::{compute_op_id, BypassCall, OpId, OpPayload};
use crate::vault::permissions::PermLevel;
use crate::vault::treasury::CallEffect;
use serde::{Deserialize, Serialize};

/// One-time setup of an account, submitted by its creator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitialConfig {
    pub participants: Vec<Participant>,
    /// Delay in seconds, indexed by level
    pub delays: Vec<u64>,
    /// Approvals needed before apply, indexed by scheduler level
    pub required_approvals: Vec<u32>,
    #[serde(default)]
    pub allow_accelerated_calls: bool,
    #[serde(default)]
    pub allow_add_operator_now: bool,
    #[serde(default)]
    pub target_policies: Vec<(Address, PolicyId)>,
    #[serde(default)]
    pub method_policies: Vec<(Selector, PolicyId)>,
}

/// Fields a pending Config operation is identified by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRef {
    pub actions: Vec<ConfigAction>,
    pub state_id: u64,
    pub scheduler: Participant,
    pub booster: Option<Participant>,
}

impl ConfigRef {
    pub fn op_id(&self) -> OpId {
        compute_op_id(
            &OpPayload::Config {
                actions: self.actions.clone(),
            },
            self.state_id,
            &self.scheduler,
            self.booster.as_ref(),
        )
    }
}

/// Fields a pending bypass call is identified by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BypassRef {
    pub call: BypassCall,
    pub state_id: u64,
    pub scheduler: Participant,
}

impl BypassRef {
    pub fn op_id(&self) -> OpId {
        compute_op_id(
            &OpPayload::BypassCall {
                call: self.call.clone(),
            },
            self.state_id,
            &self.scheduler,
            None,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineCommand {
    InitialConfig(InitialConfig),
    ScheduleConfig {
        perm_level: PermLevel,
        actions: Vec<ConfigAction>,
        state_id: u64,
    },
    ScheduleBoostedConfig {
        perm_level: PermLevel,
        actions: Vec<ConfigAction>,
        state_id: u64,
        booster: Participant,
        signature: EthSignature,
    },
    ApproveConfig {
        perm_level: PermLevel,
        op: ConfigRef,
    },
    ApplyConfig {
        perm_level: PermLevel,
        op: ConfigRef,
    },
    CancelConfig {
        perm_level: PermLevel,
        op: ConfigRef,
    },
    ApproveAddOperatorNow {
        perm_level: PermLevel,
        op: ConfigRef,
    },
    ScheduleBypassCall {
        perm_level: PermLevel,
        call: BypassCall,
        state_id: u64,
    },
    ApproveBypassCall {
        perm_level: PermLevel,
        op: BypassRef,
    },
    ApplyBypassCall {
        perm_level: PermLevel,
        op: BypassRef,
    },
    CancelBypassCall {
        perm_level: PermLevel,
        op: BypassRef,
    },
    ExecuteBypassCall {
        perm_level: PermLevel,
        call: BypassCall,
    },
    Freeze {
        perm_level: PermLevel,
        level: u8,
        interval: u64,
    },
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            EngineCommand::InitialConfig(_) => "initial_config",
            EngineCommand::ScheduleConfig { .. } => "schedule_config",
            EngineCommand::ScheduleBoostedConfig { .. } => "schedule_boosted_config",
            EngineCommand::ApproveConfig { .. } => "approve_config",
            EngineCommand::ApplyConfig { .. } => "apply_config",
            EngineCommand::CancelConfig { .. } => "cancel_config",
            EngineCommand::ApproveAddOperatorNow { .. } => "approve_add_operator_now",
            EngineCommand::ScheduleBypassCall { .. } => "schedule_bypass_call",
            EngineCommand::ApproveBypassCall { .. } => "approve_bypass_call",
            EngineCommand::ApplyBypassCall { .. } => "apply_bypass_call",
            EngineCommand::CancelBypassCall { .. } => "cancel_bypass_call",
            EngineCommand::ExecuteBypassCall { .. } => "execute_bypass_call",
            EngineCommand::Freeze { .. } => "freeze",
        }
    }
}

/// What a successful command did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutput {
    Initialized { participants: Vec<ParticipantHash> },
    Scheduled { op_id: OpId, due_time: u64 },
    Approved { op_id: OpId, approvals: usize },
    Applied { op_id: OpId },
    Cancelled { op_id: OpId },
    Executed { effect: CallEffect },
    Frozen { level: u8, until: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::permissions::Permissions;

    #[test]
    fn test_refs_match_scheduled_ids() {
        let scheduler = Participant::new(Address::repeat_byte(1), Permissions::OWNER, 1).unwrap();
        let config = ConfigRef {
            actions: vec![ConfigAction::Unfreeze],
            state_id: 4,
            scheduler,
            booster: None,
        };
        let payload = OpPayload::Config {
            actions: vec![ConfigAction::Unfreeze],
        };
        assert_eq!(config.op_id(), compute_op_id(&payload, 4, &scheduler, None));

        let call = BypassCall {
            target: Address::repeat_byte(2),
            value: 1,
            data: vec![],
        };
        let bypass = BypassRef {
            call: call.clone(),
            state_id: 4,
            scheduler,
        };
        assert_ne!(bypass.op_id(), config.op_id());
        assert_eq!(
            bypass.op_id(),
            compute_op_id(&OpPayload::BypassCall { call }, 4, &scheduler, None)
        );
    }
}
