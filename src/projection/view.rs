//! Account state rebuilt from the event log
//!
//! `project` is a pure fold over event records. The same history always
//! yields the same view, so any number of readers may run it concurrently.
//! A view can also be advanced incrementally with `AccountView::apply`.

use crate::crypto::Address;
use crate::ledger::EventRecord;
use crate::policy::PolicyId;
use crate::projection::classify::{classify, CallClass};
use crate::vault::calldata::Selector;
use crate::vault::{
    BypassCall, ConfigAction, FreezeState, OpId, Participant, ParticipantHash, VaultEvent,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingConfigView {
    pub op_id: OpId,
    pub actions: Vec<ConfigAction>,
    pub state_id: u64,
    pub scheduler: Participant,
    pub booster: Option<Participant>,
    pub due_time: u64,
    pub approvals: usize,
    /// Log position of the scheduling event
    pub position: u64,
}

impl PendingConfigView {
    pub fn is_add_operator_now(&self) -> bool {
        self.actions.len() == 1 && matches!(self.actions[0], ConfigAction::AddOperatorNow { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingCallView {
    pub op_id: OpId,
    pub call: BypassCall,
    pub class: CallClass,
    pub state_id: u64,
    pub scheduler: Participant,
    pub due_time: u64,
    pub approvals: usize,
    pub position: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountView {
    pub initialized: bool,
    pub creator: Option<Address>,
    pub participants: HashSet<ParticipantHash>,
    pub delays: Vec<u64>,
    pub required_approvals: Vec<u32>,
    pub allow_accelerated_calls: bool,
    pub allow_add_operator_now: bool,
    pub target_policies: HashMap<Address, PolicyId>,
    pub method_policies: HashMap<Selector, PolicyId>,
    pub freeze: FreezeState,
    pub state_nonce: u64,
    pending_config: HashMap<OpId, PendingConfigView>,
    pending_calls: HashMap<OpId, PendingCallView>,
    /// Position of the last record folded in
    pub last_position: u64,
}

impl AccountView {
    /// Fold one record into the view. Records at or before `last_position`
    /// are ignored.
    pub fn apply(&mut self, record: &EventRecord) {
        if record.position <= self.last_position {
            return;
        }
        self.last_position = record.position;

        match &record.event {
            VaultEvent::ConfigInitialized {
                creator,
                participants,
                delays,
                required_approvals,
                allow_accelerated_calls,
                allow_add_operator_now,
                target_policies,
                method_policies,
            } => {
                self.initialized = true;
                self.creator = Some(*creator);
                self.participants = participants.iter().copied().collect();
                self.delays = delays.clone();
                self.required_approvals = required_approvals.clone();
                self.allow_accelerated_calls = *allow_accelerated_calls;
                self.allow_add_operator_now = *allow_add_operator_now;
                self.target_policies = target_policies.iter().cloned().collect();
                self.method_policies = method_policies.iter().cloned().collect();
            }
            VaultEvent::ConfigPending {
                op_id,
                actions,
                state_id,
                scheduler,
                booster,
                due_time,
            } => {
                self.pending_config.insert(
                    *op_id,
                    PendingConfigView {
                        op_id: *op_id,
                        actions: actions.clone(),
                        state_id: *state_id,
                        scheduler: *scheduler,
                        booster: *booster,
                        due_time: *due_time,
                        approvals: 0,
                        position: record.position,
                    },
                );
            }
            VaultEvent::ConfigApproved {
                op_id, approvals, ..
            } => {
                if let Some(p) = self.pending_config.get_mut(op_id) {
                    p.approvals = *approvals;
                }
            }
            VaultEvent::ConfigApplied { op_id, state_nonce } => {
                if let Some(p) = self.pending_config.remove(op_id) {
                    for action in &p.actions {
                        self.apply_action(action);
                    }
                }
                self.state_nonce = *state_nonce;
            }
            VaultEvent::ConfigCancelled { op_id, .. } => {
                self.pending_config.remove(op_id);
            }
            VaultEvent::BypassCallPending {
                op_id,
                call,
                state_id,
                scheduler,
                due_time,
            } => {
                self.pending_calls.insert(
                    *op_id,
                    PendingCallView {
                        op_id: *op_id,
                        call: call.clone(),
                        class: classify(call),
                        state_id: *state_id,
                        scheduler: *scheduler,
                        due_time: *due_time,
                        approvals: 0,
                        position: record.position,
                    },
                );
            }
            VaultEvent::BypassCallApproved {
                op_id, approvals, ..
            } => {
                if let Some(p) = self.pending_calls.get_mut(op_id) {
                    p.approvals = *approvals;
                }
            }
            VaultEvent::BypassCallApplied { op_id, .. } | VaultEvent::BypassCallCancelled { op_id, .. } => {
                self.pending_calls.remove(op_id);
            }
            VaultEvent::BypassCallExecuted { .. } => {}
            VaultEvent::LevelFrozen { level, until, .. } => {
                self.freeze = FreezeState {
                    frozen_level: *level,
                    frozen_until: *until,
                };
            }
            VaultEvent::Unfrozen { .. } => self.freeze.clear(),
        }
    }

    fn apply_action(&mut self, action: &ConfigAction) {
        match action {
            ConfigAction::AddParticipant { participant } | ConfigAction::AddOperatorNow { participant } => {
                self.participants.insert(*participant);
            }
            ConfigAction::RemoveParticipant { participant } => {
                self.participants.remove(participant);
            }
            ConfigAction::ChangeOwner { old, new } => {
                self.participants.remove(old);
                self.participants.insert(*new);
            }
            ConfigAction::Unfreeze => self.freeze.clear(),
            ConfigAction::SetAcceleratedCalls { enabled } => self.allow_accelerated_calls = *enabled,
            ConfigAction::SetAddOperatorNow { enabled } => self.allow_add_operator_now = *enabled,
            ConfigAction::SetTargetPolicy { target, policy } => match policy {
                Some(id) => {
                    self.target_policies.insert(*target, id.clone());
                }
                None => {
                    self.target_policies.remove(target);
                }
            },
            ConfigAction::SetMethodPolicy { selector, policy } => match policy {
                Some(id) => {
                    self.method_policies.insert(*selector, id.clone());
                }
                None => {
                    self.method_policies.remove(selector);
                }
            },
        }
    }

    /// Candidates whose identity hash is currently a participant
    pub fn recognized(&self, candidates: &[Participant]) -> Vec<Participant> {
        candidates
            .iter()
            .filter(|c| self.participants.contains(&c.hash()))
            .copied()
            .collect()
    }

    /// Pending config batches in scheduling order
    pub fn pending_config(&self) -> Vec<&PendingConfigView> {
        let mut items: Vec<_> = self.pending_config.values().collect();
        items.sort_by_key(|p| p.position);
        items
    }

    /// Pending bypass calls in scheduling order
    pub fn pending_calls(&self) -> Vec<&PendingCallView> {
        let mut items: Vec<_> = self.pending_calls.values().collect();
        items.sort_by_key(|p| p.position);
        items
    }
}

/// Rebuild an account view from its full history
pub fn project(records: &[EventRecord]) -> AccountView {
    let mut view = AccountView::default();
    for record in records {
        view.apply(record);
    }
    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash32;
    use crate::vault::{ApplyOutcome, CallEffect, Permissions};

    fn record(position: u64, event: VaultEvent) -> EventRecord {
        EventRecord {
            position,
            account: Address::repeat_byte(0xAA),
            timestamp: 0,
            event,
        }
    }

    fn owner() -> Participant {
        Participant::new(Address::repeat_byte(1), Permissions::OWNER, 0).unwrap()
    }

    fn init() -> VaultEvent {
        VaultEvent::ConfigInitialized {
            creator: Address::repeat_byte(0xC0),
            participants: vec![owner().hash()],
            delays: vec![60],
            required_approvals: vec![0],
            allow_accelerated_calls: false,
            allow_add_operator_now: false,
            target_policies: vec![],
            method_policies: vec![],
        }
    }

    #[test]
    fn test_applied_actions_update_participants() {
        let newcomer = Participant::new(Address::repeat_byte(2), Permissions::WATCHDOG, 0).unwrap();
        let op_id = Hash32([1u8; 32]);
        let records = vec![
            record(1, init()),
            record(
                2,
                VaultEvent::ConfigPending {
                    op_id,
                    actions: vec![
                        ConfigAction::AddParticipant {
                            participant: newcomer.hash(),
                        },
                        ConfigAction::SetAcceleratedCalls { enabled: true },
                    ],
                    state_id: 0,
                    scheduler: owner(),
                    booster: None,
                    due_time: 60,
                },
            ),
            record(3, VaultEvent::ConfigApplied { op_id, state_nonce: 1 }),
        ];

        let view = project(&records);
        assert_eq!(view.recognized(&[owner(), newcomer]), vec![owner(), newcomer]);
        assert!(view.allow_accelerated_calls);
        assert_eq!(view.state_nonce, 1);
        assert!(view.pending_config().is_empty());
    }

    #[test]
    fn test_pending_until_terminal() {
        let kept = Hash32([1u8; 32]);
        let applied = Hash32([2u8; 32]);
        let cancelled = Hash32([3u8; 32]);
        let pending = |op_id, position| {
            record(
                position,
                VaultEvent::BypassCallPending {
                    op_id,
                    call: BypassCall {
                        target: Address::repeat_byte(9),
                        value: position as u128,
                        data: vec![],
                    },
                    state_id: 0,
                    scheduler: owner(),
                    due_time: 60,
                },
            )
        };
        let records = vec![
            record(1, init()),
            pending(applied, 2),
            pending(kept, 3),
            pending(cancelled, 4),
            record(
                5,
                VaultEvent::BypassCallApplied {
                    op_id: applied,
                    outcome: ApplyOutcome::AfterDelay,
                    effect: CallEffect::NativeTransfer {
                        to: Address::repeat_byte(9),
                        value: 2,
                    },
                },
            ),
            record(
                6,
                VaultEvent::BypassCallCancelled {
                    op_id: cancelled,
                    canceller: owner(),
                },
            ),
        ];

        let view = project(&records);
        let calls = view.pending_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].op_id, kept);
        assert!(matches!(calls[0].class, CallClass::NativeTransfer { value: 3, .. }));
    }

    #[test]
    fn test_projection_is_deterministic_and_incremental() {
        let records = vec![
            record(1, init()),
            record(
                2,
                VaultEvent::LevelFrozen {
                    level: 0,
                    until: 500,
                    by: owner(),
                },
            ),
        ];
        let full = project(&records);
        assert_eq!(full, project(&records));
        assert_eq!(full.freeze.frozen_until, 500);

        let mut incremental = project(&records[..1]);
        incremental.apply(&records[1]);
        // Replaying an already-seen record changes nothing
        incremental.apply(&records[0]);
        assert_eq!(incremental, full);
    }
}
