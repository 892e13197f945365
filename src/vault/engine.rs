//! The vault state machine
//!
//! Every entry point authenticates the sender against the stored participant
//! hashes, checks permission bits, freeze state and level relationships, and
//! only then mutates. A failed command changes nothing and emits nothing.

use crate::crypto::{recover_message_signer, Address, EthSignature};
use crate::errors::{FreezeRole, GatekeepError, Result};
use crate::policy::{BypassPolicy, CallContext, PolicyEngine, PolicyId, Verdict};
use crate::vault::actions::{required_permissions, ConfigAction};
use crate::vault::clock::Clock;
use crate::vault::commands::{BypassRef, CommandOutput, ConfigRef, EngineCommand, InitialConfig};
use crate::vault::events::{ApplyOutcome, VaultEvent};
use crate::vault::freeze::FreezeState;
use crate::vault::participant::{Participant, ParticipantHash};
use crate::vault::pending::{
    boost_message, compute_op_id, is_unfreeze_only, BypassCall, OpId, OpKind, OpPayload,
    PendingOperation,
};
use crate::vault::permissions::{PermLevel, Permissions};
use crate::vault::treasury::{CallEffect, Treasury};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const MAX_PARTICIPANTS: usize = 20;
pub const MAX_LEVELS: usize = 10;
pub const MAX_DELAY: u64 = 10 * 365 * 24 * 60 * 60;

/// Configuration mutated only through applied Config operations
#[derive(Debug, Clone)]
struct Settings {
    participants: HashSet<ParticipantHash>,
    allow_accelerated_calls: bool,
    allow_add_operator_now: bool,
    policies: PolicyEngine,
    freeze: FreezeState,
}

pub struct Vault {
    account: Address,
    creator: Address,
    initialized: bool,
    settings: Settings,
    delays: Vec<u64>,
    required_approvals: Vec<u32>,
    state_nonce: u64,
    pending: HashMap<OpId, PendingOperation>,
    treasury: Treasury,
    clock: Arc<dyn Clock>,
    outbox: Vec<VaultEvent>,
}

impl Vault {
    pub fn new(account: Address, creator: Address, clock: Arc<dyn Clock>) -> Self {
        Self {
            account,
            creator,
            initialized: false,
            settings: Settings {
                participants: HashSet::new(),
                allow_accelerated_calls: false,
                allow_add_operator_now: false,
                policies: PolicyEngine::new(),
                freeze: FreezeState::default(),
            },
            delays: Vec::new(),
            required_approvals: Vec::new(),
            state_nonce: 0,
            pending: HashMap::new(),
            treasury: Treasury::new(),
            clock,
            outbox: Vec::new(),
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn creator(&self) -> Address {
        self.creator
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state_nonce(&self) -> u64 {
        self.state_nonce
    }

    pub fn freeze_state(&self) -> FreezeState {
        self.settings.freeze
    }

    pub fn is_participant(&self, participant: &Participant) -> bool {
        self.settings.participants.contains(&participant.hash())
    }

    pub fn participant_count(&self) -> usize {
        self.settings.participants.len()
    }

    pub fn allow_accelerated_calls(&self) -> bool {
        self.settings.allow_accelerated_calls
    }

    pub fn allow_add_operator_now(&self) -> bool {
        self.settings.allow_add_operator_now
    }

    pub fn delays(&self) -> &[u64] {
        &self.delays
    }

    pub fn required_approvals(&self) -> &[u32] {
        &self.required_approvals
    }

    pub fn policies(&self) -> &PolicyEngine {
        &self.settings.policies
    }

    /// Make a custom policy available for bindings
    pub fn register_policy(&mut self, id: PolicyId, policy: Arc<dyn BypassPolicy>) {
        self.settings.policies.register(id, policy);
    }

    pub fn pending(&self, op_id: &OpId) -> Option<&PendingOperation> {
        self.pending.get(op_id)
    }

    pub fn pending_operations(&self) -> impl Iterator<Item = &PendingOperation> {
        self.pending.values()
    }

    pub fn treasury(&self) -> &Treasury {
        &self.treasury
    }

    pub fn treasury_mut(&mut self) -> &mut Treasury {
        &mut self.treasury
    }

    /// Drain events emitted since the last call
    pub fn take_events(&mut self) -> Vec<VaultEvent> {
        std::mem::take(&mut self.outbox)
    }

    /// Route a command to its entry point
    pub fn dispatch(&mut self, sender: Address, command: EngineCommand) -> Result<CommandOutput> {
        debug!("Dispatching {} from {} on {}", command.name(), sender, self.account);
        match command {
            EngineCommand::InitialConfig(config) => self.initial_config(sender, config),
            EngineCommand::ScheduleConfig {
                perm_level,
                actions,
                state_id,
            } => self.schedule_config(sender, perm_level, actions, state_id),
            EngineCommand::ScheduleBoostedConfig {
                perm_level,
                actions,
                state_id,
                booster,
                signature,
            } => self.schedule_boosted_config(sender, perm_level, actions, state_id, booster, &signature),
            EngineCommand::ApproveConfig { perm_level, op } => {
                self.approve_config(sender, perm_level, &op)
            }
            EngineCommand::ApplyConfig { perm_level, op } => self.apply_config(sender, perm_level, &op),
            EngineCommand::CancelConfig { perm_level, op } => {
                self.cancel_config(sender, perm_level, &op)
            }
            EngineCommand::ApproveAddOperatorNow { perm_level, op } => {
                self.approve_add_operator_now(sender, perm_level, &op)
            }
            EngineCommand::ScheduleBypassCall {
                perm_level,
                call,
                state_id,
            } => self.schedule_bypass_call(sender, perm_level, call, state_id),
            EngineCommand::ApproveBypassCall { perm_level, op } => {
                self.approve_bypass_call(sender, perm_level, &op)
            }
            EngineCommand::ApplyBypassCall { perm_level, op } => {
                self.apply_bypass_call(sender, perm_level, &op)
            }
            EngineCommand::CancelBypassCall { perm_level, op } => {
                self.cancel_bypass_call(sender, perm_level, &op)
            }
            EngineCommand::ExecuteBypassCall { perm_level, call } => {
                self.execute_bypass_call(sender, perm_level, call)
            }
            EngineCommand::Freeze {
                perm_level,
                level,
                interval,
            } => self.freeze(sender, perm_level, level, interval),
        }
    }

    // ---------------------------------------------------------------------
    // Checks
    // ---------------------------------------------------------------------

    fn now(&self) -> u64 {
        self.clock.now()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if !self.initialized {
            return Err(GatekeepError::NotInitialized);
        }
        Ok(())
    }

    fn authenticate(&self, sender: Address, perm_level: PermLevel) -> Result<Participant> {
        self.ensure_initialized()?;
        let participant = Participant::with_perm_level(sender, perm_level);
        if !self.settings.participants.contains(&participant.hash()) {
            return Err(GatekeepError::UnknownParticipant(sender));
        }
        Ok(participant)
    }

    fn require(who: &Participant, granted: Permissions, required: Permissions) -> Result<()> {
        let missing = granted.missing(required);
        if !missing.is_empty() {
            return Err(GatekeepError::MissingPermissions {
                address: who.address,
                missing,
            });
        }
        Ok(())
    }

    fn check_freeze(&self, who: &Participant, role: FreezeRole) -> Result<()> {
        self.settings.freeze.check(who.level(), self.now(), role)
    }

    fn check_state_id(&self, presented: u64) -> Result<()> {
        if presented != self.state_nonce {
            return Err(GatekeepError::StateChanged {
                current: self.state_nonce,
                presented,
            });
        }
        Ok(())
    }

    fn check_level(actor: &Participant, scheduler: &Participant, action: &'static str) -> Result<()> {
        if actor.level() < scheduler.level() {
            return Err(GatekeepError::HigherLevelOperation { action });
        }
        Ok(())
    }

    fn delay_for(&self, level: u8) -> Result<u64> {
        self.delays.get(level as usize).copied().ok_or_else(|| {
            GatekeepError::InvalidConfig(format!("no delay configured for level {}", level))
        })
    }

    fn quorum_for(&self, level: u8) -> usize {
        self.required_approvals
            .get(level as usize)
            .copied()
            .unwrap_or(0) as usize
    }

    fn find_pending(&self, op_id: &OpId, kind: OpKind) -> Result<&PendingOperation> {
        match self.pending.get(op_id) {
            Some(op) if op.kind() == kind => Ok(op),
            _ => Err(GatekeepError::NoSuchPendingOperation),
        }
    }

    // ---------------------------------------------------------------------
    // Initial configuration
    // ---------------------------------------------------------------------

    pub fn initial_config(&mut self, sender: Address, config: InitialConfig) -> Result<CommandOutput> {
        if self.initialized {
            return Err(GatekeepError::AlreadyInitialized);
        }
        if sender != self.creator {
            return Err(GatekeepError::NotCreator(sender));
        }

        if config.delays.is_empty() || config.delays.len() > MAX_LEVELS {
            return Err(GatekeepError::InvalidConfig(format!(
                "expected 1..={} levels, got {}",
                MAX_LEVELS,
                config.delays.len()
            )));
        }
        if config.delays.len() != config.required_approvals.len() {
            return Err(GatekeepError::InvalidConfig(format!(
                "{} delays but {} approval counts",
                config.delays.len(),
                config.required_approvals.len()
            )));
        }
        if let Some(delay) = config.delays.iter().find(|d| **d > MAX_DELAY) {
            return Err(GatekeepError::InvalidConfig(format!(
                "delay {}s exceeds maximum {}s",
                delay, MAX_DELAY
            )));
        }
        if config.participants.is_empty() || config.participants.len() > MAX_PARTICIPANTS {
            return Err(GatekeepError::InvalidConfig(format!(
                "expected 1..={} participants, got {}",
                MAX_PARTICIPANTS,
                config.participants.len()
            )));
        }
        for p in &config.participants {
            if p.level() as usize >= config.delays.len() {
                return Err(GatekeepError::InvalidConfig(format!(
                    "participant {} has level {} but only {} levels are configured",
                    p.address,
                    p.level(),
                    config.delays.len()
                )));
            }
        }

        let mut policies = self.settings.policies.clone();
        for (target, policy) in &config.target_policies {
            policies.bind_target(*target, Some(policy.clone()))?;
        }
        for (selector, policy) in &config.method_policies {
            policies.bind_method(*selector, Some(policy.clone()))?;
        }

        let hashes: Vec<ParticipantHash> = config.participants.iter().map(Participant::hash).collect();
        self.settings.participants = hashes.iter().copied().collect();
        self.settings.allow_accelerated_calls = config.allow_accelerated_calls;
        self.settings.allow_add_operator_now = config.allow_add_operator_now;
        self.settings.policies = policies;
        self.delays = config.delays.clone();
        self.required_approvals = config.required_approvals.clone();
        self.initialized = true;

        info!(
            "Initialized account {} with {} participants and {} levels",
            self.account,
            hashes.len(),
            self.delays.len()
        );

        self.outbox.push(VaultEvent::ConfigInitialized {
            creator: self.creator,
            participants: hashes.clone(),
            delays: config.delays,
            required_approvals: config.required_approvals,
            allow_accelerated_calls: config.allow_accelerated_calls,
            allow_add_operator_now: config.allow_add_operator_now,
            target_policies: config.target_policies,
            method_policies: config.method_policies,
        });
        Ok(CommandOutput::Initialized {
            participants: hashes,
        })
    }

    // ---------------------------------------------------------------------
    // Config pipeline
    // ---------------------------------------------------------------------

    pub fn schedule_config(
        &mut self,
        sender: Address,
        perm_level: PermLevel,
        actions: Vec<ConfigAction>,
        state_id: u64,
    ) -> Result<CommandOutput> {
        let scheduler = self.authenticate(sender, perm_level)?;
        self.schedule_config_as(scheduler, None, actions, state_id)
    }

    /// Schedule with the bits of a second participant who signed the batch
    ///
    /// The relayer must hold `EXECUTE_BOOSTS`. Of the built-in roles only
    /// ADMIN has it, so a plain WATCHDOG cannot relay an owner-signed
    /// unfreeze unless it is granted that bit explicitly.
    pub fn schedule_boosted_config(
        &mut self,
        sender: Address,
        perm_level: PermLevel,
        actions: Vec<ConfigAction>,
        state_id: u64,
        booster: Participant,
        signature: &EthSignature,
    ) -> Result<CommandOutput> {
        let relayer = self.authenticate(sender, perm_level)?;
        Self::require(&relayer, relayer.permissions(), Permissions::EXECUTE_BOOSTS)?;

        if !self.settings.participants.contains(&booster.hash()) {
            return Err(GatekeepError::UnknownParticipant(booster.address));
        }
        Self::require(&booster, booster.permissions(), Permissions::SIGN_BOOSTS)?;

        let message = boost_message(&actions, state_id, &booster);
        let signer = recover_message_signer(&message, signature)?;
        if signer != booster.address {
            return Err(GatekeepError::InvalidBoostSignature(format!(
                "signed by {}, claimed {}",
                signer, booster.address
            )));
        }

        if !is_unfreeze_only(&actions) {
            self.check_freeze(&booster, FreezeRole::Booster)?;
        }

        self.schedule_config_as(relayer, Some(booster), actions, state_id)
    }

    fn schedule_config_as(
        &mut self,
        scheduler: Participant,
        booster: Option<Participant>,
        actions: Vec<ConfigAction>,
        state_id: u64,
    ) -> Result<CommandOutput> {
        if actions.is_empty() {
            return Err(GatekeepError::InvalidAction("empty batch".to_string()));
        }

        let add_operator_now = actions
            .iter()
            .any(|a| matches!(a, ConfigAction::AddOperatorNow { .. }));
        if add_operator_now {
            if !self.settings.allow_add_operator_now {
                return Err(GatekeepError::FeatureDisabled("add operator now"));
            }
            if actions.len() != 1 {
                return Err(GatekeepError::InvalidAction(
                    "ADD_OPERATOR_NOW must be the only action of its batch".to_string(),
                ));
            }
        }

        let granted = scheduler.permissions() | booster.map(|b| b.permissions()).unwrap_or(Permissions::NONE);
        Self::require(&scheduler, granted, required_permissions(&actions))?;
        self.check_state_id(state_id)?;
        self.check_freeze(&scheduler, FreezeRole::Caller)?;

        let now = self.now();
        let due_time = if add_operator_now {
            now
        } else {
            now.saturating_add(self.delay_for(scheduler.level())?)
        };

        let payload = OpPayload::Config {
            actions: actions.clone(),
        };
        let op_id = compute_op_id(&payload, state_id, &scheduler, booster.as_ref());
        if self.pending.contains_key(&op_id) {
            return Err(GatekeepError::RepeatedOperation);
        }

        self.pending.insert(
            op_id,
            PendingOperation {
                op_id,
                payload,
                state_id,
                scheduler,
                booster,
                due_time,
                approvers: Vec::new(),
            },
        );

        info!(
            "Scheduled config {} ({} actions) by {}, due at {}",
            op_id.short(),
            actions.len(),
            scheduler,
            due_time
        );
        self.outbox.push(VaultEvent::ConfigPending {
            op_id,
            actions,
            state_id,
            scheduler,
            booster,
            due_time,
        });
        Ok(CommandOutput::Scheduled { op_id, due_time })
    }

    /// Record an approval, returning the new approval count
    fn approve_pending(&mut self, approver: Participant, op_id: &OpId, kind: OpKind) -> Result<usize> {
        Self::require(&approver, approver.permissions(), Permissions::APPROVE)?;
        let op = self.find_pending(op_id, kind)?;
        if op.is_add_operator_now() {
            return Err(GatekeepError::UseAddOperatorNowPath);
        }
        Self::check_level(&approver, &op.scheduler, "approve")?;
        if op.has_approved(&approver) {
            return Err(GatekeepError::AlreadyApproved(approver.address));
        }

        let op = self
            .pending
            .get_mut(op_id)
            .ok_or(GatekeepError::NoSuchPendingOperation)?;
        op.approvers.push(approver);
        let approvals = op.approvers.len();
        info!("{} approved {} ({} approvals)", approver, op_id.short(), approvals);
        Ok(approvals)
    }

    pub fn approve_config(&mut self, sender: Address, perm_level: PermLevel, op: &ConfigRef) -> Result<CommandOutput> {
        let approver = self.authenticate(sender, perm_level)?;
        let op_id = op.op_id();
        let approvals = self.approve_pending(approver, &op_id, OpKind::Config)?;
        self.outbox.push(VaultEvent::ConfigApproved {
            op_id,
            approver,
            approvals,
        });
        Ok(CommandOutput::Approved { op_id, approvals })
    }

    /// Scheduler and booster freeze checks shared by both apply paths
    fn check_apply_freezes(&self, op: &PendingOperation) -> Result<()> {
        self.check_freeze(&op.scheduler, FreezeRole::Scheduler)?;
        if let Some(booster) = &op.booster {
            if !op.is_unfreeze_only() {
                self.check_freeze(booster, FreezeRole::Booster)?;
            }
        }
        Ok(())
    }

    pub fn apply_config(&mut self, sender: Address, perm_level: PermLevel, op: &ConfigRef) -> Result<CommandOutput> {
        let caller = self.authenticate(sender, perm_level)?;
        self.check_freeze(&caller, FreezeRole::Caller)?;

        let op_id = op.op_id();
        let pending = self.find_pending(&op_id, OpKind::Config)?;
        if pending.is_add_operator_now() {
            return Err(GatekeepError::UseAddOperatorNowPath);
        }

        let now = self.now();
        if now < pending.due_time {
            return Err(GatekeepError::TooEarly {
                due_time: pending.due_time,
                now,
            });
        }
        let need = self.quorum_for(pending.scheduler.level());
        if pending.approvers.len() < need {
            return Err(GatekeepError::PendingApprovals {
                have: pending.approvers.len(),
                need,
            });
        }
        self.check_apply_freezes(pending)?;

        self.commit_config(op_id, &op.actions)?;
        info!("Applied config {} by {}, state nonce {}", op_id.short(), caller, self.state_nonce);
        Ok(CommandOutput::Applied { op_id })
    }

    /// Run a batch against a staged copy of the settings and commit it whole
    fn commit_config(&mut self, op_id: OpId, actions: &[ConfigAction]) -> Result<()> {
        let mut staged = self.settings.clone();
        let mut unfrozen = false;
        for action in actions {
            Self::apply_action(&mut staged, action, &mut unfrozen)?;
        }

        self.settings = staged;
        self.pending.remove(&op_id);
        self.state_nonce += 1;

        if unfrozen {
            info!("Freeze cleared by {}", op_id.short());
            self.outbox.push(VaultEvent::Unfrozen { op_id });
        }
        self.outbox.push(VaultEvent::ConfigApplied {
            op_id,
            state_nonce: self.state_nonce,
        });
        Ok(())
    }

    fn apply_action(staged: &mut Settings, action: &ConfigAction, unfrozen: &mut bool) -> Result<()> {
        match action {
            ConfigAction::AddParticipant { participant } | ConfigAction::AddOperatorNow { participant } => {
                if staged.participants.contains(participant) {
                    return Err(GatekeepError::InvalidAction(format!(
                        "participant {} already present",
                        participant.short()
                    )));
                }
                if staged.participants.len() >= MAX_PARTICIPANTS {
                    return Err(GatekeepError::InvalidConfig(format!(
                        "participant limit {} reached",
                        MAX_PARTICIPANTS
                    )));
                }
                staged.participants.insert(*participant);
            }
            ConfigAction::RemoveParticipant { participant } => {
                if !staged.participants.remove(participant) {
                    return Err(GatekeepError::InvalidAction(format!(
                        "participant {} not found",
                        participant.short()
                    )));
                }
            }
            ConfigAction::ChangeOwner { old, new } => {
                if !staged.participants.remove(old) {
                    return Err(GatekeepError::InvalidAction(format!(
                        "participant {} not found",
                        old.short()
                    )));
                }
                if !staged.participants.insert(*new) {
                    return Err(GatekeepError::InvalidAction(format!(
                        "participant {} already present",
                        new.short()
                    )));
                }
            }
            ConfigAction::Unfreeze => {
                staged.freeze.clear();
                *unfrozen = true;
            }
            ConfigAction::SetAcceleratedCalls { enabled } => {
                staged.allow_accelerated_calls = *enabled;
            }
            ConfigAction::SetAddOperatorNow { enabled } => {
                staged.allow_add_operator_now = *enabled;
            }
            ConfigAction::SetTargetPolicy { target, policy } => {
                staged.policies.bind_target(*target, policy.clone())?;
            }
            ConfigAction::SetMethodPolicy { selector, policy } => {
                staged.policies.bind_method(*selector, policy.clone())?;
            }
        }
        Ok(())
    }

    /// Remove a pending operation after the canceller checks
    fn cancel_pending(&mut self, canceller: Participant, op_id: &OpId, kind: OpKind) -> Result<()> {
        Self::require(&canceller, canceller.permissions(), Permissions::CANCEL)?;
        self.check_freeze(&canceller, FreezeRole::Caller)?;
        let op = self.find_pending(op_id, kind)?;
        Self::check_level(&canceller, &op.scheduler, "cancel")?;
        self.pending.remove(op_id);
        info!("{} cancelled {}", canceller, op_id.short());
        Ok(())
    }

    pub fn cancel_config(&mut self, sender: Address, perm_level: PermLevel, op: &ConfigRef) -> Result<CommandOutput> {
        let canceller = self.authenticate(sender, perm_level)?;
        let op_id = op.op_id();
        self.cancel_pending(canceller, &op_id, OpKind::Config)?;
        self.outbox.push(VaultEvent::ConfigCancelled { op_id, canceller });
        Ok(CommandOutput::Cancelled { op_id })
    }

    /// Approve and apply an ADD_OPERATOR_NOW request in one step
    pub fn approve_add_operator_now(
        &mut self,
        sender: Address,
        perm_level: PermLevel,
        op: &ConfigRef,
    ) -> Result<CommandOutput> {
        let approver = self.authenticate(sender, perm_level)?;
        Self::require(&approver, approver.permissions(), Permissions::APPROVE)?;
        if !self.settings.allow_add_operator_now {
            return Err(GatekeepError::FeatureDisabled("add operator now"));
        }
        self.check_freeze(&approver, FreezeRole::Caller)?;

        let op_id = op.op_id();
        let pending = self.find_pending(&op_id, OpKind::Config)?;
        if !pending.is_add_operator_now() {
            return Err(GatekeepError::InvalidAction(
                "not an immediate add-operator request".to_string(),
            ));
        }
        Self::check_level(&approver, &pending.scheduler, "approve")?;
        self.check_apply_freezes(pending)?;
        let approvals = pending.approvers.len() + 1;

        self.commit_config(op_id, &op.actions)?;
        // Approval precedes the applied event in the log
        let applied = self.outbox.pop();
        self.outbox.push(VaultEvent::ConfigApproved {
            op_id,
            approver,
            approvals,
        });
        self.outbox.extend(applied);

        info!("Added operator via {} approved by {}", op_id.short(), approver);
        Ok(CommandOutput::Applied { op_id })
    }

    // ---------------------------------------------------------------------
    // Bypass calls
    // ---------------------------------------------------------------------

    pub fn schedule_bypass_call(
        &mut self,
        sender: Address,
        perm_level: PermLevel,
        call: BypassCall,
        state_id: u64,
    ) -> Result<CommandOutput> {
        let scheduler = self.authenticate(sender, perm_level)?;
        Self::require(&scheduler, scheduler.permissions(), Permissions::SPEND)?;
        self.check_state_id(state_id)?;
        self.check_freeze(&scheduler, FreezeRole::Caller)?;

        let due_time = self.now().saturating_add(self.delay_for(scheduler.level())?);
        let payload = OpPayload::BypassCall { call: call.clone() };
        let op_id = compute_op_id(&payload, state_id, &scheduler, None);
        if self.pending.contains_key(&op_id) {
            return Err(GatekeepError::RepeatedOperation);
        }

        self.pending.insert(
            op_id,
            PendingOperation {
                op_id,
                payload,
                state_id,
                scheduler,
                booster: None,
                due_time,
                approvers: Vec::new(),
            },
        );

        info!(
            "Scheduled call {} to {} (value {}) by {}, due at {}",
            op_id.short(),
            call.target,
            call.value,
            scheduler,
            due_time
        );
        self.outbox.push(VaultEvent::BypassCallPending {
            op_id,
            call,
            state_id,
            scheduler,
            due_time,
        });
        Ok(CommandOutput::Scheduled { op_id, due_time })
    }

    pub fn approve_bypass_call(&mut self, sender: Address, perm_level: PermLevel, op: &BypassRef) -> Result<CommandOutput> {
        let approver = self.authenticate(sender, perm_level)?;
        let op_id = op.op_id();
        let approvals = self.approve_pending(approver, &op_id, OpKind::BypassCall)?;
        self.outbox.push(VaultEvent::BypassCallApproved {
            op_id,
            approver,
            approvals,
        });
        Ok(CommandOutput::Approved { op_id, approvals })
    }

    pub fn apply_bypass_call(&mut self, sender: Address, perm_level: PermLevel, op: &BypassRef) -> Result<CommandOutput> {
        let caller = self.authenticate(sender, perm_level)?;
        self.check_freeze(&caller, FreezeRole::Caller)?;

        let op_id = op.op_id();
        let pending = self.find_pending(&op_id, OpKind::BypassCall)?;
        self.check_apply_freezes(pending)?;

        let now = self.now();
        let have = pending.approvers.len();
        let quorum = self.quorum_for(pending.scheduler.level());
        let outcome = if now >= pending.due_time {
            if have < quorum {
                return Err(GatekeepError::PendingApprovals { have, need: quorum });
            }
            ApplyOutcome::AfterDelay
        } else {
            let ctx = CallContext::new(self.account, op.call.target, op.call.value, &op.call.data);
            let verdict = self.settings.policies.evaluate(&ctx).verdict;
            if verdict != Verdict::NeedsApprovalThenImmediate || !self.settings.allow_accelerated_calls {
                return Err(GatekeepError::TooEarly {
                    due_time: pending.due_time,
                    now,
                });
            }
            let need = quorum.max(1);
            if have < need {
                return Err(GatekeepError::PendingApprovals { have, need });
            }
            ApplyOutcome::WithoutDelay
        };

        let effect = self
            .treasury
            .execute(&self.account, op.call.target, op.call.value, &op.call.data)?;
        self.pending.remove(&op_id);

        info!("Applied call {} ({:?}) by {}", op_id.short(), outcome, caller);
        self.outbox.push(VaultEvent::BypassCallApplied {
            op_id,
            outcome,
            effect,
        });
        Ok(CommandOutput::Applied { op_id })
    }

    pub fn cancel_bypass_call(&mut self, sender: Address, perm_level: PermLevel, op: &BypassRef) -> Result<CommandOutput> {
        let canceller = self.authenticate(sender, perm_level)?;
        let op_id = op.op_id();
        self.cancel_pending(canceller, &op_id, OpKind::BypassCall)?;
        self.outbox.push(VaultEvent::BypassCallCancelled { op_id, canceller });
        Ok(CommandOutput::Cancelled { op_id })
    }

    /// Run a call now if its policy says Immediate
    pub fn execute_bypass_call(&mut self, sender: Address, perm_level: PermLevel, call: BypassCall) -> Result<CommandOutput> {
        let caller = self.authenticate(sender, perm_level)?;
        Self::require(&caller, caller.permissions(), Permissions::SPEND)?;
        self.check_freeze(&caller, FreezeRole::Caller)?;

        if !self.settings.allow_accelerated_calls {
            return Err(GatekeepError::CannotExecuteImmediately);
        }
        let ctx = CallContext::new(self.account, call.target, call.value, &call.data);
        let evaluation = self.settings.policies.evaluate(&ctx);
        if evaluation.verdict != Verdict::Immediate {
            debug!(
                "Immediate call to {} refused by policy {}: {:?}",
                call.target, evaluation.policy, evaluation.verdict
            );
            return Err(GatekeepError::CannotExecuteImmediately);
        }

        let effect: CallEffect = self
            .treasury
            .execute(&self.account, call.target, call.value, &call.data)?;
        info!("Executed call to {} immediately by {}", call.target, caller);
        self.outbox.push(VaultEvent::BypassCallExecuted {
            caller,
            call,
            effect: effect.clone(),
        });
        Ok(CommandOutput::Executed { effect })
    }

    // ---------------------------------------------------------------------
    // Freeze
    // ---------------------------------------------------------------------

    pub fn freeze(&mut self, sender: Address, perm_level: PermLevel, level: u8, interval: u64) -> Result<CommandOutput> {
        let caller = self.authenticate(sender, perm_level)?;
        Self::require(&caller, caller.permissions(), Permissions::FREEZE)?;
        self.check_freeze(&caller, FreezeRole::Caller)?;

        let now = self.now();
        self.settings.freeze.freeze(caller.level(), level, interval, now)?;
        let until = self.settings.freeze.frozen_until;

        warn!("Levels up to {} frozen until {} by {}", level, until, caller);
        self.outbox.push(VaultEvent::LevelFrozen {
            level,
            until,
            by: caller,
        });
        Ok(CommandOutput::Frozen { level, until })
    }
}
