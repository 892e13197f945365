//! The guardian agent
//!
//! Each tick scans the logs of watched accounts, then walks the tracked
//! operations: due ones are applied, pending ones get a single out-of-band
//! challenge, and immediate operator adds are approved only for the device
//! the account's owner validated. In auto-cancel mode everything tracked is
//! cancelled instead.
//!
//! An item leaves the store before its submission is awaited and returns
//! only if the submission fails, so concurrent ticks never submit it twice.

use crate::crypto::Address;
use crate::errors::{ErrorCategory, GatekeepError, Result};
use crate::guardian::challenge::{ChallengeCodes, ChallengePurpose};
use crate::guardian::channel::{GuardianNotice, NoticeBus, OobChannel};
use crate::guardian::registry::AccountRegistry;
use crate::guardian::store::{ItemKey, PendingStore, TrackedItem, TrackedOp};
use crate::ledger::LedgerClient;
use crate::vault::participant::participant_hash;
use crate::vault::{
    BypassRef, Clock, ConfigRef, EngineCommand, OpId, Participant, PermLevel, VaultEvent,
};
use chrono::TimeZone;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianMode {
    #[default]
    Normal,
    /// Cancel every tracked operation instead of applying it
    AutoCancel,
}

impl FromStr for GuardianMode {
    type Err = GatekeepError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "normal" => Ok(GuardianMode::Normal),
            "auto_cancel" | "auto-cancel" | "autocancel" => Ok(GuardianMode::AutoCancel),
            _ => Err(GatekeepError::ConfigError(format!(
                "unknown guardian mode: {}",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardianAction {
    Scan,
    Apply,
    Cancel,
    ApproveAddOperatorNow,
    Challenge,
}

impl GuardianAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardianAction::Scan => "scan",
            GuardianAction::Apply => "apply",
            GuardianAction::Cancel => "cancel",
            GuardianAction::ApproveAddOperatorNow => "approve_add_operator_now",
            GuardianAction::Challenge => "challenge",
        }
    }
}

/// A per-item failure; the tick carries on with the next item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemError {
    pub account: Address,
    pub op_id: Option<OpId>,
    pub action: GuardianAction,
    pub category: ErrorCategory,
    pub message: String,
}

impl ItemError {
    fn new(account: Address, op_id: Option<OpId>, action: GuardianAction, err: &GatekeepError) -> Self {
        Self {
            account,
            op_id,
            action,
            category: err.category(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tracked: usize,
    pub resolved: usize,
    pub applied: Vec<OpId>,
    pub cancelled: Vec<OpId>,
    pub approved: Vec<OpId>,
    pub challenges_sent: Vec<OpId>,
    pub errors: Vec<ItemError>,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.tracked == 0
            && self.resolved == 0
            && self.applied.is_empty()
            && self.cancelled.is_empty()
            && self.approved.is_empty()
            && self.challenges_sent.is_empty()
            && self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GuardianSettings {
    /// Participant the guardian submits as
    pub identity: Participant,
    /// Permissions and level granted to devices added immediately
    pub operator_perm_level: PermLevel,
    pub mode: GuardianMode,
    pub notice_capacity: usize,
}

enum Step {
    Submit(GuardianAction, TrackedItem),
    Challenge(TrackedItem),
}

pub struct Guardian {
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<AccountRegistry>,
    codes: Arc<ChallengeCodes>,
    channel: Arc<dyn OobChannel>,
    clock: Arc<dyn Clock>,
    store: Mutex<PendingStore>,
    identity: Participant,
    operator_perm_level: PermLevel,
    mode: RwLock<GuardianMode>,
    notices: NoticeBus,
}

impl Guardian {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<AccountRegistry>,
        codes: Arc<ChallengeCodes>,
        channel: Arc<dyn OobChannel>,
        clock: Arc<dyn Clock>,
        settings: GuardianSettings,
    ) -> Self {
        Self {
            ledger,
            registry,
            codes,
            channel,
            clock,
            store: Mutex::new(PendingStore::new()),
            identity: settings.identity,
            operator_perm_level: settings.operator_perm_level,
            mode: RwLock::new(settings.mode),
            notices: NoticeBus::new(settings.notice_capacity),
        }
    }

    pub fn identity(&self) -> Participant {
        self.identity
    }

    pub fn mode(&self) -> GuardianMode {
        *self.mode.read()
    }

    pub fn set_mode(&self, mode: GuardianMode) {
        let previous = std::mem::replace(&mut *self.mode.write(), mode);
        if previous != mode {
            info!("Guardian mode {:?} -> {:?}", previous, mode);
        }
    }

    pub fn notices(&self) -> &NoticeBus {
        &self.notices
    }

    /// Number of operations currently tracked
    pub fn tracked(&self) -> usize {
        self.store.lock().len()
    }

    /// Forget all tracked operations; the next tick rescans from the start
    pub fn reset(&self) {
        self.store.lock().reset();
        info!("Guardian store reset");
    }

    /// One pass over every watched account
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for account in self.registry.watched() {
            if let Err(e) = self.scan(account, &mut report).await {
                warn!(account = %account, error = %e, "Failed to read account events");
                report
                    .errors
                    .push(ItemError::new(account, None, GuardianAction::Scan, &e));
            }
        }

        let now = self.clock.now();
        let mode = self.mode();
        let keys = self.store.lock().keys();
        for key in keys {
            match self.next_step(&key, mode, now) {
                Some(Step::Submit(action, item)) => self.submit(action, item, &mut report).await,
                Some(Step::Challenge(item)) => self.send_challenge(item, now, &mut report).await,
                None => {}
            }
        }

        if !report.is_idle() {
            debug!(
                tracked = report.tracked,
                applied = report.applied.len(),
                cancelled = report.cancelled.len(),
                errors = report.errors.len(),
                "Guardian tick"
            );
        }
        report
    }

    /// Classify new events of one account
    async fn scan(&self, account: Address, report: &mut TickReport) -> Result<()> {
        let since = self.store.lock().last_position(&account);
        let records = self.ledger.events_since(account, since).await?;

        let mut store = self.store.lock();
        for record in records {
            // A concurrent tick may have classified this record already
            if !store.advance(account, record.position) {
                continue;
            }
            let item = match record.event {
                VaultEvent::ConfigPending {
                    op_id,
                    actions,
                    state_id,
                    scheduler,
                    booster,
                    due_time,
                } => TrackedItem {
                    account,
                    op_id,
                    due_time,
                    op: TrackedOp::Config(ConfigRef {
                        actions,
                        state_id,
                        scheduler,
                        booster,
                    }),
                    challenged_at: None,
                },
                VaultEvent::BypassCallPending {
                    op_id,
                    call,
                    state_id,
                    scheduler,
                    due_time,
                } => TrackedItem {
                    account,
                    op_id,
                    due_time,
                    op: TrackedOp::BypassCall(BypassRef {
                        call,
                        state_id,
                        scheduler,
                    }),
                    challenged_at: None,
                },
                event => {
                    if let (true, Some(op_id)) = (event.is_terminal(), event.op_id()) {
                        if store.resolve(account, op_id) {
                            report.resolved += 1;
                            self.notices
                                .publish(GuardianNotice::Resolved { account, op_id });
                        }
                    }
                    continue;
                }
            };

            self.notices.publish(GuardianNotice::Tracked {
                account,
                op_id: item.op_id,
                due_time: item.due_time,
            });
            report.tracked += 1;
            store.track(item);
        }
        Ok(())
    }

    /// Decide what to do with one item, taking it out of the store if it
    /// is about to be submitted
    fn next_step(&self, key: &ItemKey, mode: GuardianMode, now: u64) -> Option<Step> {
        let mut store = self.store.lock();
        let item = store.get(key)?;

        let action = if mode == GuardianMode::AutoCancel {
            GuardianAction::Cancel
        } else if item.op.add_operator_now().is_some() {
            GuardianAction::ApproveAddOperatorNow
        } else if item.due_time <= now {
            GuardianAction::Apply
        } else if item.challenged_at.is_none() {
            GuardianAction::Challenge
        } else {
            return None;
        };

        if action == GuardianAction::Challenge {
            let item = item.clone();
            store.mark_challenge_sent(key, now);
            return Some(Step::Challenge(item));
        }
        store.take(key).map(|item| Step::Submit(action, item))
    }

    fn command_for(&self, action: GuardianAction, item: &TrackedItem) -> EngineCommand {
        let perm_level = self.identity.perm_level;
        match (&item.op, action) {
            (TrackedOp::Config(op), GuardianAction::Cancel) => EngineCommand::CancelConfig {
                perm_level,
                op: op.clone(),
            },
            (TrackedOp::Config(op), GuardianAction::ApproveAddOperatorNow) => {
                EngineCommand::ApproveAddOperatorNow {
                    perm_level,
                    op: op.clone(),
                }
            }
            (TrackedOp::Config(op), _) => EngineCommand::ApplyConfig {
                perm_level,
                op: op.clone(),
            },
            (TrackedOp::BypassCall(op), GuardianAction::Cancel) => {
                EngineCommand::CancelBypassCall {
                    perm_level,
                    op: op.clone(),
                }
            }
            (TrackedOp::BypassCall(op), _) => EngineCommand::ApplyBypassCall {
                perm_level,
                op: op.clone(),
            },
        }
    }

    /// The device an ADD_OPERATOR_NOW item may add, if it is the one the
    /// account validated
    fn check_new_operator(&self, item: &TrackedItem) -> Result<Address> {
        let participant = item.op.add_operator_now().ok_or_else(|| {
            GatekeepError::InternalError("not an immediate add-operator request".to_string())
        })?;
        let device = self.registry.validated_device(&item.account).ok_or_else(|| {
            GatekeepError::InvalidAction("no validated device for this account".to_string())
        })?;
        if participant_hash(&device, self.operator_perm_level) != participant {
            return Err(GatekeepError::InvalidAction(
                "new operator does not match the validated device".to_string(),
            ));
        }
        Ok(device)
    }

    async fn submit(&self, action: GuardianAction, item: TrackedItem, report: &mut TickReport) {
        let (account, op_id) = (item.account, item.op_id);

        let device = if action == GuardianAction::ApproveAddOperatorNow {
            match self.check_new_operator(&item) {
                Ok(device) => Some(device),
                Err(e) => {
                    // Dropped, never retried
                    warn!(account = %account, op_id = %op_id.short(), error = %e, "Refusing immediate operator add");
                    self.notices.publish(GuardianNotice::Rejected {
                        account,
                        op_id,
                        reason: e.to_string(),
                    });
                    report
                        .errors
                        .push(ItemError::new(account, Some(op_id), action, &e));
                    return;
                }
            }
        } else {
            None
        };

        let command = self.command_for(action, &item);
        match self.ledger.submit(account, self.identity.address, command).await {
            Ok(_) => {
                info!(account = %account, op_id = %op_id.short(), "Guardian {} accepted", action.as_str());
                match action {
                    GuardianAction::Cancel => report.cancelled.push(op_id),
                    GuardianAction::ApproveAddOperatorNow => report.approved.push(op_id),
                    _ => report.applied.push(op_id),
                }
                if let Some(device) = device {
                    self.registry.consume_device(&account, &device);
                }
                self.notices.publish(GuardianNotice::Submitted {
                    account,
                    op_id,
                    action: action.as_str(),
                });
            }
            Err(e) => {
                error!(account = %account, op_id = %op_id.short(), error = %e, "Guardian {} failed", action.as_str());
                self.notices.publish(GuardianNotice::SubmissionFailed {
                    account,
                    op_id,
                    action: action.as_str(),
                    error: e.to_string(),
                });
                // Replay errors mean the operation is no longer pending
                if e.category() != ErrorCategory::Replay {
                    self.store.lock().restore(item);
                }
                report
                    .errors
                    .push(ItemError::new(account, Some(op_id), action, &e));
            }
        }
    }

    async fn send_challenge(&self, item: TrackedItem, now: u64, report: &mut TickReport) {
        let (account, op_id) = (item.account, item.op_id);
        let recipient = match self.registry.get(&account) {
            Ok(info) => info.recipient,
            Err(e) => {
                report
                    .errors
                    .push(ItemError::new(account, Some(op_id), GuardianAction::Challenge, &e));
                return;
            }
        };

        let code = self
            .codes
            .code(ChallengePurpose::CancelOperation, &recipient, &op_id.0, now);
        let due = chrono::Utc
            .timestamp_opt(item.due_time as i64, 0)
            .single()
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| item.due_time.to_string());
        let message = format!(
            "gatekeep: operation {} on account {} executes at {}. Reply {} to cancel it.",
            op_id.short(),
            account,
            due,
            code
        );

        // Marked as sent already; a failed send is reported, not retried
        match self.channel.send(&recipient, &message).await {
            Ok(()) => {
                debug!(account = %account, op_id = %op_id.short(), "Challenge sent");
                report.challenges_sent.push(op_id);
                self.notices
                    .publish(GuardianNotice::ChallengeSent { account, op_id });
            }
            Err(e) => {
                warn!(account = %account, op_id = %op_id.short(), error = %e, "Failed to send challenge");
                report
                    .errors
                    .push(ItemError::new(account, Some(op_id), GuardianAction::Challenge, &e));
            }
        }
    }

    /// Cancel the challenged operation a reply code was issued for
    pub async fn cancel_by_challenge(&self, code: &str) -> Result<Vec<OpId>> {
        let now = self.clock.now();
        let mut matched = Vec::new();
        for info in self.registry.list() {
            let challenged = self.store.lock().challenged(&info.account);
            matched.extend(
                challenged
                    .into_iter()
                    .filter(|((_, op_id), issued_at)| {
                        self.codes.verify(
                            ChallengePurpose::CancelOperation,
                            &info.recipient,
                            &op_id.0,
                            code,
                            *issued_at,
                            now,
                        )
                    })
                    .map(|(key, _)| key),
            );
        }
        if matched.is_empty() {
            return Err(GatekeepError::InvalidChallenge);
        }

        let mut cancelled = Vec::new();
        let mut last_error = None;
        for key in matched {
            let taken = self.store.lock().take(&key);
            let Some(item) = taken else {
                continue;
            };
            let command = self.command_for(GuardianAction::Cancel, &item);
            match self
                .ledger
                .submit(item.account, self.identity.address, command)
                .await
            {
                Ok(_) => {
                    info!(account = %item.account, op_id = %item.op_id.short(), "Cancelled by challenge reply");
                    self.notices.publish(GuardianNotice::Submitted {
                        account: item.account,
                        op_id: item.op_id,
                        action: GuardianAction::Cancel.as_str(),
                    });
                    cancelled.push(item.op_id);
                }
                Err(e) => {
                    warn!(account = %item.account, op_id = %item.op_id.short(), error = %e, "Challenge cancel failed");
                    if e.category() != ErrorCategory::Replay {
                        self.store.lock().restore(item);
                    }
                    last_error = Some(e);
                }
            }
        }

        match (cancelled.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            _ => Ok(cancelled),
        }
    }
}
