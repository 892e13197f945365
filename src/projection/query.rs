//! Read-side queries over a ledger

use crate::crypto::Address;
use crate::errors::Result;
use crate::ledger::LedgerClient;
use crate::projection::view::{project, AccountView, PendingCallView, PendingConfigView};
use crate::vault::{FreezeState, Participant};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Everything currently pending on an account
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PendingOperations {
    pub config: Vec<PendingConfigView>,
    pub calls: Vec<PendingCallView>,
}

#[derive(Clone)]
pub struct AccountQuery {
    ledger: Arc<dyn LedgerClient>,
}

impl AccountQuery {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Full projection of an account
    pub async fn view(&self, account: Address) -> Result<AccountView> {
        let records = self.ledger.events_since(account, 0).await?;
        debug!("Projecting {} from {} events", account, records.len());
        Ok(project(&records))
    }

    /// Advance an existing view with the events it has not seen yet
    pub async fn refresh(&self, account: Address, view: &mut AccountView) -> Result<usize> {
        let records = self.ledger.events_since(account, view.last_position).await?;
        for record in &records {
            view.apply(record);
        }
        Ok(records.len())
    }

    pub async fn pending_operations(&self, account: Address) -> Result<PendingOperations> {
        let view = self.view(account).await?;
        Ok(PendingOperations {
            config: view.pending_config().into_iter().cloned().collect(),
            calls: view.pending_calls().into_iter().cloned().collect(),
        })
    }

    /// The subset of `candidates` the account currently recognizes
    pub async fn participants(&self, account: Address, candidates: &[Participant]) -> Result<Vec<Participant>> {
        Ok(self.view(account).await?.recognized(candidates))
    }

    pub async fn freeze_state(&self, account: Address) -> Result<FreezeState> {
        Ok(self.view(account).await?.freeze)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;
    use crate::projection::CallClass;
    use crate::vault::{
        BypassCall, BypassRef, EngineCommand, InitialConfig, ManualClock, Permissions,
    };

    const DAY: u64 = 86_400;

    struct Fixture {
        ledger: Arc<InMemoryLedger>,
        clock: Arc<ManualClock>,
        query: AccountQuery,
        account: Address,
        owner: Participant,
        watchdog: Participant,
    }

    fn setup() -> Fixture {
        let clock = Arc::new(ManualClock::new(1_000));
        let ledger = Arc::new(InMemoryLedger::new(clock.clone()));
        let account = Address::repeat_byte(0xAA);
        let creator = Address::repeat_byte(0xC0);
        let owner = Participant::new(Address::repeat_byte(1), Permissions::OWNER, 1).unwrap();
        let watchdog = Participant::new(Address::repeat_byte(2), Permissions::WATCHDOG, 2).unwrap();

        ledger.create_account(account, creator).unwrap();
        ledger.deposit(account, 1_000).unwrap();
        ledger
            .execute(
                account,
                creator,
                EngineCommand::InitialConfig(InitialConfig {
                    participants: vec![owner, watchdog],
                    delays: vec![DAY, 2 * DAY, 2 * DAY],
                    required_approvals: vec![0, 0, 0],
                    ..Default::default()
                }),
            )
            .unwrap();

        Fixture {
            query: AccountQuery::new(ledger.clone()),
            ledger,
            clock,
            account,
            owner,
            watchdog,
        }
    }

    #[tokio::test]
    async fn test_owner_transfer_leaves_projection() {
        let f = setup();
        let call = BypassCall {
            target: Address::repeat_byte(0x77),
            value: 100,
            data: vec![],
        };
        f.ledger
            .submit(
                f.account,
                f.owner.address,
                EngineCommand::ScheduleBypassCall {
                    perm_level: f.owner.perm_level,
                    call: call.clone(),
                    state_id: 0,
                },
            )
            .await
            .unwrap();

        let pending = f.query.pending_operations(f.account).await.unwrap();
        assert_eq!(pending.calls.len(), 1);
        assert!(matches!(
            pending.calls[0].class,
            CallClass::NativeTransfer { value: 100, .. }
        ));

        f.clock.advance(2 * DAY);
        f.ledger
            .submit(
                f.account,
                f.owner.address,
                EngineCommand::ApplyBypassCall {
                    perm_level: f.owner.perm_level,
                    op: BypassRef {
                        call,
                        state_id: 0,
                        scheduler: f.owner,
                    },
                },
            )
            .await
            .unwrap();

        let pending = f.query.pending_operations(f.account).await.unwrap();
        assert!(pending.calls.is_empty());
        let balance = f.ledger.with_vault(f.account, |v| v.treasury().balance()).unwrap();
        assert_eq!(balance, 900);
    }

    #[tokio::test]
    async fn test_participants_and_freeze() {
        let f = setup();
        let stranger = Participant::new(Address::repeat_byte(3), Permissions::OWNER, 1).unwrap();
        let known = f
            .query
            .participants(f.account, &[f.owner, stranger, f.watchdog])
            .await
            .unwrap();
        assert_eq!(known, vec![f.owner, f.watchdog]);

        f.ledger
            .submit(
                f.account,
                f.watchdog.address,
                EngineCommand::Freeze {
                    perm_level: f.watchdog.perm_level,
                    level: 1,
                    interval: DAY,
                },
            )
            .await
            .unwrap();
        let freeze = f.query.freeze_state(f.account).await.unwrap();
        assert_eq!(freeze.frozen_level, 1);
        assert_eq!(freeze.frozen_until, 1_000 + DAY);
    }

    #[tokio::test]
    async fn test_refresh_matches_full_view() {
        let f = setup();
        let mut view = f.query.view(f.account).await.unwrap();
        f.ledger
            .submit(
                f.account,
                f.watchdog.address,
                EngineCommand::Freeze {
                    perm_level: f.watchdog.perm_level,
                    level: 2,
                    interval: DAY,
                },
            )
            .await
            .unwrap();

        assert_eq!(f.query.refresh(f.account, &mut view).await.unwrap(), 1);
        assert_eq!(view, f.query.view(f.account).await.unwrap());
        assert_eq!(f.query.refresh(f.account, &mut view).await.unwrap(), 0);
    }
}
