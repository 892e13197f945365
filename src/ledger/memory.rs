//! In-process ledger host
//!
//! Serializes every command behind one lock, so at most one operation is
//! ever in flight against an account. Each account keeps its vault and an
//! append-only log whose positions increase by exactly one.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use crate::ledger::client::{EventRecord, LedgerClient, Receipt};
use crate::policy::{BypassPolicy, PolicyId};
use crate::vault::{Clock, EngineCommand, Vault, VaultEvent};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

struct AccountLog {
    vault: Vault,
    events: Vec<EventRecord>,
}

impl AccountLog {
    fn last_position(&self) -> u64 {
        self.events.last().map(|e| e.position).unwrap_or(0)
    }

    fn append(&mut self, record: EventRecord) -> Result<()> {
        let expected = self.last_position() + 1;
        if record.position != expected {
            return Err(GatekeepError::LedgerError(format!(
                "sequence violation: expected {}, got {}",
                expected, record.position
            )));
        }
        self.events.push(record);
        Ok(())
    }
}

pub struct InMemoryLedger {
    accounts: Mutex<HashMap<Address, AccountLog>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Deploy an uninitialized account owned by `creator`
    pub fn create_account(&self, account: Address, creator: Address) -> Result<()> {
        let mut accounts = self.accounts.lock();
        if accounts.contains_key(&account) {
            return Err(GatekeepError::LedgerError(format!(
                "account {} already exists",
                account
            )));
        }
        accounts.insert(
            account,
            AccountLog {
                vault: Vault::new(account, creator, self.clock.clone()),
                events: Vec::new(),
            },
        );
        info!("Created account {} for creator {}", account, creator);
        Ok(())
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.accounts.lock().keys().copied().collect()
    }

    /// Read-only access to an account's vault
    pub fn with_vault<R>(&self, account: Address, f: impl FnOnce(&Vault) -> R) -> Result<R> {
        let accounts = self.accounts.lock();
        let log = accounts
            .get(&account)
            .ok_or(GatekeepError::UnknownAccount(account))?;
        Ok(f(&log.vault))
    }

    fn with_vault_mut<R>(&self, account: Address, f: impl FnOnce(&mut Vault) -> R) -> Result<R> {
        let mut accounts = self.accounts.lock();
        let log = accounts
            .get_mut(&account)
            .ok_or(GatekeepError::UnknownAccount(account))?;
        Ok(f(&mut log.vault))
    }

    pub fn deposit(&self, account: Address, value: u128) -> Result<()> {
        self.with_vault_mut(account, |v| v.treasury_mut().deposit(value))
    }

    pub fn mint_token(&self, account: Address, token: Address, holder: Address, amount: u128) -> Result<()> {
        self.with_vault_mut(account, |v| v.treasury_mut().mint_token(token, holder, amount))
    }

    pub fn register_policy(&self, account: Address, id: PolicyId, policy: Arc<dyn BypassPolicy>) -> Result<()> {
        self.with_vault_mut(account, |v| v.register_policy(id, policy))
    }

    /// Apply a command synchronously
    pub fn execute(&self, account: Address, sender: Address, command: EngineCommand) -> Result<Receipt> {
        let mut accounts = self.accounts.lock();
        let log = accounts
            .get_mut(&account)
            .ok_or(GatekeepError::UnknownAccount(account))?;

        let name = command.name();
        let output = match log.vault.dispatch(sender, command) {
            Ok(output) => output,
            Err(e) => {
                // A rejected command leaves no trace in the log
                log.vault.take_events();
                warn!("Rejected {} from {} on {}: {}", name, sender, account, e);
                return Err(e);
            }
        };

        let timestamp = self.clock.now();
        let events: Vec<VaultEvent> = log.vault.take_events();
        for event in events {
            let record = EventRecord {
                position: log.last_position() + 1,
                account,
                timestamp,
                event,
            };
            log.append(record)?;
        }

        let position = log.last_position();
        debug!("Accepted {} from {} on {} at position {}", name, sender, account, position);
        Ok(Receipt {
            account,
            output,
            position,
        })
    }

    pub fn events(&self, account: Address, position: u64) -> Result<Vec<EventRecord>> {
        let accounts = self.accounts.lock();
        let log = accounts
            .get(&account)
            .ok_or(GatekeepError::UnknownAccount(account))?;
        Ok(log
            .events
            .iter()
            .filter(|e| e.position > position)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn submit(&self, account: Address, sender: Address, command: EngineCommand) -> Result<Receipt> {
        self.execute(account, sender, command)
    }

    async fn events_since(&self, account: Address, position: u64) -> Result<Vec<EventRecord>> {
        self.events(account, position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{BypassCall, InitialConfig, ManualClock, Participant, Permissions};

    fn setup() -> (InMemoryLedger, Address, Participant) {
        let ledger = InMemoryLedger::new(Arc::new(ManualClock::new(1_000)));
        let account = Address::repeat_byte(0xAA);
        let creator = Address::repeat_byte(0xC0);
        let owner = Participant::new(Address::repeat_byte(1), Permissions::OWNER, 0).unwrap();
        ledger.create_account(account, creator).unwrap();
        ledger
            .execute(
                account,
                creator,
                EngineCommand::InitialConfig(InitialConfig {
                    participants: vec![owner],
                    delays: vec![60],
                    required_approvals: vec![0],
                    ..Default::default()
                }),
            )
            .unwrap();
        (ledger, account, owner)
    }

    #[tokio::test]
    async fn test_positions_are_sequential() {
        let (ledger, account, owner) = setup();
        for value in 1..=3u128 {
            ledger
                .submit(
                    account,
                    owner.address,
                    EngineCommand::ScheduleBypassCall {
                        perm_level: owner.perm_level,
                        call: BypassCall {
                            target: Address::repeat_byte(2),
                            value,
                            data: vec![],
                        },
                        state_id: 0,
                    },
                )
                .await
                .unwrap();
        }

        let all = ledger.events_since(account, 0).await.unwrap();
        let positions: Vec<u64> = all.iter().map(|e| e.position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
        assert!(matches!(all[0].event, VaultEvent::ConfigInitialized { .. }));

        let tail = ledger.events_since(account, 2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].position, 3);
    }

    #[tokio::test]
    async fn test_rejected_command_appends_nothing() {
        let (ledger, account, owner) = setup();
        let err = ledger
            .submit(
                account,
                owner.address,
                EngineCommand::ScheduleBypassCall {
                    perm_level: owner.perm_level,
                    call: BypassCall {
                        target: Address::repeat_byte(2),
                        value: 1,
                        data: vec![],
                    },
                    state_id: 9,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeepError::StateChanged { .. }));
        assert_eq!(ledger.events_since(account, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (ledger, _, _) = setup();
        let err = ledger
            .events_since(Address::repeat_byte(0xEE), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeepError::UnknownAccount(_)));
        assert!(ledger
            .create_account(Address::repeat_byte(0xAA), Address::zero())
            .is_err());
    }
}
