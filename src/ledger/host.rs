//! Feeding the in-process ledger
//!
//! Watched accounts are deployed from their setup at startup. After that,
//! commands arrive as JSON lines, one `CommandEnvelope` per line, and are
//! submitted in order.

use crate::crypto::Address;
use crate::errors::{GatekeepError, Result};
use crate::ledger::{InMemoryLedger, LedgerClient};
use crate::policy::PolicyFile;
use crate::vault::{EngineCommand, InitialConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

/// How a watched account is deployed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSetup {
    pub creator: Address,
    pub deposit: u128,
    /// Submitted by the creator right after deployment
    pub initial_config: Option<InitialConfig>,
}

/// Read an `InitialConfig` from a JSON file
pub fn load_initial_config(path: &Path) -> Result<InitialConfig> {
    let json = fs::read_to_string(path)
        .map_err(|e| GatekeepError::ConfigError(format!("{}: {}", path.display(), e)))?;
    Ok(serde_json::from_str(&json)?)
}

/// Deploy an account, register the policy file's rules with it and submit
/// its initial configuration
pub fn open_account(
    ledger: &InMemoryLedger,
    account: Address,
    setup: &AccountSetup,
    policies: Option<&PolicyFile>,
) -> Result<()> {
    ledger.create_account(account, setup.creator)?;

    if let Some(file) = policies {
        for (id, rule) in file.rules() {
            ledger.register_policy(account, id, rule)?;
        }
    }
    if setup.deposit > 0 {
        ledger.deposit(account, setup.deposit)?;
    }

    match &setup.initial_config {
        Some(config) => {
            let mut config = config.clone();
            if let Some(file) = policies {
                file.bind_into(&mut config);
            }
            ledger.execute(account, setup.creator, EngineCommand::InitialConfig(config))?;
            info!("Account {} initialized by {}", account, setup.creator);
        }
        None => info!("Account {} awaits initial configuration from {}", account, setup.creator),
    }
    Ok(())
}

/// One command for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub account: Address,
    pub sender: Address,
    pub command: EngineCommand,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: usize,
    pub rejected: usize,
    pub malformed: usize,
}

/// Submit every command read from `reader` until it is exhausted.
///
/// Blank lines and lines starting with `#` are skipped. Malformed lines and
/// rejected commands are logged and counted; only a read failure ends the
/// feed early.
pub async fn run_command_feed<R>(ledger: &dyn LedgerClient, reader: R) -> Result<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut summary = FeedSummary::default();
    let mut line_no = 0usize;

    while let Some(raw) = lines
        .next_line()
        .await
        .map_err(|e| GatekeepError::LedgerError(format!("command feed: {}", e)))?
    {
        line_no += 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let envelope: CommandEnvelope = match serde_json::from_str(line) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(line = line_no, error = %e, "Malformed command");
                summary.malformed += 1;
                continue;
            }
        };

        let name = envelope.command.name();
        match ledger
            .submit(envelope.account, envelope.sender, envelope.command)
            .await
        {
            Ok(receipt) => {
                debug!(line = line_no, command = name, position = receipt.position, "Command accepted");
                summary.accepted += 1;
            }
            Err(e) => {
                warn!(line = line_no, command = name, error = %e, "Command rejected");
                summary.rejected += 1;
            }
        }
    }

    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "Command feed closed"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{BypassCall, ManualClock, Participant, Permissions, VaultEvent};
    use std::sync::Arc;

    const DAY: u64 = 86_400;

    fn owner() -> Participant {
        Participant::new(Address::repeat_byte(1), Permissions::OWNER, 1).unwrap()
    }

    fn setup() -> AccountSetup {
        AccountSetup {
            creator: Address::repeat_byte(0xC0),
            deposit: 1_000,
            initial_config: Some(InitialConfig {
                participants: vec![owner()],
                delays: vec![DAY, DAY],
                required_approvals: vec![0, 0],
                allow_accelerated_calls: true,
                ..Default::default()
            }),
        }
    }

    fn policies() -> PolicyFile {
        serde_json::from_str(
            r#"{
                "policies": { "small": { "type": "value_limit", "id": "small", "max_immediate": 100 } },
                "by_target": { "0x0101010101010101010101010101010101010101": "small" }
            }"#,
        )
        .unwrap()
    }

    fn line(account: Address, sender: Address, command: EngineCommand) -> String {
        serde_json::to_string(&CommandEnvelope {
            account,
            sender,
            command,
        })
        .unwrap()
    }

    #[test]
    fn test_open_account_installs_policies() {
        let ledger = InMemoryLedger::new(Arc::new(ManualClock::new(1_000)));
        let account = Address::repeat_byte(0xAA);
        open_account(&ledger, account, &setup(), Some(&policies())).unwrap();

        let (balance, bound) = ledger
            .with_vault(account, |v| {
                (
                    v.treasury().balance(),
                    v.policies().target_bindings().get(&Address::repeat_byte(1)).cloned(),
                )
            })
            .unwrap();
        assert_eq!(balance, 1_000);
        assert_eq!(bound.map(|id| id.as_str().to_string()), Some("small".to_string()));

        let events = ledger.events(account, 0).unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].event, VaultEvent::ConfigInitialized { .. }));

        // Opening twice is refused
        assert!(open_account(&ledger, account, &setup(), None).is_err());
    }

    #[test]
    fn test_open_account_without_initial_config() {
        let ledger = InMemoryLedger::new(Arc::new(ManualClock::new(1_000)));
        let account = Address::repeat_byte(0xAA);
        let mut setup = setup();
        setup.initial_config = None;
        open_account(&ledger, account, &setup, None).unwrap();
        assert!(ledger.events(account, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_command_feed() {
        let ledger = InMemoryLedger::new(Arc::new(ManualClock::new(1_000)));
        let account = Address::repeat_byte(0xAA);
        open_account(&ledger, account, &setup(), Some(&policies())).unwrap();
        let owner = owner();

        let call = |to: u8, value: u128| BypassCall {
            target: Address::repeat_byte(to),
            value,
            data: vec![],
        };
        let feed = [
            "# immediate under the small policy".to_string(),
            line(
                account,
                owner.address,
                EngineCommand::ExecuteBypassCall {
                    perm_level: owner.perm_level,
                    call: call(1, 50),
                },
            ),
            String::new(),
            "{not json".to_string(),
            line(
                account,
                owner.address,
                EngineCommand::ScheduleBypassCall {
                    perm_level: owner.perm_level,
                    call: call(2, 10),
                    state_id: 9,
                },
            ),
            line(
                account,
                owner.address,
                EngineCommand::ScheduleBypassCall {
                    perm_level: owner.perm_level,
                    call: call(2, 10),
                    state_id: 0,
                },
            ),
        ]
        .join("\n");

        let summary = run_command_feed(&ledger, feed.as_bytes()).await.unwrap();
        assert_eq!(
            summary,
            FeedSummary {
                accepted: 2,
                rejected: 1,
                malformed: 1,
            }
        );

        let balance = ledger.with_vault(account, |v| v.treasury().balance()).unwrap();
        assert_eq!(balance, 950);
        let events = ledger.events(account, 1).unwrap();
        assert!(matches!(events[0].event, VaultEvent::BypassCallExecuted { .. }));
        assert!(matches!(events[1].event, VaultEvent::BypassCallPending { .. }));
    }
}
