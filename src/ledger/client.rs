//! Ledger substrate interface
//!
//! The ledger orders submitted commands, applies each one atomically and
//! keeps an append-only event log per account. Positions start at 1;
//! `events_since(account, 0)` returns the whole history.

use crate::crypto::Address;
use crate::errors::Result;
use crate::vault::{CommandOutput, EngineCommand, VaultEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An event with its place in the account log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub position: u64,
    pub account: Address,
    pub timestamp: u64,
    pub event: VaultEvent,
}

/// Result of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub account: Address,
    pub output: CommandOutput,
    /// Position of the last event the command appended
    pub position: u64,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit a command on behalf of `sender`
    async fn submit(&self, account: Address, sender: Address, command: EngineCommand) -> Result<Receipt>;

    /// Events of `account` strictly after `position`, in order
    async fn events_since(&self, account: Address, position: u64) -> Result<Vec<EventRecord>>;
}
