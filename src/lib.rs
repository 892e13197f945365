//! gatekeep - delayed authorization for custody accounts
//!
//! Every spend or configuration change is scheduled, waits out a delay that
//! depends on the scheduler's level, may gather approvals, and can be
//! cancelled by equal-or-higher-level participants before it is applied.
//!
//! - [`vault`]: the authorization state machine of one account
//! - [`policy`]: bypass policies for immediate or accelerated calls
//! - [`ledger`]: the ordered, event-logging host the vault runs on
//! - [`projection`]: account state rebuilt from the event log
//! - [`guardian`]: the agent that applies, challenges and cancels

pub mod config;
pub mod crypto;
pub mod errors;
pub mod guardian;
pub mod ledger;
pub mod policy;
pub mod projection;
pub mod security;
pub mod vault;

pub use errors::{GatekeepError, Result};
