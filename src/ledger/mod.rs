//! Ledger substrate: the trait the guardian and projection read through,
//! an in-process host implementing it, and the feed that drives that host.

pub mod client;
pub mod host;
pub mod memory;

pub use client::{EventRecord, LedgerClient, Receipt};
pub use host::{load_initial_config, open_account, run_command_feed, AccountSetup, CommandEnvelope, FeedSummary};
pub use memory::InMemoryLedger;
