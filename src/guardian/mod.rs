//! Guardian agent
//!
//! Watches account logs, applies operations when they come due, sends one
//! out-of-band challenge per pending operation and approves immediate
//! operator adds for devices that proved control of the account's
//! recipient.

pub mod agent;
pub mod challenge;
pub mod channel;
pub mod control;
pub mod registry;
pub mod store;
pub mod verification;

pub use agent::{Guardian, GuardianAction, GuardianMode, GuardianSettings, ItemError, TickReport};
pub use challenge::{ChallengeCodes, ChallengePurpose};
pub use channel::{GuardianNotice, LogChannel, NoticeBus, OobChannel};
pub use control::{start, GuardianCommand, GuardianHandle};
pub use registry::{AccountInfo, AccountRegistry, DeviceRequest};
pub use store::{PendingStore, TrackedItem, TrackedOp};
pub use verification::{DeviceVerifier, VerifiedIdentity};
