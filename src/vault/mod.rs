//! Account authorization engine
//!
//! Participants, the schedule/approve/apply/cancel pipeline, freezes and the
//! funds moved by applied calls.

pub mod actions;
pub mod calldata;
pub mod clock;
pub mod commands;
pub mod engine;
pub mod events;
pub mod freeze;
pub mod participant;
pub mod pending;
pub mod permissions;
pub mod treasury;

pub use actions::ConfigAction;
pub use calldata::Selector;
pub use clock::{Clock, ManualClock, SystemClock};
pub use commands::{BypassRef, CommandOutput, ConfigRef, EngineCommand, InitialConfig};
pub use engine::{Vault, MAX_DELAY, MAX_LEVELS, MAX_PARTICIPANTS};
pub use events::{ApplyOutcome, VaultEvent};
pub use freeze::FreezeState;
pub use participant::{Participant, ParticipantHash};
pub use pending::{BypassCall, OpId, OpKind, OpPayload, PendingOperation};
pub use permissions::{PermLevel, Permissions};
pub use treasury::{CallEffect, Treasury};
