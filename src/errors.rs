//! Error types for gatekeep

use crate::crypto::Address;
use crate::vault::permissions::Permissions;
use std::fmt;
use thiserror::Error;

/// Broad classification of a failure, used by callers to decide whether a
/// request may be corrected and re-submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing permission, unknown identity, wrong level relationship
    Authorization,
    /// Before due time or stale state counter
    Timing,
    /// Not enough approvals yet
    Quorum,
    /// No such pending operation, duplicate schedule, double approval
    Replay,
    /// The actor's level is frozen; resolves once the freeze lifts
    Freeze,
    Config,
    Execution,
    Ledger,
    Channel,
    Internal,
}

/// Which identity tripped a freeze check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeRole {
    Caller,
    Scheduler,
    Booster,
}

impl fmt::Display for FreezeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FreezeRole::Caller => write!(f, "level is frozen"),
            FreezeRole::Scheduler => write!(f, "scheduler level is frozen"),
            FreezeRole::Booster => write!(f, "booster level is frozen"),
        }
    }
}

/// Main error type for gatekeep operations
#[derive(Error, Debug)]
pub enum GatekeepError {
    // Authorization errors
    #[error("Not a participant: {0}")]
    UnknownParticipant(Address),

    #[error("Participant {address} is missing permissions: {missing}")]
    MissingPermissions {
        address: Address,
        missing: Permissions,
    },

    #[error("cannot {action} operation from higher level")]
    HigherLevelOperation { action: &'static str },

    #[error("Only the account creator may do this: {0}")]
    NotCreator(Address),

    #[error("Invalid booster signature: {0}")]
    InvalidBoostSignature(String),

    #[error("Call cannot be executed immediately")]
    CannotExecuteImmediately,

    #[error("Feature disabled: {0}")]
    FeatureDisabled(&'static str),

    #[error("Immediate add-operator cannot be applied here, use the dedicated approval path instead")]
    UseAddOperatorNowPath,

    #[error("Invalid freeze: {0}")]
    InvalidFreeze(String),

    #[error("{0} does not own this account")]
    NotAccountOwner(String),

    // Timing errors
    #[error("state changed since scheduling: current {current}, presented {presented}")]
    StateChanged { current: u64, presented: u64 },

    #[error("before due time: due at {due_time}, now {now}")]
    TooEarly { due_time: u64, now: u64 },

    // Quorum errors
    #[error("pending approvals: have {have}, need {need}")]
    PendingApprovals { have: usize, need: usize },

    // Replay errors
    #[error("repeated operation")]
    RepeatedOperation,

    #[error("no such pending operation")]
    NoSuchPendingOperation,

    #[error("already approved by {0}")]
    AlreadyApproved(Address),

    // Freeze errors
    #[error("{role}: level {level} frozen until {until}")]
    Frozen {
        role: FreezeRole,
        level: u8,
        until: u64,
    },

    // Configuration errors
    #[error("Account not initialized")]
    NotInitialized,

    #[error("Account already initialized")]
    AlreadyInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Execution errors
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: u128, available: u128 },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    // Collaborator errors
    #[error("Unknown account: {0}")]
    UnknownAccount(Address),

    #[error("Ledger error: {0}")]
    LedgerError(String),

    #[error("Out-of-band channel error: {0}")]
    ChannelError(String),

    #[error("Invalid challenge code")]
    InvalidChallenge,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    // Internal errors
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl GatekeepError {
    /// Classify the error
    pub fn category(&self) -> ErrorCategory {
        use GatekeepError::*;
        match self {
            UnknownParticipant(_)
            | MissingPermissions { .. }
            | HigherLevelOperation { .. }
            | NotCreator(_)
            | InvalidBoostSignature(_)
            | CannotExecuteImmediately
            | FeatureDisabled(_)
            | UseAddOperatorNowPath
            | InvalidFreeze(_)
            | NotAccountOwner(_)
            | InvalidChallenge => ErrorCategory::Authorization,
            StateChanged { .. } | TooEarly { .. } => ErrorCategory::Timing,
            PendingApprovals { .. } => ErrorCategory::Quorum,
            RepeatedOperation | NoSuchPendingOperation | AlreadyApproved(_) => {
                ErrorCategory::Replay
            }
            Frozen { .. } => ErrorCategory::Freeze,
            NotInitialized
            | AlreadyInitialized
            | InvalidConfig(_)
            | InvalidAction(_)
            | ConfigError(_)
            | InvalidFormat(_) => ErrorCategory::Config,
            InsufficientFunds { .. } | ExecutionFailed(_) => ErrorCategory::Execution,
            UnknownAccount(_) | LedgerError(_) => ErrorCategory::Ledger,
            ChannelError(_) => ErrorCategory::Channel,
            InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Freeze errors lift on their own; ledger and channel failures are I/O.
    /// Everything else needs a different request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Freeze | ErrorCategory::Ledger | ErrorCategory::Channel
        )
    }
}

impl From<serde_json::Error> for GatekeepError {
    fn from(err: serde_json::Error) -> Self {
        GatekeepError::InvalidFormat(format!("JSON error: {}", err))
    }
}

impl From<hex::FromHexError> for GatekeepError {
    fn from(err: hex::FromHexError) -> Self {
        GatekeepError::InvalidFormat(format!("Hex decode error: {}", err))
    }
}

impl From<config::ConfigError> for GatekeepError {
    fn from(err: config::ConfigError) -> Self {
        GatekeepError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatekeepError>;
