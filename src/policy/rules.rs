//! Bypass policy rules
//!
//! A bypass policy decides whether a call may skip the delay pipeline:
//! - run now
//! - run early once approved
//! - wait out the full delay

use crate::crypto::Address;
use crate::vault::calldata::{decode_token_transfer, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Outcome of evaluating a bypass policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Immediate,
    NeedsApprovalThenImmediate,
    DelayRequired,
}

/// The call being evaluated
#[derive(Debug, Clone, Copy)]
pub struct CallContext<'a> {
    pub account: Address,
    pub target: Address,
    pub value: u128,
    pub data: &'a [u8],
}

impl<'a> CallContext<'a> {
    pub fn new(account: Address, target: Address, value: u128, data: &'a [u8]) -> Self {
        Self {
            account,
            target,
            value,
            data,
        }
    }

    pub fn selector(&self) -> Option<Selector> {
        Selector::of(self.data)
    }

    /// Who ends up with the funds: the decoded token recipient, else the target
    pub fn beneficiary(&self) -> Address {
        decode_token_transfer(self.data)
            .map(|t| t.to)
            .unwrap_or(self.target)
    }

    /// Native value, or the token amount for token transfers
    pub fn amount(&self) -> u128 {
        if self.value == 0 {
            if let Some(t) = decode_token_transfer(self.data) {
                return t.amount;
            }
        }
        self.value
    }
}

/// A pluggable bypass policy
pub trait BypassPolicy: Send + Sync + fmt::Debug {
    fn evaluate(&self, call: &CallContext<'_>) -> Verdict;

    fn description(&self) -> String;
}

/// Built-in policies, loadable from a policy file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BypassRule {
    /// Always wait out the delay
    #[serde(rename = "delay_only")]
    DelayOnly,

    /// Run anything immediately
    #[serde(rename = "allow_all")]
    AllowAll,

    /// Immediate for listed beneficiaries
    #[serde(rename = "allowlist")]
    Allowlist(AllowlistRule),

    /// Immediate up to a value, approval shortcut above it
    #[serde(rename = "value_limit")]
    ValueLimit(ValueLimitRule),

    /// Early execution once approved
    #[serde(rename = "approval_shortcut")]
    ApprovalShortcut,
}

impl BypassPolicy for BypassRule {
    fn evaluate(&self, call: &CallContext<'_>) -> Verdict {
        match self {
            BypassRule::DelayOnly => Verdict::DelayRequired,
            BypassRule::AllowAll => Verdict::Immediate,
            BypassRule::Allowlist(r) => {
                if r.is_allowed(&call.beneficiary()) {
                    Verdict::Immediate
                } else {
                    Verdict::DelayRequired
                }
            }
            BypassRule::ValueLimit(r) => r.verdict(call.amount()),
            BypassRule::ApprovalShortcut => Verdict::NeedsApprovalThenImmediate,
        }
    }

    fn description(&self) -> String {
        match self {
            BypassRule::DelayOnly => "Delay every call".to_string(),
            BypassRule::AllowAll => "Execute every call immediately".to_string(),
            BypassRule::Allowlist(r) => {
                format!("Immediate for {} addresses (rule: {})", r.addresses.len(), r.id)
            }
            BypassRule::ValueLimit(r) => {
                format!("Immediate up to {} (rule: {})", r.max_immediate, r.id)
            }
            BypassRule::ApprovalShortcut => "Immediate once approved".to_string(),
        }
    }
}

/// Beneficiary allowlist rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistRule {
    /// Rule ID
    pub id: String,
    pub addresses: HashSet<Address>,
    /// Whether an empty list allows everything
    #[serde(default)]
    pub allow_empty: bool,
}

impl AllowlistRule {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            addresses: HashSet::new(),
            allow_empty: false,
        }
    }

    pub fn add_address(&mut self, addr: Address) {
        self.addresses.insert(addr);
    }

    pub fn is_allowed(&self, addr: &Address) -> bool {
        if self.addresses.is_empty() {
            return self.allow_empty;
        }
        self.addresses.contains(addr)
    }
}

/// Value limit rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueLimitRule {
    /// Rule ID
    pub id: String,
    /// Largest amount that runs without delay or approval
    pub max_immediate: u64,
}

impl ValueLimitRule {
    pub fn new(id: &str, max_immediate: u64) -> Self {
        Self {
            id: id.to_string(),
            max_immediate,
        }
    }

    pub fn verdict(&self, amount: u128) -> Verdict {
        if amount <= self.max_immediate as u128 {
            Verdict::Immediate
        } else {
            Verdict::NeedsApprovalThenImmediate
        }
    }
}
